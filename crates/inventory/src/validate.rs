//! Bounded field validators shared by the entities.
//!
//! Every pattern is anchored and length-bounded; failures are `INVALID_ARGUMENT`.

use once_cell::sync::Lazy;
use regex::Regex;

use stockroom_core::{DomainError, DomainResult};

static WAREHOUSE_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z0-9_-]{2,20}$").unwrap());
static POSTAL_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9 -]{3,12}$").unwrap());
static COUNTRY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]{2}$").unwrap());
static PHONE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+?[0-9 ()-]{7,20}$").unwrap());
static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap());
static REFERENCE_TYPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,50}$").unwrap());
static LOT_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_#-]{1,100}$").unwrap());

pub fn not_blank(field: &str, value: &str) -> DomainResult<()> {
    if value.trim().is_empty() {
        return Err(DomainError::invalid(format!("{field} cannot be empty")));
    }
    Ok(())
}

/// Character-count bound (not bytes).
pub fn max_len(field: &str, value: &str, max: usize) -> DomainResult<()> {
    if value.chars().count() > max {
        return Err(DomainError::invalid(format!("{field} cannot exceed {max} characters")));
    }
    Ok(())
}

fn matches(field: &str, re: &Regex, value: &str, hint: &str) -> DomainResult<()> {
    if !re.is_match(value) {
        return Err(DomainError::invalid(format!("{field} must match {hint}")));
    }
    Ok(())
}

pub fn warehouse_code(value: &str) -> DomainResult<()> {
    matches("code", &WAREHOUSE_CODE, value, "[A-Z0-9_-]{2,20}")
}

pub fn postal_code(value: &str) -> DomainResult<()> {
    matches("postal_code", &POSTAL_CODE, value, "3-12 letters, digits, spaces or dashes")
}

pub fn country(value: &str) -> DomainResult<()> {
    matches("country", &COUNTRY, value, "an ISO 3166 alpha-2 code")
}

pub fn phone(value: &str) -> DomainResult<()> {
    matches("phone", &PHONE, value, "7-20 digits with optional +, spaces, dashes, parentheses")
}

pub fn email(value: &str) -> DomainResult<()> {
    max_len("email", value, 254)?;
    matches("email", &EMAIL, value, "an email address")
}

pub fn reference_type(value: &str) -> DomainResult<()> {
    matches("reference_type", &REFERENCE_TYPE, value, "[A-Za-z0-9_-]{1,50}")
}

/// Batch and serial numbers.
pub fn lot_token(field: &str, value: &str) -> DomainResult<()> {
    matches(field, &LOT_TOKEN, value, "[A-Za-z0-9_#-]{1,100}")
}

pub fn range(field: &str, value: i64, min: i64, max: i64) -> DomainResult<()> {
    if value < min || value > max {
        return Err(DomainError::invalid(format!("{field} must be between {min} and {max}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warehouse_codes() {
        assert!(warehouse_code("WH-01").is_ok());
        assert!(warehouse_code("A").is_err());
        assert!(warehouse_code("wh01").is_err());
        assert!(warehouse_code("ABCDEFGHIJKLMNOPQRSTU").is_err());
    }

    #[test]
    fn lot_tokens_reject_whitespace_and_symbols() {
        assert!(lot_token("batch_number", "LOT#2024-01").is_ok());
        assert!(lot_token("batch_number", "LOT 1").is_err());
        assert!(lot_token("serial_number", "").is_err());
        assert!(lot_token("serial_number", &"x".repeat(101)).is_err());
    }

    #[test]
    fn contact_fields() {
        assert!(phone("+1 (555) 010-2030").is_ok());
        assert!(phone("12").is_err());
        assert!(email("ops@example.com").is_ok());
        assert!(email("not-an-email").is_err());
        assert!(country("DE").is_ok());
        assert!(country("deu").is_err());
        assert!(postal_code("SW1A 1AA").is_ok());
    }

    #[test]
    fn max_len_counts_characters() {
        assert!(max_len("name", "ääää", 4).is_ok());
        assert!(max_len("name", "äääää", 4).is_err());
    }
}
