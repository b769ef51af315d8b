//! Monetary and quantity primitives.
//!
//! Costs are fixed-precision decimals with two fractional digits; quantities are
//! plain `i64` bounded to ±10⁹.

use core::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Upper bound for any stock quantity or level.
pub const MAX_QUANTITY: i64 = 1_000_000_000;

/// Tolerance used when comparing costs.
pub fn cost_tolerance() -> Decimal {
    Decimal::new(1, 2)
}

/// Round to cents, midpoint away from zero.
pub fn round_cents(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Validate a signed movement quantity: non-zero and |q| ≤ 10⁹.
pub fn check_movement(name: &str, q: i64) -> DomainResult<i64> {
    if q == 0 {
        return Err(DomainError::invalid(format!("{name} cannot be zero")));
    }
    if q.unsigned_abs() > MAX_QUANTITY as u64 {
        return Err(DomainError::invalid(format!(
            "{name} magnitude exceeds {MAX_QUANTITY}"
        )));
    }
    Ok(q)
}

/// Validate a strictly positive quantity ≤ 10⁹.
pub fn check_positive(name: &str, q: i64) -> DomainResult<i64> {
    if q <= 0 {
        return Err(DomainError::invalid(format!("{name} must be positive")));
    }
    check_level(name, q)
}

/// Validate a stock level: 0 ≤ q ≤ 10⁹.
pub fn check_level(name: &str, q: i64) -> DomainResult<i64> {
    if q < 0 {
        return Err(DomainError::invalid(format!("{name} cannot be negative")));
    }
    if q > MAX_QUANTITY {
        return Err(DomainError::invalid(format!("{name} cannot exceed {MAX_QUANTITY}")));
    }
    Ok(q)
}

/// Non-negative unit or average cost, stored to the cent.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Cost(Decimal);

impl Cost {
    pub const ZERO: Cost = Cost(Decimal::ZERO);

    /// Largest storable cost: 999,999,999.99.
    pub fn max() -> Decimal {
        Decimal::new(99_999_999_999, 2)
    }

    pub fn new(value: Decimal) -> DomainResult<Self> {
        let value = round_cents(value);
        if value < Decimal::ZERO {
            return Err(DomainError::invalid("cost cannot be negative"));
        }
        if value > Self::max() {
            return Err(DomainError::invalid(format!("cost cannot exceed {}", Self::max())));
        }
        Ok(Self(value))
    }

    pub fn from_cents(cents: i64) -> DomainResult<Self> {
        Self::new(Decimal::new(cents, 2))
    }

    pub fn amount(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// `self · |q|`, rounded to cents. May exceed the storable cost bound.
    pub fn extend(&self, q: i64) -> Decimal {
        round_cents(self.0 * Decimal::from(q.unsigned_abs()))
    }

    /// Equality within one cent.
    pub fn approx_eq(&self, other: Decimal) -> bool {
        (self.0 - other).abs() <= cost_tolerance()
    }
}

impl TryFrom<Decimal> for Cost {
    type Error = DomainError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Cost::new(value)
    }
}

impl From<Cost> for Decimal {
    fn from(value: Cost) -> Self {
        value.0
    }
}

impl FromStr for Cost {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let d = Decimal::from_str(s.trim())
            .map_err(|e| DomainError::invalid(format!("cost: {e}")))?;
        Cost::new(d)
    }
}

impl core::fmt::Display for Cost {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}
