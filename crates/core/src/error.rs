//! Domain error model.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used across the domain and service layers.
pub type DomainResult<T> = Result<T, DomainError>;

/// Stable, user-visible error kind.
///
/// The string form (`as_str`) is part of the public contract and must not change.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    InvalidState,
    InsufficientStock,
    CapacityExceeded,
    Conflict,
    RateLimited,
    AccountLocked,
    NotImplemented,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "INVALID_ARGUMENT",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::AlreadyExists => "ALREADY_EXISTS",
            ErrorKind::InvalidState => "INVALID_STATE",
            ErrorKind::InsufficientStock => "INSUFFICIENT_STOCK",
            ErrorKind::CapacityExceeded => "CAPACITY_EXCEEDED",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::AccountLocked => "ACCOUNT_LOCKED",
            ErrorKind::NotImplemented => "NOT_IMPLEMENTED",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::Internal => "INTERNAL",
        }
    }

    /// Only persistence conflicts are worth replaying.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Conflict)
    }
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain-level error.
///
/// Entity validation and invariant failures surface unchanged up to the service
/// boundary; persistence failures are classified into `Conflict` / `AlreadyExists`
/// / `NotFound` / `Internal` before they get here.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A field failed a declared bound, pattern or enum membership.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A state machine rule was violated.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// Serialization conflict that survived every retry.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rate limited, retry after {}ms", retry_after.as_millis())]
    RateLimited { retry_after: Duration },

    #[error("account locked until {unlock_time}")]
    AccountLocked { unlock_time: DateTime<Utc> },

    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// The operation's cancellation token fired before commit.
    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DomainError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn already_exists(msg: impl Into<String>) -> Self {
        Self::AlreadyExists(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn insufficient_stock(msg: impl Into<String>) -> Self {
        Self::InsufficientStock(msg.into())
    }

    pub fn capacity_exceeded(msg: impl Into<String>) -> Self {
        Self::CapacityExceeded(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_implemented(msg: impl Into<String>) -> Self {
        Self::NotImplemented(msg.into())
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            DomainError::NotFound(_) => ErrorKind::NotFound,
            DomainError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            DomainError::InvalidState(_) => ErrorKind::InvalidState,
            DomainError::InsufficientStock(_) => ErrorKind::InsufficientStock,
            DomainError::CapacityExceeded(_) => ErrorKind::CapacityExceeded,
            DomainError::Conflict(_) => ErrorKind::Conflict,
            DomainError::RateLimited { .. } => ErrorKind::RateLimited,
            DomainError::AccountLocked { .. } => ErrorKind::AccountLocked,
            DomainError::NotImplemented(_) => ErrorKind::NotImplemented,
            DomainError::Cancelled(_) => ErrorKind::Cancelled,
            DomainError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Message without the kind prefix added by `Display`.
    pub fn message(&self) -> String {
        match self {
            DomainError::InvalidArgument(m)
            | DomainError::NotFound(m)
            | DomainError::AlreadyExists(m)
            | DomainError::InvalidState(m)
            | DomainError::InsufficientStock(m)
            | DomainError::CapacityExceeded(m)
            | DomainError::Conflict(m)
            | DomainError::NotImplemented(m)
            | DomainError::Cancelled(m)
            | DomainError::Internal(m) => m.clone(),
            DomainError::RateLimited { retry_after } => {
                format!("retry after {}ms", retry_after.as_millis())
            }
            DomainError::AccountLocked { unlock_time } => {
                format!("locked until {}", unlock_time.to_rfc3339())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_have_stable_names() {
        assert_eq!(DomainError::invalid("x").kind().as_str(), "INVALID_ARGUMENT");
        assert_eq!(DomainError::insufficient_stock("x").kind().as_str(), "INSUFFICIENT_STOCK");
        assert_eq!(
            DomainError::RateLimited { retry_after: Duration::from_millis(10) }.kind().as_str(),
            "RATE_LIMITED"
        );
        assert_eq!(
            serde_json::to_value(ErrorKind::NotImplemented).unwrap(),
            serde_json::json!("NOT_IMPLEMENTED")
        );
    }

    #[test]
    fn only_conflicts_are_retryable() {
        assert!(ErrorKind::Conflict.is_retryable());
        assert!(!ErrorKind::Internal.is_retryable());
        assert!(!ErrorKind::InvalidState.is_retryable());
    }

    #[test]
    fn message_strips_kind_prefix() {
        let err = DomainError::invalid_state("transaction already approved");
        assert_eq!(err.message(), "transaction already approved");
        assert_eq!(err.to_string(), "invalid state: transaction already approved");
    }
}
