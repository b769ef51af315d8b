//! Persistence error classification.
//!
//! Backends report failures as [`StoreError`]; the service layer only ever sees
//! the [`DomainError`] it converts into.
//!
//! | Backend condition | SQLSTATE | `StoreError` | `ErrorKind` |
//! |-------------------|----------|--------------|-------------|
//! | serialization failure | `40001` | `Conflict` | `CONFLICT` (retried) |
//! | deadlock detected | `40P01` | `Conflict` | `CONFLICT` (retried) |
//! | unique violation | `23505` | `AlreadyExists` | `ALREADY_EXISTS` |
//! | row not found | n/a | `NotFound` | `NOT_FOUND` |
//! | anything else | any | `Internal` | `INTERNAL` |

use thiserror::Error;

use stockroom_core::DomainError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Internal(String),
}

impl From<StoreError> for DomainError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(m) => DomainError::conflict(m),
            StoreError::AlreadyExists(m) => DomainError::already_exists(m),
            StoreError::NotFound(m) => DomainError::not_found(m),
            StoreError::Internal(m) => DomainError::internal(m),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockroom_core::ErrorKind;

    #[test]
    fn store_errors_keep_their_kind() {
        let cases = [
            (StoreError::Conflict("x".into()), ErrorKind::Conflict),
            (StoreError::AlreadyExists("x".into()), ErrorKind::AlreadyExists),
            (StoreError::NotFound("x".into()), ErrorKind::NotFound),
            (StoreError::Internal("x".into()), ErrorKind::Internal),
        ];
        for (err, kind) in cases {
            assert_eq!(DomainError::from(err).kind(), kind);
        }
    }
}
