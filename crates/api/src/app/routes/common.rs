use axum::Json;
use axum::extract::Query;
use axum::extract::rejection::{JsonRejection, QueryRejection};

use stockroom_core::{DomainError, DomainResult};

/// Unwrap a JSON body, reporting malformed input as `INVALID_ARGUMENT`.
pub fn body<T>(payload: Result<Json<T>, JsonRejection>) -> DomainResult<T> {
    payload
        .map(|Json(v)| v)
        .map_err(|e| DomainError::invalid(e.body_text()))
}

pub fn query<T>(q: Result<Query<T>, QueryRejection>) -> DomainResult<T> {
    q.map(|Query(v)| v)
        .map_err(|e| DomainError::invalid(e.body_text()))
}
