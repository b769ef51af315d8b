use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use stockroom_core::{DomainError, ErrorKind};

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::AlreadyExists => StatusCode::CONFLICT,
        ErrorKind::InvalidState => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::InsufficientStock => StatusCode::CONFLICT,
        ErrorKind::CapacityExceeded => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::AccountLocked => StatusCode::LOCKED,
        ErrorKind::NotImplemented => StatusCode::NOT_IMPLEMENTED,
        ErrorKind::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn domain_error_to_response(err: DomainError) -> Response {
    let kind = err.kind();
    let status = status_for(kind);
    match &err {
        DomainError::RateLimited { retry_after } => {
            // Whole seconds, rounded up, never zero.
            let secs = retry_after.as_millis().div_ceil(1000).max(1);
            let mut res = json_error(status, kind.as_str(), err.to_string());
            if let Ok(v) = HeaderValue::from_str(&secs.to_string()) {
                res.headers_mut().insert(header::RETRY_AFTER, v);
            }
            res
        }
        DomainError::AccountLocked { unlock_time } => (
            status,
            axum::Json(json!({
                "error": kind.as_str(),
                "message": err.to_string(),
                "unlock_time": unlock_time,
            })),
        )
            .into_response(),
        DomainError::Internal(msg) => {
            tracing::error!(error = %msg, "internal error");
            json_error(status, kind.as_str(), "internal error")
        }
        _ => json_error(status, kind.as_str(), err.to_string()),
    }
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Handler error: anything that converts into a [`DomainError`].
#[derive(Debug)]
pub struct ApiError(pub DomainError);

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        domain_error_to_response(self.0)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn every_kind_has_its_status() {
        let cases = [
            (DomainError::invalid("x"), 400),
            (DomainError::not_found("x"), 404),
            (DomainError::already_exists("x"), 409),
            (DomainError::invalid_state("x"), 422),
            (DomainError::insufficient_stock("x"), 409),
            (DomainError::capacity_exceeded("x"), 422),
            (DomainError::conflict("x"), 409),
            (DomainError::not_implemented("x"), 501),
            (DomainError::Cancelled("x".into()), 503),
            (DomainError::Internal("x".into()), 500),
        ];
        for (err, status) in cases {
            assert_eq!(domain_error_to_response(err).status().as_u16(), status);
        }
    }

    #[test]
    fn rate_limited_carries_retry_after() {
        let res = domain_error_to_response(DomainError::RateLimited {
            retry_after: Duration::from_millis(1200),
        });
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(res.headers()[header::RETRY_AFTER], "2");

        let res = domain_error_to_response(DomainError::RateLimited { retry_after: Duration::ZERO });
        assert_eq!(res.headers()[header::RETRY_AFTER], "1");
    }

    #[test]
    fn account_locked_is_423() {
        let res = domain_error_to_response(DomainError::AccountLocked {
            unlock_time: chrono::Utc::now(),
        });
        assert_eq!(res.status(), StatusCode::LOCKED);
    }
}
