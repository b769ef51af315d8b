//! Login-attempt bookkeeping. Credentials are checked upstream; this endpoint
//! only throttles attempts and tracks lockouts.

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use stockroom_core::DomainError;

use super::common;
use crate::app::{dto, errors::ApiResult, services::AppServices};
use crate::context::RequestContext;

pub async fn login_attempt(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    payload: Result<Json<dto::LoginAttemptRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let req = common::body(payload)?;
    let identifier = req.identifier.trim();
    if identifier.is_empty() || identifier.len() > 254 {
        return Err(DomainError::invalid("identifier must be 1..=254 characters").into());
    }

    services.login.allow_login(ctx.client())?;
    services.login.ensure_unlocked(identifier)?;

    if req.success {
        services.login.record_successful_login(identifier);
        return Ok(Json(json!({ "identifier": identifier, "locked": false })).into_response());
    }

    if let Some(unlock_time) = services.login.record_failed_login(identifier) {
        return Err(DomainError::AccountLocked { unlock_time }.into());
    }
    Ok((
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "error": "INVALID_CREDENTIALS",
            "message": "login attempt recorded as failed",
            "locked": false,
        })),
    )
        .into_response())
}
