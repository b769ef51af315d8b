use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

use stockroom_core::{DomainError, UserId};

use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::{RequestContext, USER_ID_HEADER};

/// Attach a [`RequestContext`]. A malformed identity header is rejected here;
/// an absent one is left for the handlers that need it.
pub async fn request_context(mut req: Request, next: Next) -> Response {
    let client = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let actor = match extract_user_id(req.headers()) {
        Ok(actor) => actor,
        Err(e) => return errors::domain_error_to_response(e),
    };

    req.extensions_mut().insert(RequestContext::new(client, actor));
    next.run(req).await
}

/// Global per-client bucket (`client:<ip>`).
pub async fn rate_limit(
    State(services): State<Arc<AppServices>>,
    req: Request,
    next: Next,
) -> Response {
    let client = req
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.client().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    if let Err(e) = services.check_client(&client) {
        tracing::debug!(client, "request rate limited");
        return errors::domain_error_to_response(e);
    }
    next.run(req).await
}

fn extract_user_id(headers: &HeaderMap) -> Result<Option<UserId>, DomainError> {
    let Some(header) = headers.get(USER_ID_HEADER) else {
        return Ok(None);
    };
    let value = header
        .to_str()
        .map_err(|_| DomainError::invalid("X-User-Id is not valid text"))?
        .trim();
    if value.is_empty() {
        return Ok(None);
    }
    value.parse().map(Some)
}
