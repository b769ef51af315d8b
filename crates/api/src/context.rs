use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};

use stockroom_core::UserId;

use crate::app::errors;

/// Caller identity header. Authentication happens upstream; the value is trusted.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Per-request context, attached by [`crate::middleware::request_context`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    client: String,
    actor: Option<UserId>,
}

impl RequestContext {
    pub fn new(client: impl Into<String>, actor: Option<UserId>) -> Self {
        Self { client: client.into(), actor }
    }

    /// Peer address, or `unknown` when the server runs without connect info.
    pub fn client(&self) -> &str {
        &self.client
    }

    pub fn actor(&self) -> Option<UserId> {
        self.actor
    }
}

/// The acting user of a mutating request. Rejects with 401 when the
/// identity header is absent.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Actor(pub UserId);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Actor {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .and_then(RequestContext::actor)
            .map(Actor)
            .ok_or_else(|| {
                errors::json_error(
                    StatusCode::UNAUTHORIZED,
                    "UNAUTHENTICATED",
                    "X-User-Id header is required",
                )
                .into_response()
            })
    }
}
