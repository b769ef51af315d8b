//! HTTP application wiring (Axum router + service wiring).
//!
//! - `services.rs`: backend selection, inventory service, rate limiting
//! - `routes/`: HTTP handlers, one file per area
//! - `dto.rs`: request DTOs and query-string mapping
//! - `errors.rs`: error kind to HTTP status and JSON body

use std::sync::Arc;

use axum::{Extension, Router};
use tower::ServiceBuilder;

use crate::config::AppConfig;
use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::AppServices;

/// Every request gets a [`crate::context::RequestContext`] and then passes the
/// per-client bucket before reaching a handler.
pub fn build_router(services: Arc<AppServices>) -> Router {
    routes::router().layer(
        ServiceBuilder::new()
            .layer(axum::middleware::from_fn(middleware::request_context))
            .layer(axum::middleware::from_fn_with_state(
                services.clone(),
                middleware::rate_limit,
            ))
            .layer(Extension(services)),
    )
}

/// Build services from `config` and the router over them (public entrypoint used by `main.rs`).
pub async fn build_app(config: &AppConfig) -> anyhow::Result<(Router, Arc<AppServices>)> {
    let services = Arc::new(services::build_services(config).await?);
    Ok((build_router(services.clone()), services))
}
