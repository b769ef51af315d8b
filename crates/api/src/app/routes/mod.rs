use axum::{
    Router,
    routing::{get, post},
};

pub mod auth;
pub mod common;
pub mod inventory;
pub mod system;
pub mod transactions;
pub mod warehouses;

/// Router for every endpoint behind the rate limiter.
pub fn router() -> Router {
    Router::new()
        .route("/health", get(system::health))
        .route("/auth/login-attempt", post(auth::login_attempt))
        .nest("/warehouses", warehouses::router())
        .nest("/inventory", inventory::router())
        .nest("/transactions", transactions::router())
}
