//! HTTP API: configuration, routing and request/response mapping over the
//! inventory service and the rate limiter.

pub mod app;
pub mod config;
pub mod context;
pub mod middleware;

pub use config::AppConfig;
