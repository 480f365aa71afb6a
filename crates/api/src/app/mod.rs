//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store and upstream selection, job entry points
//! - `routes/`: HTTP handlers, one file per area
//! - `errors.rs`: consistent `{error, message}` responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

pub mod errors;
pub mod routes;
pub mod services;

pub use services::AppServices;

/// Build the full HTTP router (public entrypoint used by `main.rs` and tests).
pub fn build_app(services: Arc<AppServices>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::router())
        .layer(ServiceBuilder::new().layer(Extension(services)))
}
