//! Application wiring: services + router.

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

use std::sync::Arc;

use axum::{Extension, Router, http::StatusCode, response::IntoResponse, routing::get};
use tower::ServiceBuilder;

use services::{AppServices, build_services};

/// Build the production router with services selected from the environment
/// (`USE_PERSISTENT_STORES`, `DATABASE_URL`).
pub async fn build_app() -> Router {
    let services = Arc::new(build_services().await);
    build_app_with_services(services)
}

/// Build the router around pre-built services (tests construct and seed
/// their own).
pub fn build_app_with_services(services: Arc<AppServices>) -> Router {
    Router::new()
        .nest("/stock", routes::stock::router())
        .nest("/ledger", routes::ledger::router())
        // axum 0.7 nests `/ledger` + inner `/` to match `/ledger` only, not
        // `/ledger/`; register the trailing-slash path so both are reachable.
        .route("/ledger/", get(routes::ledger::list_ledger))
        .nest("/reports", routes::reports::router())
        .layer(
            ServiceBuilder::new()
                .layer(Extension(services))
                .layer(axum::middleware::from_fn(crate::middleware::actor_middleware)),
        )
        .route("/health", get(health))
}

async fn health() -> axum::response::Response {
    (StatusCode::OK, axum::Json(serde_json::json!({ "status": "ok" }))).into_response()
}
