use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};

use crate::app::services::AppServices;
use crate::app::dto;

pub fn router() -> Router {
    Router::new()
        .route("/stats", get(stats))
        .route("/cogs", get(cogs))
        .route("/expiring", get(expiring_batches))
        .route("/low-stock", get(low_stock_variants))
}

pub async fn stats(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "asset_value": services.reports().asset_value(),
        })),
    )
        .into_response()
}

pub async fn cogs(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::CogsQuery>,
) -> axum::response::Response {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "cogs": services.reports().cogs(query.from, query.to),
        })),
    )
        .into_response()
}

pub async fn expiring_batches(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::ExpiringQuery>,
) -> axum::response::Response {
    let items: Vec<serde_json::Value> = services
        .reports()
        .expiring_batches(query.days)
        .into_iter()
        .map(dto::batch_level_to_json)
        .collect();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}

pub async fn low_stock_variants(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    let items: Vec<serde_json::Value> = services
        .reports()
        .low_stock_variants()
        .into_iter()
        .map(dto::low_stock_to_json)
        .collect();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}
