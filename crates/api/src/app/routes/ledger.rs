use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};

use stocklot_core::{VariantId, WarehouseId};
use stocklot_infra::projections::LedgerFilter;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new().route("/", get(list_ledger))
}

pub async fn list_ledger(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::LedgerQuery>,
) -> axum::response::Response {
    let variant_id = match &query.variant {
        Some(s) => match s.parse::<VariantId>() {
            Ok(v) => Some(v),
            Err(_) => {
                return errors::json_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_id",
                    "invalid variant id",
                );
            }
        },
        None => None,
    };
    let warehouse_id = match &query.warehouse {
        Some(s) => match s.parse::<WarehouseId>() {
            Ok(v) => Some(v),
            Err(_) => {
                return errors::json_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_id",
                    "invalid warehouse id",
                );
            }
        },
        None => None,
    };

    let rows = services.reports().ledger(LedgerFilter {
        variant_id,
        warehouse_id,
        from: query.from,
        to: query.to,
    });

    let items: Vec<serde_json::Value> = rows.into_iter().map(dto::movement_row_to_json).collect();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}
