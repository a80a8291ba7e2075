use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use stocklot_core::{VariantId, WarehouseId};
use stocklot_infra::operations::{
    AdjustStockRequest, InwardStockRequest, RecordSaleRequest, TransferStockRequest,
};
use stocklot_stock::MovementKind;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::ActorContext;

pub fn router() -> Router {
    Router::new()
        .route("/inward", post(inward_stock))
        .route("/adjust", post(adjust_stock))
        .route("/transfer", post(transfer_stock))
        .route("/sale", post(record_sale))
        .route("/current", get(current_stock))
}

fn parse_variant(s: &str) -> Result<VariantId, axum::response::Response> {
    s.parse()
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid variant id"))
}

fn parse_warehouse(s: &str) -> Result<WarehouseId, axum::response::Response> {
    s.parse().map_err(|_| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid warehouse id")
    })
}

fn outcome_response(outcome: stocklot_infra::operations::OperationOutcome) -> axum::response::Response {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "events_committed": outcome.events_committed,
            "stream_version": outcome.stream_version,
        })),
    )
        .into_response()
}

pub async fn inward_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Json(body): Json<dto::InwardStockBody>,
) -> axum::response::Response {
    let variant_id = match parse_variant(&body.variant_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let warehouse_id = match parse_warehouse(&body.warehouse_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let req = InwardStockRequest {
        variant_id,
        warehouse_id,
        batch_number: body.batch_number,
        expiry: body.expiry,
        unit_cost: body.unit_cost,
        quantity: body.quantity,
        reason: body.reason,
        hsn_code: body.hsn_code,
        tax_rate_bps: body.tax_rate_bps,
        reference: body.reference,
    };

    match services.inward_stock(actor.actor(), req) {
        Ok(outcome) => outcome_response(outcome),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn adjust_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Json(body): Json<dto::AdjustStockBody>,
) -> axum::response::Response {
    let variant_id = match parse_variant(&body.variant_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let warehouse_id = match parse_warehouse(&body.warehouse_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let kind = match body.kind.as_deref() {
        Some(s) => match errors::parse_movement_kind(s) {
            Ok(k) => k,
            Err(resp) => return resp,
        },
        None => MovementKind::Adjustment,
    };

    let req = AdjustStockRequest {
        variant_id,
        warehouse_id,
        delta: body.delta,
        kind,
        reason: body.reason,
        reference: body.reference,
    };

    match services.adjust_stock(actor.actor(), req) {
        Ok(outcome) => outcome_response(outcome),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn transfer_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Json(body): Json<dto::TransferStockBody>,
) -> axum::response::Response {
    let variant_id = match parse_variant(&body.variant_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let source_warehouse_id = match parse_warehouse(&body.source_warehouse_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let target_warehouse_id = match parse_warehouse(&body.target_warehouse_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let req = TransferStockRequest {
        variant_id,
        source_warehouse_id,
        target_warehouse_id,
        quantity: body.quantity,
        reason: body.reason,
        reference: body.reference,
    };

    match services.transfer_stock(actor.actor(), req) {
        Ok(outcome) => outcome_response(outcome),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn record_sale(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Json(body): Json<dto::RecordSaleBody>,
) -> axum::response::Response {
    let variant_id = match parse_variant(&body.variant_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let warehouse_id = match parse_warehouse(&body.warehouse_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let req = RecordSaleRequest {
        variant_id,
        warehouse_id,
        batch_number: body.batch_number,
        quantity: body.quantity,
        reason: body.reason,
        reference: body.reference,
    };

    match services.record_sale(actor.actor(), req) {
        Ok(outcome) => outcome_response(outcome),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn current_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::CurrentStockQuery>,
) -> axum::response::Response {
    let variant_id = match parse_variant(&query.variant) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let warehouse_id = match &query.warehouse {
        Some(w) => match parse_warehouse(w) {
            Ok(v) => Some(v),
            Err(resp) => return resp,
        },
        None => None,
    };

    let current = services.reports().current_stock(variant_id, warehouse_id);
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "variant_id": variant_id.to_string(),
            "current_stock": current,
        })),
    )
        .into_response()
}
