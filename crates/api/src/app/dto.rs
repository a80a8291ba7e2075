use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use stocklot_infra::projections::{BatchLevel, MovementRow};
use stocklot_infra::reports::LowStockAlert;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct InwardStockBody {
    pub variant_id: String,
    pub warehouse_id: String,
    pub batch_number: String,
    pub expiry: NaiveDate,
    pub unit_cost: i64,
    pub quantity: i64,
    pub reason: String,
    pub hsn_code: Option<String>,
    pub tax_rate_bps: Option<u32>,
    pub reference: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct AdjustStockBody {
    pub variant_id: String,
    pub warehouse_id: String,
    pub delta: i64,
    /// Movement kind recorded in the live stock log; defaults to
    /// "adjustment".
    pub kind: Option<String>,
    pub reason: String,
    pub reference: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct TransferStockBody {
    pub variant_id: String,
    pub source_warehouse_id: String,
    pub target_warehouse_id: String,
    pub quantity: i64,
    pub reason: String,
    pub reference: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct RecordSaleBody {
    pub variant_id: String,
    pub warehouse_id: String,
    pub batch_number: String,
    pub quantity: i64,
    pub reason: String,
    pub reference: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct LedgerQuery {
    pub variant: Option<String>,
    pub warehouse: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct CurrentStockQuery {
    pub variant: String,
    pub warehouse: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CogsQuery {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ExpiringQuery {
    pub days: u64,
}

// -------------------------
// Response JSON
// -------------------------

pub fn movement_row_to_json(row: MovementRow) -> serde_json::Value {
    json!({
        "event_id": row.event_id.to_string(),
        "occurred_at": row.occurred_at.to_rfc3339(),
        "warehouse_id": row.warehouse_id.to_string(),
        "variant_id": row.variant_id.to_string(),
        "batch_id": row.batch_id.to_string(),
        "kind": row.kind.as_str(),
        "quantity_change": row.quantity_change,
        "running_balance": row.running_balance,
        "unit_cost": row.unit_cost,
        "total_value": row.total_value,
        "reason": row.reason,
        "recorded_by": row.recorded_by.to_string(),
    })
}

pub fn batch_level_to_json(level: BatchLevel) -> serde_json::Value {
    let by_warehouse: Vec<serde_json::Value> = level
        .by_warehouse
        .iter()
        .map(|(warehouse_id, quantity)| {
            json!({
                "warehouse_id": warehouse_id.to_string(),
                "quantity": quantity,
            })
        })
        .collect();

    json!({
        "batch_id": level.batch_id.to_string(),
        "variant_id": level.variant_id.to_string(),
        "batch_number": level.batch_number,
        "expiry": level.expiry.to_string(),
        "unit_cost": level.unit_cost,
        "initial_quantity": level.initial_quantity,
        "current_quantity": level.current_quantity,
        "by_warehouse": by_warehouse,
    })
}

pub fn low_stock_to_json(alert: LowStockAlert) -> serde_json::Value {
    json!({
        "variant_id": alert.variant.id.to_string(),
        "sku": alert.variant.sku,
        "min_stock_level": alert.variant.min_stock_level,
        "reorder_quantity": alert.variant.reorder_quantity,
        "current_stock": alert.current_stock,
    })
}
