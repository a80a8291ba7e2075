//! Read-side reports, recomputed from the projections on every call.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use stocklot_catalog::{Variant, VariantDirectory};
use stocklot_core::{BatchId, VariantId, WarehouseId};

use crate::projections::live_stock::LiveStockKey;
use crate::projections::{
    BatchLevel, LedgerFilter, LiveStockProjection, LiveStockRow, MovementLedgerProjection,
    MovementRow, StockLevelsProjection,
};
use crate::read_model::ReadModelStore;
use stocklot_stock::MovementKind;

/// A variant at or below its minimum stock level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LowStockAlert {
    pub variant: Variant,
    pub current_stock: i64,
}

/// Report queries over the three stock projections.
///
/// All reads are recomputed per call; reporting needs only read-committed
/// consistency and may run concurrently with writes.
pub struct Reports<MS, LS, BS>
where
    MS: ReadModelStore<Uuid, MovementRow>,
    LS: ReadModelStore<LiveStockKey, LiveStockRow>,
    BS: ReadModelStore<BatchId, BatchLevel>,
{
    movement_ledger: Arc<MovementLedgerProjection<MS>>,
    live_stock: Arc<LiveStockProjection<LS>>,
    stock_levels: Arc<StockLevelsProjection<BS>>,
    variants: Arc<dyn VariantDirectory>,
}

impl<MS, LS, BS> Reports<MS, LS, BS>
where
    MS: ReadModelStore<Uuid, MovementRow>,
    LS: ReadModelStore<LiveStockKey, LiveStockRow>,
    BS: ReadModelStore<BatchId, BatchLevel>,
{
    pub fn new(
        movement_ledger: Arc<MovementLedgerProjection<MS>>,
        live_stock: Arc<LiveStockProjection<LS>>,
        stock_levels: Arc<StockLevelsProjection<BS>>,
        variants: Arc<dyn VariantDirectory>,
    ) -> Self {
        Self {
            movement_ledger,
            live_stock,
            stock_levels,
            variants,
        }
    }

    /// Movement ledger listing, newest first.
    pub fn ledger(&self, filter: LedgerFilter) -> Vec<MovementRow> {
        self.movement_ledger.query(filter)
    }

    /// Inventory asset value: Σ(quantity × unit cost) over all
    /// warehouse-batch stock rows.
    pub fn asset_value(&self) -> i64 {
        self.stock_levels.asset_value()
    }

    /// Cost of goods sold: Σ|total value| of SALE movements in the range.
    pub fn cogs(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
        self.movement_ledger
            .query(LedgerFilter {
                from: Some(from),
                to: Some(to),
                ..Default::default()
            })
            .into_iter()
            .filter(|r| r.kind == MovementKind::Sale)
            .map(|r| r.total_value.abs())
            .sum()
    }

    /// Lots with stock on hand expiring within `threshold_days` of today,
    /// boundaries inclusive, soonest first.
    pub fn expiring_batches(&self, threshold_days: u64) -> Vec<BatchLevel> {
        self.stock_levels
            .expiring(Utc::now().date_naive(), threshold_days)
    }

    /// Variants whose aggregate stock is at or below their minimum stock
    /// level (boundary inclusive), lowest stock first.
    pub fn low_stock_variants(&self) -> Vec<LowStockAlert> {
        let mut alerts: Vec<LowStockAlert> = self
            .variants
            .list()
            .into_iter()
            .filter_map(|variant| {
                let current_stock = self.live_stock.current_stock(variant.id, None);
                (current_stock <= variant.min_stock_level).then_some(LowStockAlert {
                    variant,
                    current_stock,
                })
            })
            .collect();
        alerts.sort_by_key(|a| a.current_stock);
        alerts
    }

    /// Current aggregate stock for a variant, across all warehouses or in one.
    pub fn current_stock(&self, variant_id: VariantId, warehouse_id: Option<WarehouseId>) -> i64 {
        self.live_stock.current_stock(variant_id, warehouse_id)
    }
}
