use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{Days, NaiveDate};
use serde_json::Value as JsonValue;
use thiserror::Error;

use stocklot_core::{AggregateId, BatchId, VariantId, WarehouseId};
use stocklot_events::EventEnvelope;
use stocklot_stock::{StockEvent, StockReceived};

use crate::read_model::ReadModelStore;

/// Read model: one lot with its per-warehouse quantities.
///
/// Drives the valuation and expiry reports. The invariant from the write
/// model carries over: `current_quantity` equals the sum of
/// `by_warehouse` values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchLevel {
    pub batch_id: BatchId,
    pub variant_id: VariantId,
    pub batch_number: String,
    pub expiry: NaiveDate,
    /// Latest acquisition cost per unit, minor units (last receipt wins).
    pub unit_cost: i64,
    pub initial_quantity: i64,
    pub current_quantity: i64,
    pub by_warehouse: HashMap<WarehouseId, i64>,
}

impl BatchLevel {
    fn from_receipt(e: &StockReceived) -> Self {
        let mut by_warehouse = HashMap::new();
        by_warehouse.insert(e.warehouse_id, e.quantity);
        Self {
            batch_id: e.batch_id,
            variant_id: e.variant_id,
            batch_number: e.batch_number.clone(),
            expiry: e.expiry,
            unit_cost: e.unit_cost,
            initial_quantity: e.quantity,
            current_quantity: e.quantity,
            by_warehouse,
        }
    }
}

#[derive(Debug, Error)]
pub enum StockLevelsError {
    #[error("failed to deserialize stock event: {0}")]
    Deserialize(String),

    #[error("envelope does not match event contents: {0}")]
    EnvelopeMismatch(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Batch registry + warehouse-batch stock projection.
///
/// Receipts and sales maintain lot quantities; adjustments and transfers do
/// not appear here at all (they are aggregate-only movements).
#[derive(Debug)]
pub struct StockLevelsProjection<S>
where
    S: ReadModelStore<BatchId, BatchLevel>,
{
    store: S,
    cursors: RwLock<HashMap<AggregateId, u64>>,
}

impl<S> StockLevelsProjection<S>
where
    S: ReadModelStore<BatchId, BatchLevel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, batch_id: &BatchId) -> Option<BatchLevel> {
        self.store.get(batch_id)
    }

    pub fn list(&self) -> Vec<BatchLevel> {
        self.store.list()
    }

    /// Inventory asset value: Σ(quantity × unit cost) over every
    /// warehouse-batch stock row.
    pub fn asset_value(&self) -> i64 {
        self.store
            .list()
            .into_iter()
            .map(|b| {
                let held: i64 = b.by_warehouse.values().sum();
                held * b.unit_cost
            })
            .sum()
    }

    /// Lots with stock on hand expiring within `[today, today + threshold_days]`,
    /// boundaries inclusive.
    pub fn expiring(&self, today: NaiveDate, threshold_days: u64) -> Vec<BatchLevel> {
        let horizon = today
            .checked_add_days(Days::new(threshold_days))
            .unwrap_or(NaiveDate::MAX);
        let mut batches: Vec<BatchLevel> = self
            .store
            .list()
            .into_iter()
            .filter(|b| b.current_quantity > 0 && b.expiry >= today && b.expiry <= horizon)
            .collect();
        batches.sort_by(|a, b| a.expiry.cmp(&b.expiry));
        batches
    }

    fn cursor(&self, aggregate_id: AggregateId) -> u64 {
        match self.cursors.read() {
            Ok(cursors) => cursors.get(&aggregate_id).copied().unwrap_or(0),
            Err(_) => 0,
        }
    }

    fn update_cursor(&self, aggregate_id: AggregateId, sequence_number: u64) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.insert(aggregate_id, sequence_number);
        }
    }

    /// Apply a published envelope into the stock levels.
    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), StockLevelsError> {
        if envelope.aggregate_type() != "stock.variant" {
            return Ok(());
        }

        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();
        let last = self.cursor(aggregate_id);

        if seq == 0 {
            return Err(StockLevelsError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(());
        }
        if seq != last + 1 && last != 0 {
            return Err(StockLevelsError::NonMonotonicSequence { last, found: seq });
        }

        let event: StockEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| StockLevelsError::Deserialize(e.to_string()))?;

        match &event {
            StockEvent::StockReceived(e) => {
                ensure_stream(envelope, e.variant_id)?;
                match self.store.get(&e.batch_id) {
                    Some(mut level) => {
                        level.initial_quantity += e.quantity;
                        level.current_quantity += e.quantity;
                        level.unit_cost = e.unit_cost;
                        level.expiry = e.expiry;
                        *level.by_warehouse.entry(e.warehouse_id).or_insert(0) += e.quantity;
                        self.store.upsert(e.batch_id, level);
                    }
                    None => {
                        self.store.upsert(e.batch_id, BatchLevel::from_receipt(e));
                    }
                }
            }
            StockEvent::SaleRecorded(e) => {
                ensure_stream(envelope, e.variant_id)?;
                if let Some(mut level) = self.store.get(&e.batch_id) {
                    level.current_quantity -= e.quantity;
                    *level.by_warehouse.entry(e.warehouse_id).or_insert(0) -= e.quantity;
                    self.store.upsert(e.batch_id, level);
                }
            }
            // Aggregate-only movements never touch lot quantities.
            StockEvent::StockAdjusted(_) | StockEvent::StockTransferred(_) => {}
        }

        self.update_cursor(aggregate_id, seq);
        Ok(())
    }

    /// Rebuild the read model from scratch.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), StockLevelsError> {
        self.store.clear();
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.clear();
        }

        let mut envs: Vec<_> = envelopes.into_iter().collect();
        envs.sort_by_key(|e| (*e.aggregate_id().as_uuid().as_bytes(), e.sequence_number()));

        for env in &envs {
            self.apply_envelope(env)?;
        }

        Ok(())
    }
}

fn ensure_stream(
    envelope: &EventEnvelope<JsonValue>,
    variant_id: VariantId,
) -> Result<(), StockLevelsError> {
    if AggregateId::from(variant_id) != envelope.aggregate_id() {
        return Err(StockLevelsError::EnvelopeMismatch(
            "event variant_id does not match envelope aggregate_id".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_model::InMemoryReadModelStore;
    use chrono::Utc;
    use std::sync::Arc;
    use stocklot_core::UserId;
    use uuid::Uuid;

    fn make_envelope(variant_id: VariantId, seq: u64, event: StockEvent) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            AggregateId::from(variant_id),
            "stock.variant".to_string(),
            seq,
            UserId::new(),
            serde_json::to_value(&event).unwrap(),
        )
    }

    fn received(
        variant_id: VariantId,
        warehouse_id: WarehouseId,
        batch_id: BatchId,
        expiry: NaiveDate,
        unit_cost: i64,
        quantity: i64,
        batch_after: i64,
        warehouse_after: i64,
    ) -> StockEvent {
        StockEvent::StockReceived(StockReceived {
            variant_id,
            warehouse_id,
            batch_id,
            batch_number: "B1".to_string(),
            expiry,
            unit_cost,
            quantity,
            batch_quantity_after: batch_after,
            warehouse_batch_quantity_after: warehouse_after,
            reason: "grn".to_string(),
            reference: None,
            recorded_by: UserId::new(),
            occurred_at: Utc::now(),
        })
    }

    fn setup() -> StockLevelsProjection<Arc<InMemoryReadModelStore<BatchId, BatchLevel>>> {
        StockLevelsProjection::new(Arc::new(InMemoryReadModelStore::new()))
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn asset_value_sums_quantity_times_cost_across_warehouses() {
        let proj = setup();
        let variant_id = VariantId::new();
        let batch_id = BatchId::new();
        let w1 = WarehouseId::new();
        let w2 = WarehouseId::new();

        proj.apply_envelope(&make_envelope(
            variant_id,
            1,
            received(variant_id, w1, batch_id, date(2027, 3, 31), 10, 100, 100, 100),
        ))
        .unwrap();
        proj.apply_envelope(&make_envelope(
            variant_id,
            2,
            received(variant_id, w2, batch_id, date(2027, 3, 31), 10, 50, 150, 50),
        ))
        .unwrap();

        assert_eq!(proj.asset_value(), 150 * 10);

        let level = proj.get(&batch_id).unwrap();
        let summed: i64 = level.by_warehouse.values().sum();
        assert_eq!(level.current_quantity, summed);
    }

    #[test]
    fn expiring_is_boundary_inclusive_and_skips_empty_lots() {
        let proj = setup();
        let variant_id = VariantId::new();
        let warehouse_id = WarehouseId::new();
        let today = date(2026, 8, 7);

        let in_window = BatchId::new();
        let beyond = BatchId::new();

        proj.apply_envelope(&make_envelope(
            variant_id,
            1,
            received(
                variant_id,
                warehouse_id,
                in_window,
                today.checked_add_days(Days::new(89)).unwrap(),
                10,
                5,
                5,
                5,
            ),
        ))
        .unwrap();
        proj.apply_envelope(&make_envelope(
            variant_id,
            2,
            received(
                variant_id,
                warehouse_id,
                beyond,
                today.checked_add_days(Days::new(91)).unwrap(),
                10,
                5,
                5,
                5,
            ),
        ))
        .unwrap();

        let expiring = proj.expiring(today, 90);
        assert_eq!(expiring.len(), 1);
        assert_eq!(expiring[0].batch_id, in_window);
    }
}
