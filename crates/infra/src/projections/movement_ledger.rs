use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use stocklot_core::{AggregateId, BatchId, UserId, VariantId, WarehouseId};
use stocklot_events::EventEnvelope;
use stocklot_stock::{MovementKind, StockEvent};

use crate::read_model::ReadModelStore;

/// One entry of the batch-resolution movement ledger.
///
/// Only lot-touching movements (purchases and sales) appear here;
/// adjustments and transfers are batch-agnostic and live solely in the
/// live stock log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementRow {
    pub event_id: Uuid,
    pub sequence_number: u64,
    pub occurred_at: DateTime<Utc>,
    pub warehouse_id: WarehouseId,
    pub variant_id: VariantId,
    pub batch_id: BatchId,
    pub kind: MovementKind,
    /// Signed quantity change (+ purchase, − sale).
    pub quantity_change: i64,
    /// Post-movement quantity for this (warehouse, variant, batch) key.
    pub running_balance: i64,
    /// Cost per unit at the time of the movement, minor units.
    pub unit_cost: i64,
    /// Signed valuation of the movement (unit_cost × quantity_change).
    pub total_value: i64,
    pub reason: String,
    pub recorded_by: UserId,
}

/// Filter for ledger listings.
#[derive(Debug, Clone, Copy, Default)]
pub struct LedgerFilter {
    pub variant_id: Option<VariantId>,
    pub warehouse_id: Option<WarehouseId>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl LedgerFilter {
    fn matches(&self, row: &MovementRow) -> bool {
        if let Some(v) = self.variant_id {
            if row.variant_id != v {
                return false;
            }
        }
        if let Some(w) = self.warehouse_id {
            if row.warehouse_id != w {
                return false;
            }
        }
        if let Some(from) = self.from {
            if row.occurred_at < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if row.occurred_at > to {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Error)]
pub enum MovementLedgerError {
    #[error("failed to deserialize stock event: {0}")]
    Deserialize(String),

    #[error("envelope does not match event contents: {0}")]
    EnvelopeMismatch(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error("running balance mismatch for key (expected {expected}, found {found})")]
    RunningBalance { expected: i64, found: i64 },
}

/// Movement ledger projection.
///
/// Verifies on apply that each entry's running balance equals the previous
/// balance for its (warehouse, variant, batch) key plus the quantity change:
/// the ledger invariant from the write model, re-checked at the read side.
#[derive(Debug)]
pub struct MovementLedgerProjection<S>
where
    S: ReadModelStore<Uuid, MovementRow>,
{
    store: S,
    cursors: RwLock<HashMap<AggregateId, u64>>,
    balances: RwLock<HashMap<(WarehouseId, VariantId, BatchId), i64>>,
}

impl<S> MovementLedgerProjection<S>
where
    S: ReadModelStore<Uuid, MovementRow>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
            balances: RwLock::new(HashMap::new()),
        }
    }

    /// Ledger listing, newest first.
    pub fn query(&self, filter: LedgerFilter) -> Vec<MovementRow> {
        let mut rows: Vec<MovementRow> = self
            .store
            .list()
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect();
        rows.sort_by(|a, b| {
            b.occurred_at
                .cmp(&a.occurred_at)
                .then(b.sequence_number.cmp(&a.sequence_number))
        });
        rows
    }

    /// All rows for one (warehouse, variant, batch) key, oldest first
    /// (the order used for balance reconstruction).
    pub fn key_rows_ascending(
        &self,
        warehouse_id: WarehouseId,
        variant_id: VariantId,
        batch_id: BatchId,
    ) -> Vec<MovementRow> {
        let mut rows: Vec<MovementRow> = self
            .store
            .list()
            .into_iter()
            .filter(|r| {
                r.warehouse_id == warehouse_id
                    && r.variant_id == variant_id
                    && r.batch_id == batch_id
            })
            .collect();
        rows.sort_by(|a, b| {
            a.occurred_at
                .cmp(&b.occurred_at)
                .then(a.sequence_number.cmp(&b.sequence_number))
        });
        rows
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

    fn record(
        &self,
        key: (WarehouseId, VariantId, BatchId),
        row: MovementRow,
    ) -> Result<(), MovementLedgerError> {
        let mut balances = self
            .balances
            .write()
            .map_err(|_| MovementLedgerError::Deserialize("balance lock poisoned".to_string()))?;

        let previous = balances.get(&key).copied().unwrap_or(0);
        let expected = previous + row.quantity_change;
        if expected != row.running_balance {
            return Err(MovementLedgerError::RunningBalance {
                expected,
                found: row.running_balance,
            });
        }

        balances.insert(key, row.running_balance);
        self.store.upsert(row.event_id, row);
        Ok(())
    }

    /// Apply a published envelope into the ledger.
    ///
    /// - Enforces monotonic sequence per aggregate stream
    /// - Idempotent for at-least-once delivery (replays <= cursor are ignored)
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), MovementLedgerError> {
        if envelope.aggregate_type() != "stock.variant" {
            return Ok(());
        }

        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();
        let last = self.cursor(aggregate_id);

        if seq == 0 {
            return Err(MovementLedgerError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(());
        }
        if seq != last + 1 && last != 0 {
            return Err(MovementLedgerError::NonMonotonicSequence { last, found: seq });
        }

        let event: StockEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| MovementLedgerError::Deserialize(e.to_string()))?;

        match &event {
            StockEvent::StockReceived(e) => {
                ensure_stream(envelope, e.variant_id)?;
                self.record(
                    (e.warehouse_id, e.variant_id, e.batch_id),
                    MovementRow {
                        event_id: envelope.event_id(),
                        sequence_number: seq,
                        occurred_at: e.occurred_at,
                        warehouse_id: e.warehouse_id,
                        variant_id: e.variant_id,
                        batch_id: e.batch_id,
                        kind: MovementKind::Purchase,
                        quantity_change: e.quantity,
                        running_balance: e.warehouse_batch_quantity_after,
                        unit_cost: e.unit_cost,
                        total_value: e.unit_cost * e.quantity,
                        reason: e.reason.clone(),
                        recorded_by: e.recorded_by,
                    },
                )?;
            }
            StockEvent::SaleRecorded(e) => {
                ensure_stream(envelope, e.variant_id)?;
                self.record(
                    (e.warehouse_id, e.variant_id, e.batch_id),
                    MovementRow {
                        event_id: envelope.event_id(),
                        sequence_number: seq,
                        occurred_at: e.occurred_at,
                        warehouse_id: e.warehouse_id,
                        variant_id: e.variant_id,
                        batch_id: e.batch_id,
                        kind: MovementKind::Sale,
                        quantity_change: -e.quantity,
                        running_balance: e.warehouse_batch_quantity_after,
                        unit_cost: e.unit_cost,
                        total_value: -(e.unit_cost * e.quantity),
                        reason: e.reason.clone(),
                        recorded_by: e.recorded_by,
                    },
                )?;
            }
            // Batch-agnostic movements never reach the movement ledger.
            StockEvent::StockAdjusted(_) | StockEvent::StockTransferred(_) => {}
        }

        self.update_cursor(aggregate_id, seq);
        Ok(())
    }

    /// Rebuild the read model from scratch.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), MovementLedgerError> {
        self.store.clear();
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.clear();
        }
        if let Ok(mut balances) = self.balances.write() {
            balances.clear();
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
) -> Result<(), MovementLedgerError> {
    if AggregateId::from(variant_id) != envelope.aggregate_id() {
        return Err(MovementLedgerError::EnvelopeMismatch(
            "event variant_id does not match envelope aggregate_id".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_model::InMemoryReadModelStore;
    use chrono::{NaiveDate, Utc};
    use std::sync::Arc;
    use stocklot_stock::{SaleRecorded, StockReceived};

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
        quantity: i64,
        after: i64,
        unit_cost: i64,
    ) -> StockEvent {
        StockEvent::StockReceived(StockReceived {
            variant_id,
            warehouse_id,
            batch_id,
            batch_number: "B1".to_string(),
            expiry: NaiveDate::from_ymd_opt(2027, 3, 31).unwrap(),
            unit_cost,
            quantity,
            batch_quantity_after: after,
            warehouse_batch_quantity_after: after,
            reason: "grn".to_string(),
            reference: None,
            recorded_by: UserId::new(),
            occurred_at: Utc::now(),
        })
    }

    fn setup() -> MovementLedgerProjection<Arc<InMemoryReadModelStore<Uuid, MovementRow>>> {
        MovementLedgerProjection::new(Arc::new(InMemoryReadModelStore::new()))
    }

    #[test]
    fn purchase_and_sale_build_consistent_running_balances() {
        let proj = setup();
        let variant_id = VariantId::new();
        let warehouse_id = WarehouseId::new();
        let batch_id = BatchId::new();

        proj.apply_envelope(&make_envelope(
            variant_id,
            1,
            received(variant_id, warehouse_id, batch_id, 100, 100, 10),
        ))
        .unwrap();

        proj.apply_envelope(&make_envelope(
            variant_id,
            2,
            StockEvent::SaleRecorded(SaleRecorded {
                variant_id,
                warehouse_id,
                batch_id,
                batch_number: "B1".to_string(),
                quantity: 20,
                unit_cost: 10,
                batch_quantity_after: 80,
                warehouse_batch_quantity_after: 80,
                reason: "order".to_string(),
                reference: None,
                recorded_by: UserId::new(),
                occurred_at: Utc::now(),
            }),
        ))
        .unwrap();

        let rows = proj.key_rows_ascending(warehouse_id, variant_id, batch_id);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].kind, MovementKind::Purchase);
        assert_eq!(rows[0].running_balance, 100);
        assert_eq!(rows[0].total_value, 1000);
        assert_eq!(rows[1].kind, MovementKind::Sale);
        assert_eq!(rows[1].quantity_change, -20);
        assert_eq!(rows[1].running_balance, 80);
        assert_eq!(rows[1].total_value, -200);
    }

    #[test]
    fn inconsistent_running_balance_is_rejected() {
        let proj = setup();
        let variant_id = VariantId::new();
        let warehouse_id = WarehouseId::new();
        let batch_id = BatchId::new();

        // Claims balance 50 after receiving 100 into an empty key.
        let err = proj
            .apply_envelope(&make_envelope(
                variant_id,
                1,
                received(variant_id, warehouse_id, batch_id, 100, 50, 10),
            ))
            .unwrap_err();

        assert!(matches!(
            err,
            MovementLedgerError::RunningBalance { expected: 100, found: 50 }
        ));
    }

    #[test]
    fn replayed_envelopes_are_ignored() {
        let proj = setup();
        let variant_id = VariantId::new();
        let warehouse_id = WarehouseId::new();
        let batch_id = BatchId::new();

        let env = make_envelope(
            variant_id,
            1,
            received(variant_id, warehouse_id, batch_id, 100, 100, 10),
        );
        proj.apply_envelope(&env).unwrap();
        proj.apply_envelope(&env).unwrap();

        assert_eq!(proj.query(LedgerFilter::default()).len(), 1);
    }

    #[test]
    fn query_filters_by_variant_and_orders_descending() {
        let proj = setup();
        let v1 = VariantId::new();
        let v2 = VariantId::new();
        let warehouse_id = WarehouseId::new();

        proj.apply_envelope(&make_envelope(
            v1,
            1,
            received(v1, warehouse_id, BatchId::new(), 10, 10, 5),
        ))
        .unwrap();
        proj.apply_envelope(&make_envelope(
            v1,
            2,
            received(v1, warehouse_id, BatchId::new(), 20, 20, 5),
        ))
        .unwrap();
        proj.apply_envelope(&make_envelope(
            v2,
            1,
            received(v2, warehouse_id, BatchId::new(), 30, 30, 5),
        ))
        .unwrap();

        let rows = proj.query(LedgerFilter {
            variant_id: Some(v1),
            ..Default::default()
        });
        assert_eq!(rows.len(), 2);
        assert!(rows[0].occurred_at >= rows[1].occurred_at);
    }
}
