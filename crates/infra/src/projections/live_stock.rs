use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use stocklot_core::{AggregateId, UserId, VariantId, WarehouseId};
use stocklot_events::EventEnvelope;
use stocklot_stock::{MovementKind, StockEvent};

use crate::read_model::ReadModelStore;

/// One entry of the batch-agnostic live stock log.
///
/// "Current stock" for a variant (optionally per warehouse) is the sum of
/// matching deltas. Transfers contribute two entries (one per leg) derived
/// from a single transfer event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveStockRow {
    pub variant_id: VariantId,
    pub warehouse_id: WarehouseId,
    /// Signed quantity change.
    pub delta: i64,
    pub kind: MovementKind,
    pub reason: String,
    /// Client-supplied idempotency/correlation reference, if any.
    pub reference: Option<Uuid>,
    pub recorded_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Row key: source event id plus leg index (transfers produce two legs).
pub type LiveStockKey = (Uuid, u8);

#[derive(Debug, Error)]
pub enum LiveStockError {
    #[error("failed to deserialize stock event: {0}")]
    Deserialize(String),

    #[error("envelope does not match event contents: {0}")]
    EnvelopeMismatch(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Live stock projection: append-only signed deltas per (variant, warehouse).
#[derive(Debug)]
pub struct LiveStockProjection<S>
where
    S: ReadModelStore<LiveStockKey, LiveStockRow>,
{
    store: S,
    cursors: RwLock<HashMap<AggregateId, u64>>,
}

impl<S> LiveStockProjection<S>
where
    S: ReadModelStore<LiveStockKey, LiveStockRow>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    /// Current stock of a variant, across all warehouses or in one.
    pub fn current_stock(&self, variant_id: VariantId, warehouse_id: Option<WarehouseId>) -> i64 {
        self.store
            .list()
            .into_iter()
            .filter(|r| r.variant_id == variant_id)
            .filter(|r| warehouse_id.map(|w| r.warehouse_id == w).unwrap_or(true))
            .map(|r| r.delta)
            .sum()
    }

    /// Log entries for a variant, newest first.
    pub fn entries(&self, variant_id: VariantId) -> Vec<LiveStockRow> {
        let mut rows: Vec<LiveStockRow> = self
            .store
            .list()
            .into_iter()
            .filter(|r| r.variant_id == variant_id)
            .collect();
        rows.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
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

    /// Apply a published envelope into the live stock log.
    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), LiveStockError> {
        if envelope.aggregate_type() != "stock.variant" {
            return Ok(());
        }

        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();
        let last = self.cursor(aggregate_id);

        if seq == 0 {
            return Err(LiveStockError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(());
        }
        if seq != last + 1 && last != 0 {
            return Err(LiveStockError::NonMonotonicSequence { last, found: seq });
        }

        let event: StockEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| LiveStockError::Deserialize(e.to_string()))?;

        let event_id = envelope.event_id();
        match &event {
            StockEvent::StockReceived(e) => {
                ensure_stream(envelope, e.variant_id)?;
                self.store.upsert(
                    (event_id, 0),
                    LiveStockRow {
                        variant_id: e.variant_id,
                        warehouse_id: e.warehouse_id,
                        delta: e.quantity,
                        kind: MovementKind::Purchase,
                        reason: e.reason.clone(),
                        reference: e.reference,
                        recorded_by: e.recorded_by,
                        occurred_at: e.occurred_at,
                    },
                );
            }
            StockEvent::StockAdjusted(e) => {
                ensure_stream(envelope, e.variant_id)?;
                self.store.upsert(
                    (event_id, 0),
                    LiveStockRow {
                        variant_id: e.variant_id,
                        warehouse_id: e.warehouse_id,
                        delta: e.delta,
                        kind: e.kind,
                        reason: e.reason.clone(),
                        reference: e.reference,
                        recorded_by: e.recorded_by,
                        occurred_at: e.occurred_at,
                    },
                );
            }
            StockEvent::StockTransferred(e) => {
                ensure_stream(envelope, e.variant_id)?;
                self.store.upsert(
                    (event_id, 0),
                    LiveStockRow {
                        variant_id: e.variant_id,
                        warehouse_id: e.source_warehouse_id,
                        delta: -e.quantity,
                        kind: MovementKind::TransferOut,
                        reason: e.reason.clone(),
                        reference: e.reference,
                        recorded_by: e.recorded_by,
                        occurred_at: e.occurred_at,
                    },
                );
                self.store.upsert(
                    (event_id, 1),
                    LiveStockRow {
                        variant_id: e.variant_id,
                        warehouse_id: e.target_warehouse_id,
                        delta: e.quantity,
                        kind: MovementKind::TransferIn,
                        reason: e.reason.clone(),
                        reference: e.reference,
                        recorded_by: e.recorded_by,
                        occurred_at: e.occurred_at,
                    },
                );
            }
            StockEvent::SaleRecorded(e) => {
                ensure_stream(envelope, e.variant_id)?;
                self.store.upsert(
                    (event_id, 0),
                    LiveStockRow {
                        variant_id: e.variant_id,
                        warehouse_id: e.warehouse_id,
                        delta: -e.quantity,
                        kind: MovementKind::Sale,
                        reason: e.reason.clone(),
                        reference: e.reference,
                        recorded_by: e.recorded_by,
                        occurred_at: e.occurred_at,
                    },
                );
            }
        }

        self.update_cursor(aggregate_id, seq);
        Ok(())
    }

    /// Rebuild the read model from scratch.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), LiveStockError> {
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
) -> Result<(), LiveStockError> {
    if AggregateId::from(variant_id) != envelope.aggregate_id() {
        return Err(LiveStockError::EnvelopeMismatch(
            "event variant_id does not match envelope aggregate_id".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_model::InMemoryReadModelStore;
    use std::sync::Arc;
    use stocklot_stock::StockTransferred;

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

    #[test]
    fn transfer_produces_two_legs_that_cancel_out() {
        let proj =
            LiveStockProjection::new(Arc::new(InMemoryReadModelStore::<LiveStockKey, LiveStockRow>::new()));
        let variant_id = VariantId::new();
        let w1 = WarehouseId::new();
        let w2 = WarehouseId::new();

        proj.apply_envelope(&make_envelope(
            variant_id,
            1,
            StockEvent::StockTransferred(StockTransferred {
                variant_id,
                source_warehouse_id: w1,
                target_warehouse_id: w2,
                quantity: 30,
                reason: "rebalance".to_string(),
                reference: None,
                recorded_by: UserId::new(),
                occurred_at: Utc::now(),
            }),
        ))
        .unwrap();

        assert_eq!(proj.current_stock(variant_id, Some(w1)), -30);
        assert_eq!(proj.current_stock(variant_id, Some(w2)), 30);
        // Batch-agnostic: the variant total is untouched by a transfer.
        assert_eq!(proj.current_stock(variant_id, None), 0);

        let entries = proj.entries(variant_id);
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|r| r.kind == MovementKind::TransferOut));
        assert!(entries.iter().any(|r| r.kind == MovementKind::TransferIn));
    }
}
