use std::collections::{HashMap, HashSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stocklot_core::{Aggregate, AggregateRoot, BatchId, DomainError, UserId, VariantId, WarehouseId};
use stocklot_events::Event;

use crate::batch::Batch;
use crate::movement::MovementKind;

/// Aggregate root: all stock of one variant.
///
/// Holds three levels of bookkeeping:
/// - the batch registry (per-variant lots, keyed by batch number),
/// - per-(warehouse, batch) quantities,
/// - per-warehouse aggregate stock (the batch-agnostic "live" view).
///
/// Receipts and sales touch all three; adjustments and transfers touch only
/// the aggregate view. Batch-summed and aggregate stock can therefore
/// diverge after an adjustment or transfer. That is the documented contract,
/// not an accident.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantStock {
    id: VariantId,
    batches: HashMap<String, Batch>,
    warehouse_batch: HashMap<(WarehouseId, BatchId), i64>,
    live: HashMap<WarehouseId, i64>,
    applied_refs: HashSet<Uuid>,
    version: u64,
}

impl VariantStock {
    /// Create an empty aggregate instance for rehydration.
    pub fn empty(id: VariantId) -> Self {
        Self {
            id,
            batches: HashMap::new(),
            warehouse_batch: HashMap::new(),
            live: HashMap::new(),
            applied_refs: HashSet::new(),
            version: 0,
        }
    }

    pub fn id_typed(&self) -> VariantId {
        self.id
    }

    /// Lot for a batch number, if received before.
    pub fn batch(&self, batch_number: &str) -> Option<&Batch> {
        self.batches.get(batch_number)
    }

    pub fn batches(&self) -> impl Iterator<Item = &Batch> {
        self.batches.values()
    }

    /// Quantity of one batch held in one warehouse.
    pub fn warehouse_batch_quantity(&self, warehouse_id: WarehouseId, batch_id: BatchId) -> i64 {
        self.warehouse_batch
            .get(&(warehouse_id, batch_id))
            .copied()
            .unwrap_or(0)
    }

    /// Aggregate (batch-agnostic) stock in one warehouse.
    pub fn live_stock(&self, warehouse_id: WarehouseId) -> i64 {
        self.live.get(&warehouse_id).copied().unwrap_or(0)
    }

    /// Aggregate stock across all warehouses.
    pub fn total_live_stock(&self) -> i64 {
        self.live.values().sum()
    }
}

impl AggregateRoot for VariantStock {
    type Id = VariantId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: receive a costed, dated lot into a warehouse (inward).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveStock {
    pub variant_id: VariantId,
    pub warehouse_id: WarehouseId,
    /// Used only when this batch number has not been seen before; an
    /// existing lot keeps its id.
    pub batch_id: BatchId,
    pub batch_number: String,
    pub expiry: NaiveDate,
    pub unit_cost: i64,
    pub quantity: i64,
    pub reason: String,
    pub reference: Option<Uuid>,
    pub recorded_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: batch-agnostic quantity correction in one warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustStock {
    pub variant_id: VariantId,
    pub warehouse_id: WarehouseId,
    pub delta: i64,
    pub kind: MovementKind,
    pub reason: String,
    pub reference: Option<Uuid>,
    pub recorded_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: move aggregate stock between two warehouses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStock {
    pub variant_id: VariantId,
    pub source_warehouse_id: WarehouseId,
    pub target_warehouse_id: WarehouseId,
    pub quantity: i64,
    pub reason: String,
    pub reference: Option<Uuid>,
    pub recorded_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: consume stock from a specific lot at its current cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSale {
    pub variant_id: VariantId,
    pub warehouse_id: WarehouseId,
    pub batch_number: String,
    pub quantity: i64,
    pub reason: String,
    pub reference: Option<Uuid>,
    pub recorded_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockCommand {
    ReceiveStock(ReceiveStock),
    AdjustStock(AdjustStock),
    TransferStock(TransferStock),
    RecordSale(RecordSale),
}

/// Event: a lot was received into a warehouse.
///
/// Carries the post-update batch and warehouse-batch quantities so the
/// ledger projection can record running balances without replaying state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReceived {
    pub variant_id: VariantId,
    pub warehouse_id: WarehouseId,
    pub batch_id: BatchId,
    pub batch_number: String,
    pub expiry: NaiveDate,
    pub unit_cost: i64,
    pub quantity: i64,
    pub batch_quantity_after: i64,
    pub warehouse_batch_quantity_after: i64,
    pub reason: String,
    pub reference: Option<Uuid>,
    pub recorded_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: batch-agnostic quantity change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjusted {
    pub variant_id: VariantId,
    pub warehouse_id: WarehouseId,
    pub delta: i64,
    pub kind: MovementKind,
    pub reason: String,
    pub reference: Option<Uuid>,
    pub recorded_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: aggregate stock moved between warehouses (one atomic fact; the
/// ledger projection derives the out/in legs from it).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockTransferred {
    pub variant_id: VariantId,
    pub source_warehouse_id: WarehouseId,
    pub target_warehouse_id: WarehouseId,
    pub quantity: i64,
    pub reason: String,
    pub reference: Option<Uuid>,
    pub recorded_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: stock consumed from a lot, valued at the lot's current cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleRecorded {
    pub variant_id: VariantId,
    pub warehouse_id: WarehouseId,
    pub batch_id: BatchId,
    pub batch_number: String,
    pub quantity: i64,
    pub unit_cost: i64,
    pub batch_quantity_after: i64,
    pub warehouse_batch_quantity_after: i64,
    pub reason: String,
    pub reference: Option<Uuid>,
    pub recorded_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockEvent {
    StockReceived(StockReceived),
    StockAdjusted(StockAdjusted),
    StockTransferred(StockTransferred),
    SaleRecorded(SaleRecorded),
}

impl StockEvent {
    pub fn reference(&self) -> Option<Uuid> {
        match self {
            StockEvent::StockReceived(e) => e.reference,
            StockEvent::StockAdjusted(e) => e.reference,
            StockEvent::StockTransferred(e) => e.reference,
            StockEvent::SaleRecorded(e) => e.reference,
        }
    }
}

impl Event for StockEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockEvent::StockReceived(_) => "stock.variant.received",
            StockEvent::StockAdjusted(_) => "stock.variant.adjusted",
            StockEvent::StockTransferred(_) => "stock.variant.transferred",
            StockEvent::SaleRecorded(_) => "stock.variant.sale_recorded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockEvent::StockReceived(e) => e.occurred_at,
            StockEvent::StockAdjusted(e) => e.occurred_at,
            StockEvent::StockTransferred(e) => e.occurred_at,
            StockEvent::SaleRecorded(e) => e.occurred_at,
        }
    }
}

impl Aggregate for VariantStock {
    type Command = StockCommand;
    type Event = StockEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            StockEvent::StockReceived(e) => {
                match self.batches.get_mut(&e.batch_number) {
                    Some(batch) => batch.merge_receipt(e.expiry, e.unit_cost, e.quantity),
                    None => {
                        self.batches.insert(
                            e.batch_number.clone(),
                            Batch::new(e.batch_id, e.batch_number.clone(), e.expiry, e.unit_cost, e.quantity),
                        );
                    }
                }
                *self
                    .warehouse_batch
                    .entry((e.warehouse_id, e.batch_id))
                    .or_insert(0) += e.quantity;
                *self.live.entry(e.warehouse_id).or_insert(0) += e.quantity;
            }
            StockEvent::StockAdjusted(e) => {
                *self.live.entry(e.warehouse_id).or_insert(0) += e.delta;
            }
            StockEvent::StockTransferred(e) => {
                *self.live.entry(e.source_warehouse_id).or_insert(0) -= e.quantity;
                *self.live.entry(e.target_warehouse_id).or_insert(0) += e.quantity;
            }
            StockEvent::SaleRecorded(e) => {
                if let Some(batch) = self.batches.get_mut(&e.batch_number) {
                    batch.current_quantity -= e.quantity;
                }
                *self
                    .warehouse_batch
                    .entry((e.warehouse_id, e.batch_id))
                    .or_insert(0) -= e.quantity;
                *self.live.entry(e.warehouse_id).or_insert(0) -= e.quantity;
            }
        }

        if let Some(reference) = event.reference() {
            self.applied_refs.insert(reference);
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        if let Some(reference) = command_reference(command) {
            // Idempotent re-delivery: a reference we have already applied
            // produces no new events.
            if self.applied_refs.contains(&reference) {
                return Ok(vec![]);
            }
        }

        match command {
            StockCommand::ReceiveStock(cmd) => self.handle_receive(cmd),
            StockCommand::AdjustStock(cmd) => self.handle_adjust(cmd),
            StockCommand::TransferStock(cmd) => self.handle_transfer(cmd),
            StockCommand::RecordSale(cmd) => self.handle_sale(cmd),
        }
    }
}

fn command_reference(command: &StockCommand) -> Option<Uuid> {
    match command {
        StockCommand::ReceiveStock(c) => c.reference,
        StockCommand::AdjustStock(c) => c.reference,
        StockCommand::TransferStock(c) => c.reference,
        StockCommand::RecordSale(c) => c.reference,
    }
}

impl VariantStock {
    fn ensure_variant_id(&self, variant_id: VariantId) -> Result<(), DomainError> {
        if self.id != variant_id {
            return Err(DomainError::invariant("variant_id mismatch"));
        }
        Ok(())
    }

    fn ensure_reason(reason: &str) -> Result<(), DomainError> {
        if reason.trim().is_empty() {
            return Err(DomainError::validation("reason cannot be empty"));
        }
        Ok(())
    }

    fn handle_receive(&self, cmd: &ReceiveStock) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_variant_id(cmd.variant_id)?;
        Self::ensure_reason(&cmd.reason)?;

        if cmd.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        if cmd.unit_cost < 0 {
            return Err(DomainError::validation("unit cost cannot be negative"));
        }
        if cmd.batch_number.trim().is_empty() {
            return Err(DomainError::validation("batch number cannot be empty"));
        }

        // Merge into an existing lot under the same number; its id is stable.
        let (batch_id, batch_quantity_after) = match self.batches.get(&cmd.batch_number) {
            Some(batch) => (batch.id, batch.current_quantity + cmd.quantity),
            None => (cmd.batch_id, cmd.quantity),
        };

        let warehouse_batch_quantity_after =
            self.warehouse_batch_quantity(cmd.warehouse_id, batch_id) + cmd.quantity;

        Ok(vec![StockEvent::StockReceived(StockReceived {
            variant_id: cmd.variant_id,
            warehouse_id: cmd.warehouse_id,
            batch_id,
            batch_number: cmd.batch_number.clone(),
            expiry: cmd.expiry,
            unit_cost: cmd.unit_cost,
            quantity: cmd.quantity,
            batch_quantity_after,
            warehouse_batch_quantity_after,
            reason: cmd.reason.clone(),
            reference: cmd.reference,
            recorded_by: cmd.recorded_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_adjust(&self, cmd: &AdjustStock) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_variant_id(cmd.variant_id)?;
        Self::ensure_reason(&cmd.reason)?;

        if cmd.delta == 0 {
            return Err(DomainError::validation("delta cannot be zero"));
        }
        if cmd.kind.is_transfer() {
            return Err(DomainError::validation(
                "transfer movements must use the transfer operation",
            ));
        }

        let current = self.live_stock(cmd.warehouse_id);
        if current + cmd.delta < 0 {
            return Err(DomainError::insufficient_stock(format!(
                "adjustment of {} exceeds current stock {} in warehouse {}",
                cmd.delta, current, cmd.warehouse_id
            )));
        }

        Ok(vec![StockEvent::StockAdjusted(StockAdjusted {
            variant_id: cmd.variant_id,
            warehouse_id: cmd.warehouse_id,
            delta: cmd.delta,
            kind: cmd.kind,
            reason: cmd.reason.clone(),
            reference: cmd.reference,
            recorded_by: cmd.recorded_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_transfer(&self, cmd: &TransferStock) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_variant_id(cmd.variant_id)?;
        Self::ensure_reason(&cmd.reason)?;

        if cmd.source_warehouse_id == cmd.target_warehouse_id {
            return Err(DomainError::validation(
                "source and target warehouses must differ",
            ));
        }
        if cmd.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }

        let available = self.live_stock(cmd.source_warehouse_id);
        if available < cmd.quantity {
            return Err(DomainError::insufficient_stock(format!(
                "transfer of {} exceeds current stock {} in warehouse {}",
                cmd.quantity, available, cmd.source_warehouse_id
            )));
        }

        Ok(vec![StockEvent::StockTransferred(StockTransferred {
            variant_id: cmd.variant_id,
            source_warehouse_id: cmd.source_warehouse_id,
            target_warehouse_id: cmd.target_warehouse_id,
            quantity: cmd.quantity,
            reason: cmd.reason.clone(),
            reference: cmd.reference,
            recorded_by: cmd.recorded_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_sale(&self, cmd: &RecordSale) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_variant_id(cmd.variant_id)?;
        Self::ensure_reason(&cmd.reason)?;

        if cmd.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }

        let batch = self
            .batches
            .get(&cmd.batch_number)
            .ok_or(DomainError::NotFound)?;

        let held = self.warehouse_batch_quantity(cmd.warehouse_id, batch.id);
        if held < cmd.quantity {
            return Err(DomainError::insufficient_stock(format!(
                "sale of {} exceeds batch stock {} in warehouse {}",
                cmd.quantity, held, cmd.warehouse_id
            )));
        }

        Ok(vec![StockEvent::SaleRecorded(SaleRecorded {
            variant_id: cmd.variant_id,
            warehouse_id: cmd.warehouse_id,
            batch_id: batch.id,
            batch_number: cmd.batch_number.clone(),
            quantity: cmd.quantity,
            unit_cost: batch.unit_cost,
            batch_quantity_after: batch.current_quantity - cmd.quantity,
            warehouse_batch_quantity_after: held - cmd.quantity,
            reason: cmd.reason.clone(),
            reference: cmd.reference,
            recorded_by: cmd.recorded_by,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_variant_id() -> VariantId {
        VariantId::new()
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn expiry() -> NaiveDate {
        NaiveDate::from_ymd_opt(2027, 3, 31).unwrap()
    }

    fn receive_cmd(
        variant_id: VariantId,
        warehouse_id: WarehouseId,
        batch_number: &str,
        unit_cost: i64,
        quantity: i64,
    ) -> StockCommand {
        StockCommand::ReceiveStock(ReceiveStock {
            variant_id,
            warehouse_id,
            batch_id: BatchId::new(),
            batch_number: batch_number.to_string(),
            expiry: expiry(),
            unit_cost,
            quantity,
            reason: "grn".to_string(),
            reference: None,
            recorded_by: UserId::new(),
            occurred_at: test_time(),
        })
    }

    fn apply_all(agg: &mut VariantStock, events: Vec<StockEvent>) {
        for e in &events {
            agg.apply(e);
        }
    }

    #[test]
    fn receive_creates_batch_and_reports_running_balances() {
        let variant_id = test_variant_id();
        let warehouse = WarehouseId::new();
        let agg = VariantStock::empty(variant_id);

        let events = agg
            .handle(&receive_cmd(variant_id, warehouse, "B1", 1000, 100))
            .unwrap();
        assert_eq!(events.len(), 1);

        match &events[0] {
            StockEvent::StockReceived(e) => {
                assert_eq!(e.quantity, 100);
                assert_eq!(e.batch_quantity_after, 100);
                assert_eq!(e.warehouse_batch_quantity_after, 100);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn repeated_receive_merges_batch_and_overwrites_cost() {
        let variant_id = test_variant_id();
        let warehouse = WarehouseId::new();
        let mut agg = VariantStock::empty(variant_id);

        let first = agg
            .handle(&receive_cmd(variant_id, warehouse, "B1", 1000, 40))
            .unwrap();
        let first_batch_id = match &first[0] {
            StockEvent::StockReceived(e) => e.batch_id,
            other => panic!("unexpected event: {other:?}"),
        };
        apply_all(&mut agg, first);

        let second = agg
            .handle(&receive_cmd(variant_id, warehouse, "B1", 900, 60))
            .unwrap();
        match &second[0] {
            StockEvent::StockReceived(e) => {
                // The lot id is stable across merges.
                assert_eq!(e.batch_id, first_batch_id);
                assert_eq!(e.batch_quantity_after, 100);
                assert_eq!(e.warehouse_batch_quantity_after, 100);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        apply_all(&mut agg, second);

        let batch = agg.batch("B1").unwrap();
        assert_eq!(batch.initial_quantity, 100);
        assert_eq!(batch.current_quantity, 100);
        assert_eq!(batch.unit_cost, 900);
        assert_eq!(agg.live_stock(warehouse), 100);

        // Merging never creates a second lot.
        assert_eq!(agg.batches().count(), 1);
        assert_eq!(agg.id_typed(), variant_id);
    }

    #[test]
    fn receive_rejects_non_positive_quantity_and_negative_cost() {
        let variant_id = test_variant_id();
        let warehouse = WarehouseId::new();
        let agg = VariantStock::empty(variant_id);

        let err = agg
            .handle(&receive_cmd(variant_id, warehouse, "B1", 1000, 0))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let err = agg
            .handle(&receive_cmd(variant_id, warehouse, "B1", -1, 10))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn adjust_rejects_zero_delta_and_empty_reason() {
        let variant_id = test_variant_id();
        let agg = VariantStock::empty(variant_id);

        let cmd = StockCommand::AdjustStock(AdjustStock {
            variant_id,
            warehouse_id: WarehouseId::new(),
            delta: 0,
            kind: MovementKind::Adjustment,
            reason: "cycle count".to_string(),
            reference: None,
            recorded_by: UserId::new(),
            occurred_at: test_time(),
        });
        assert!(matches!(
            agg.handle(&cmd).unwrap_err(),
            DomainError::Validation(_)
        ));

        let cmd = StockCommand::AdjustStock(AdjustStock {
            variant_id,
            warehouse_id: WarehouseId::new(),
            delta: 5,
            kind: MovementKind::Adjustment,
            reason: "  ".to_string(),
            reference: None,
            recorded_by: UserId::new(),
            occurred_at: test_time(),
        });
        assert!(matches!(
            agg.handle(&cmd).unwrap_err(),
            DomainError::Validation(_)
        ));
    }

    #[test]
    fn adjust_below_zero_is_rejected_and_leaves_stock_unchanged() {
        let variant_id = test_variant_id();
        let warehouse = WarehouseId::new();
        let mut agg = VariantStock::empty(variant_id);

        let events = agg
            .handle(&receive_cmd(variant_id, warehouse, "B1", 1000, 10))
            .unwrap();
        apply_all(&mut agg, events);

        let cmd = StockCommand::AdjustStock(AdjustStock {
            variant_id,
            warehouse_id: warehouse,
            delta: -11,
            kind: MovementKind::Adjustment,
            reason: "shrinkage".to_string(),
            reference: None,
            recorded_by: UserId::new(),
            occurred_at: test_time(),
        });

        let err = agg.handle(&cmd).unwrap_err();
        assert!(matches!(err, DomainError::InsufficientStock(_)));
        assert_eq!(agg.live_stock(warehouse), 10);
    }

    #[test]
    fn transfer_validates_warehouses_and_available_stock() {
        let variant_id = test_variant_id();
        let w1 = WarehouseId::new();
        let w2 = WarehouseId::new();
        let mut agg = VariantStock::empty(variant_id);

        let events = agg
            .handle(&receive_cmd(variant_id, w1, "B1", 1000, 100))
            .unwrap();
        apply_all(&mut agg, events);

        let same = StockCommand::TransferStock(TransferStock {
            variant_id,
            source_warehouse_id: w1,
            target_warehouse_id: w1,
            quantity: 10,
            reason: "rebalance".to_string(),
            reference: None,
            recorded_by: UserId::new(),
            occurred_at: test_time(),
        });
        assert!(matches!(
            agg.handle(&same).unwrap_err(),
            DomainError::Validation(_)
        ));

        let too_much = StockCommand::TransferStock(TransferStock {
            variant_id,
            source_warehouse_id: w1,
            target_warehouse_id: w2,
            quantity: 101,
            reason: "rebalance".to_string(),
            reference: None,
            recorded_by: UserId::new(),
            occurred_at: test_time(),
        });
        assert!(matches!(
            agg.handle(&too_much).unwrap_err(),
            DomainError::InsufficientStock(_)
        ));
    }

    #[test]
    fn opposite_transfers_restore_aggregate_stock() {
        let variant_id = test_variant_id();
        let w1 = WarehouseId::new();
        let w2 = WarehouseId::new();
        let mut agg = VariantStock::empty(variant_id);

        let events = agg
            .handle(&receive_cmd(variant_id, w1, "B1", 1000, 100))
            .unwrap();
        apply_all(&mut agg, events);

        let transfer = |agg: &VariantStock, from, to| {
            agg.handle(&StockCommand::TransferStock(TransferStock {
                variant_id,
                source_warehouse_id: from,
                target_warehouse_id: to,
                quantity: 30,
                reason: "rebalance".to_string(),
                reference: None,
                recorded_by: UserId::new(),
                occurred_at: test_time(),
            }))
            .unwrap()
        };

        let out = transfer(&agg, w1, w2);
        apply_all(&mut agg, out);
        assert_eq!(agg.live_stock(w1), 70);
        assert_eq!(agg.live_stock(w2), 30);

        let back = transfer(&agg, w2, w1);
        apply_all(&mut agg, back);
        assert_eq!(agg.live_stock(w1), 100);
        assert_eq!(agg.live_stock(w2), 0);
    }

    #[test]
    fn sale_requires_known_batch_and_sufficient_lot_stock() {
        let variant_id = test_variant_id();
        let warehouse = WarehouseId::new();
        let mut agg = VariantStock::empty(variant_id);

        let missing = StockCommand::RecordSale(RecordSale {
            variant_id,
            warehouse_id: warehouse,
            batch_number: "B1".to_string(),
            quantity: 1,
            reason: "order".to_string(),
            reference: None,
            recorded_by: UserId::new(),
            occurred_at: test_time(),
        });
        assert!(matches!(
            agg.handle(&missing).unwrap_err(),
            DomainError::NotFound
        ));

        let events = agg
            .handle(&receive_cmd(variant_id, warehouse, "B1", 1000, 20))
            .unwrap();
        apply_all(&mut agg, events);

        let sale = StockCommand::RecordSale(RecordSale {
            variant_id,
            warehouse_id: warehouse,
            batch_number: "B1".to_string(),
            quantity: 20,
            reason: "order".to_string(),
            reference: None,
            recorded_by: UserId::new(),
            occurred_at: test_time(),
        });
        let events = agg.handle(&sale).unwrap();
        match &events[0] {
            StockEvent::SaleRecorded(e) => {
                assert_eq!(e.unit_cost, 1000);
                assert_eq!(e.batch_quantity_after, 0);
                assert_eq!(e.warehouse_batch_quantity_after, 0);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        apply_all(&mut agg, events);

        let oversell = StockCommand::RecordSale(RecordSale {
            variant_id,
            warehouse_id: warehouse,
            batch_number: "B1".to_string(),
            quantity: 1,
            reason: "order".to_string(),
            reference: None,
            recorded_by: UserId::new(),
            occurred_at: test_time(),
        });
        assert!(matches!(
            agg.handle(&oversell).unwrap_err(),
            DomainError::InsufficientStock(_)
        ));
    }

    #[test]
    fn duplicate_reference_is_a_no_op() {
        let variant_id = test_variant_id();
        let warehouse = WarehouseId::new();
        let mut agg = VariantStock::empty(variant_id);
        let reference = Uuid::now_v7();

        let cmd = StockCommand::ReceiveStock(ReceiveStock {
            variant_id,
            warehouse_id: warehouse,
            batch_id: BatchId::new(),
            batch_number: "B1".to_string(),
            expiry: expiry(),
            unit_cost: 1000,
            quantity: 10,
            reason: "grn".to_string(),
            reference: Some(reference),
            recorded_by: UserId::new(),
            occurred_at: test_time(),
        });

        let events = agg.handle(&cmd).unwrap();
        assert_eq!(events.len(), 1);
        apply_all(&mut agg, events);

        // Retried delivery of the same request.
        let retried = agg.handle(&cmd).unwrap();
        assert!(retried.is_empty());
        assert_eq!(agg.live_stock(warehouse), 10);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: for any sequence of receipts under one batch number in
        /// one warehouse, the batch quantity, the warehouse-batch quantity,
        /// and the sum of receipt quantities all agree.
        #[test]
        fn receipts_sum_to_batch_and_warehouse_stock(
            quantities in prop::collection::vec(1i64..10_000i64, 1..20)
        ) {
            let variant_id = test_variant_id();
            let warehouse = WarehouseId::new();
            let mut agg = VariantStock::empty(variant_id);

            let mut total = 0i64;
            let mut batch_id = None;
            for qty in quantities {
                let events = agg
                    .handle(&receive_cmd(variant_id, warehouse, "LOT-7", 500, qty))
                    .unwrap();
                if let StockEvent::StockReceived(e) = &events[0] {
                    batch_id.get_or_insert(e.batch_id);
                }
                for e in &events {
                    agg.apply(e);
                }
                total += qty;
            }

            let batch = agg.batch("LOT-7").unwrap();
            prop_assert_eq!(batch.current_quantity, total);
            prop_assert_eq!(
                agg.warehouse_batch_quantity(warehouse, batch_id.unwrap()),
                total
            );
            prop_assert_eq!(agg.live_stock(warehouse), total);
        }

        /// Property: receipts spread across warehouses keep the batch
        /// quantity equal to the sum of its warehouse-level quantities.
        #[test]
        fn batch_quantity_equals_sum_over_warehouses(
            split in prop::collection::vec(1i64..1_000i64, 1..8)
        ) {
            let variant_id = test_variant_id();
            let mut agg = VariantStock::empty(variant_id);

            let warehouses: Vec<WarehouseId> =
                split.iter().map(|_| WarehouseId::new()).collect();

            for (w, qty) in warehouses.iter().zip(&split) {
                let events = agg
                    .handle(&receive_cmd(variant_id, *w, "LOT-9", 250, *qty))
                    .unwrap();
                for e in &events {
                    agg.apply(e);
                }
            }

            let batch = agg.batch("LOT-9").unwrap();
            let summed: i64 = warehouses
                .iter()
                .map(|w| agg.warehouse_batch_quantity(*w, batch.id))
                .sum();
            prop_assert_eq!(batch.current_quantity, summed);
            prop_assert_eq!(agg.total_live_stock(), summed);
        }
    }
}
