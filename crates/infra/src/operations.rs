//! Operations orchestrator: the write surface of the stock engine.
//!
//! Each operation validates its request against the catalog directories,
//! builds a command for the variant's stock aggregate, and dispatches it
//! through the event-sourcing pipeline. Conflicting concurrent writers fail
//! the optimistic version check; the orchestrator reloads and retries a
//! bounded number of times before surfacing the conflict.
//!
//! Goods receipt additionally hands a balanced journal entry to the
//! accounting ledger. That hand-off is fire-and-forget: a failure is logged
//! and never fails the receipt.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use stocklot_accounting::{Account, AccountKind, AccountingSink, JournalEntry, JournalLine};
use stocklot_catalog::{VariantDirectory, WarehouseDirectory};
use stocklot_core::{AggregateId, BatchId, UserId, VariantId, WarehouseId};
use stocklot_events::{EventBus, EventEnvelope};
use stocklot_stock::{
    AdjustStock, MovementKind, ReceiveStock, RecordSale, StockCommand, TransferStock, VariantStock,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::{EventStore, StoredEvent};

/// Aggregate type identifier for variant stock streams.
pub const STOCK_AGGREGATE_TYPE: &str = "stock.variant";

/// How many times a conflicting write is retried before the caller sees it.
const MAX_CONFLICT_RETRIES: usize = 5;

#[derive(Debug, Clone)]
pub struct InwardStockRequest {
    pub variant_id: VariantId,
    pub warehouse_id: WarehouseId,
    pub batch_number: String,
    pub expiry: NaiveDate,
    /// Acquisition cost per unit, minor currency units.
    pub unit_cost: i64,
    pub quantity: i64,
    pub reason: String,
    /// Optional tax metadata captured at receipt time.
    pub hsn_code: Option<String>,
    pub tax_rate_bps: Option<u32>,
    /// Client idempotency key; retried requests with the same reference
    /// apply once.
    pub reference: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct AdjustStockRequest {
    pub variant_id: VariantId,
    pub warehouse_id: WarehouseId,
    pub delta: i64,
    pub kind: MovementKind,
    pub reason: String,
    pub reference: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct TransferStockRequest {
    pub variant_id: VariantId,
    pub source_warehouse_id: WarehouseId,
    pub target_warehouse_id: WarehouseId,
    pub quantity: i64,
    pub reason: String,
    pub reference: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct RecordSaleRequest {
    pub variant_id: VariantId,
    pub warehouse_id: WarehouseId,
    pub batch_number: String,
    pub quantity: i64,
    pub reason: String,
    pub reference: Option<Uuid>,
}

/// Result of a successful write operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationOutcome {
    pub events_committed: usize,
    pub stream_version: u64,
}

impl OperationOutcome {
    fn from_committed(committed: &[StoredEvent]) -> Self {
        Self {
            events_committed: committed.len(),
            stream_version: committed.last().map(|e| e.sequence_number).unwrap_or(0),
        }
    }
}

/// The operations orchestrator.
///
/// Generic over store/bus like the dispatcher it wraps; directories and the
/// accounting sink are trait objects since only one implementation is live
/// per process.
pub struct Operations<S, B> {
    dispatcher: CommandDispatcher<S, B>,
    variants: Arc<dyn VariantDirectory>,
    warehouses: Arc<dyn WarehouseDirectory>,
    accounting: Arc<dyn AccountingSink>,
}

impl<S, B> Operations<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(
        dispatcher: CommandDispatcher<S, B>,
        variants: Arc<dyn VariantDirectory>,
        warehouses: Arc<dyn WarehouseDirectory>,
        accounting: Arc<dyn AccountingSink>,
    ) -> Self {
        Self {
            dispatcher,
            variants,
            warehouses,
            accounting,
        }
    }

    /// Receive a costed, dated lot into a warehouse.
    pub fn inward_stock(
        &self,
        actor: UserId,
        req: InwardStockRequest,
    ) -> Result<OperationOutcome, DispatchError> {
        self.ensure_variant(req.variant_id)?;
        let warehouse = self
            .warehouses
            .get(req.warehouse_id)
            .ok_or(DispatchError::NotFound)?;
        if !warehouse.active {
            return Err(DispatchError::Validation(format!(
                "warehouse {} is not active",
                warehouse.name
            )));
        }

        if req.hsn_code.is_some() || req.tax_rate_bps.is_some() {
            self.variants
                .update_tax_metadata(req.variant_id, req.hsn_code.clone(), req.tax_rate_bps)
                .map_err(DispatchError::from)?;
        }

        let command = StockCommand::ReceiveStock(ReceiveStock {
            variant_id: req.variant_id,
            warehouse_id: req.warehouse_id,
            batch_id: BatchId::new(),
            batch_number: req.batch_number.clone(),
            expiry: req.expiry,
            unit_cost: req.unit_cost,
            quantity: req.quantity,
            reason: req.reason.clone(),
            reference: req.reference,
            recorded_by: actor,
            occurred_at: Utc::now(),
        });

        let committed = self.dispatch_with_retry(req.variant_id, actor, command)?;

        if !committed.is_empty() {
            self.post_receipt_journal(actor, &req);
        }

        Ok(OperationOutcome::from_committed(&committed))
    }

    /// Batch-agnostic quantity correction.
    pub fn adjust_stock(
        &self,
        actor: UserId,
        req: AdjustStockRequest,
    ) -> Result<OperationOutcome, DispatchError> {
        self.ensure_variant(req.variant_id)?;
        self.ensure_warehouse(req.warehouse_id)?;

        let command = StockCommand::AdjustStock(AdjustStock {
            variant_id: req.variant_id,
            warehouse_id: req.warehouse_id,
            delta: req.delta,
            kind: req.kind,
            reason: req.reason,
            reference: req.reference,
            recorded_by: actor,
            occurred_at: Utc::now(),
        });

        let committed = self.dispatch_with_retry(req.variant_id, actor, command)?;
        Ok(OperationOutcome::from_committed(&committed))
    }

    /// Move aggregate stock between warehouses. One event covers both legs,
    /// so the movement commits atomically.
    pub fn transfer_stock(
        &self,
        actor: UserId,
        req: TransferStockRequest,
    ) -> Result<OperationOutcome, DispatchError> {
        self.ensure_variant(req.variant_id)?;
        self.ensure_warehouse(req.source_warehouse_id)?;
        self.ensure_warehouse(req.target_warehouse_id)?;

        let command = StockCommand::TransferStock(TransferStock {
            variant_id: req.variant_id,
            source_warehouse_id: req.source_warehouse_id,
            target_warehouse_id: req.target_warehouse_id,
            quantity: req.quantity,
            reason: req.reason,
            reference: req.reference,
            recorded_by: actor,
            occurred_at: Utc::now(),
        });

        let committed = self.dispatch_with_retry(req.variant_id, actor, command)?;
        Ok(OperationOutcome::from_committed(&committed))
    }

    /// Consume stock from a named lot at its current cost (the SALE rows the
    /// order subsystem writes through this engine).
    pub fn record_sale(
        &self,
        actor: UserId,
        req: RecordSaleRequest,
    ) -> Result<OperationOutcome, DispatchError> {
        self.ensure_variant(req.variant_id)?;
        self.ensure_warehouse(req.warehouse_id)?;

        let command = StockCommand::RecordSale(RecordSale {
            variant_id: req.variant_id,
            warehouse_id: req.warehouse_id,
            batch_number: req.batch_number,
            quantity: req.quantity,
            reason: req.reason,
            reference: req.reference,
            recorded_by: actor,
            occurred_at: Utc::now(),
        });

        let committed = self.dispatch_with_retry(req.variant_id, actor, command)?;
        Ok(OperationOutcome::from_committed(&committed))
    }

    fn ensure_variant(&self, variant_id: VariantId) -> Result<(), DispatchError> {
        self.variants
            .get(variant_id)
            .map(|_| ())
            .ok_or(DispatchError::NotFound)
    }

    fn ensure_warehouse(&self, warehouse_id: WarehouseId) -> Result<(), DispatchError> {
        self.warehouses
            .get(warehouse_id)
            .map(|_| ())
            .ok_or(DispatchError::NotFound)
    }

    fn dispatch_with_retry(
        &self,
        variant_id: VariantId,
        actor: UserId,
        command: StockCommand,
    ) -> Result<Vec<StoredEvent>, DispatchError> {
        let aggregate_id = AggregateId::from(variant_id);
        let mut attempts = 0;

        loop {
            let result = self.dispatcher.dispatch::<VariantStock>(
                aggregate_id,
                STOCK_AGGREGATE_TYPE,
                actor,
                command.clone(),
                |id| VariantStock::empty(VariantId::from_uuid(*id.as_uuid())),
            );

            match result {
                Err(DispatchError::Concurrency(msg)) if attempts < MAX_CONFLICT_RETRIES => {
                    attempts += 1;
                    tracing::debug!(
                        variant_id = %variant_id,
                        attempt = attempts,
                        "retrying after concurrency conflict: {msg}"
                    );
                }
                other => return other,
            }
        }
    }

    fn post_receipt_journal(&self, actor: UserId, req: &InwardStockRequest) {
        let amount = req.unit_cost * req.quantity;
        if amount <= 0 {
            return;
        }

        let entry = JournalEntry {
            entry_id: Uuid::now_v7(),
            lines: vec![
                JournalLine {
                    account: inventory_asset_account(),
                    amount,
                    is_debit: true,
                },
                JournalLine {
                    account: goods_received_account(),
                    amount,
                    is_debit: false,
                },
            ],
            description: Some(format!(
                "goods receipt: batch {} into warehouse {}",
                req.batch_number, req.warehouse_id
            )),
            recorded_by: actor,
            occurred_at: Utc::now(),
        };

        // Fire-and-forget: the receipt stands even if the ledger is down.
        if let Err(e) = self.accounting.post(entry) {
            tracing::warn!(
                variant_id = %req.variant_id,
                batch_number = %req.batch_number,
                "accounting ledger hand-off failed: {e}"
            );
        }
    }
}

fn inventory_asset_account() -> Account {
    Account {
        code: "1400".to_string(),
        name: "Inventory Asset".to_string(),
        kind: AccountKind::Asset,
    }
}

fn goods_received_account() -> Account {
    Account {
        code: "2100".to_string(),
        name: "Goods Received Not Invoiced".to_string(),
        kind: AccountKind::Liability,
    }
}
