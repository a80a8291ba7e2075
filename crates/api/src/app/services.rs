//! Service graph construction.
//!
//! Wires store + bus + projections + orchestrator, in-memory by default and
//! Postgres-backed when `USE_PERSISTENT_STORES=true`. Read models are
//! in-memory projections in both modes; the persistent mode rebuilds them
//! from the event log at startup.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use uuid::Uuid;

use stocklot_accounting::InMemoryJournal;
use stocklot_catalog::{InMemoryVariantDirectory, InMemoryWarehouseDirectory};
use stocklot_core::{BatchId, UserId};
use stocklot_events::{EventBus, EventEnvelope, InMemoryEventBus};
use stocklot_infra::command_dispatcher::{CommandDispatcher, DispatchError};
use stocklot_infra::event_store::{InMemoryEventStore, PostgresEventStore};
use stocklot_infra::operations::{
    AdjustStockRequest, InwardStockRequest, OperationOutcome, Operations, RecordSaleRequest,
    TransferStockRequest,
};
use stocklot_infra::projections::live_stock::{LiveStockKey, LiveStockRow};
use stocklot_infra::projections::{
    BatchLevel, LiveStockProjection, MovementLedgerProjection, MovementRow, StockLevelsProjection,
};
use stocklot_infra::read_model::InMemoryReadModelStore;
use stocklot_infra::reports::Reports;

pub type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
pub type LedgerStore = Arc<InMemoryReadModelStore<Uuid, MovementRow>>;
pub type LiveStore = Arc<InMemoryReadModelStore<LiveStockKey, LiveStockRow>>;
pub type LevelsStore = Arc<InMemoryReadModelStore<BatchId, BatchLevel>>;
pub type AppReports = Reports<LedgerStore, LiveStore, LevelsStore>;

enum Engine {
    InMemory(Operations<Arc<InMemoryEventStore>, Bus>),
    Persistent(Operations<Arc<PostgresEventStore>, Bus>),
}

/// Everything the routes need, behind one handle.
pub struct AppServices {
    engine: Engine,
    reports: AppReports,
    variants: Arc<InMemoryVariantDirectory>,
    warehouses: Arc<InMemoryWarehouseDirectory>,
    journal: Arc<InMemoryJournal>,
}

impl AppServices {
    pub fn inward_stock(
        &self,
        actor: UserId,
        req: InwardStockRequest,
    ) -> Result<OperationOutcome, DispatchError> {
        match &self.engine {
            Engine::InMemory(ops) => ops.inward_stock(actor, req),
            Engine::Persistent(ops) => ops.inward_stock(actor, req),
        }
    }

    pub fn adjust_stock(
        &self,
        actor: UserId,
        req: AdjustStockRequest,
    ) -> Result<OperationOutcome, DispatchError> {
        match &self.engine {
            Engine::InMemory(ops) => ops.adjust_stock(actor, req),
            Engine::Persistent(ops) => ops.adjust_stock(actor, req),
        }
    }

    pub fn transfer_stock(
        &self,
        actor: UserId,
        req: TransferStockRequest,
    ) -> Result<OperationOutcome, DispatchError> {
        match &self.engine {
            Engine::InMemory(ops) => ops.transfer_stock(actor, req),
            Engine::Persistent(ops) => ops.transfer_stock(actor, req),
        }
    }

    pub fn record_sale(
        &self,
        actor: UserId,
        req: RecordSaleRequest,
    ) -> Result<OperationOutcome, DispatchError> {
        match &self.engine {
            Engine::InMemory(ops) => ops.record_sale(actor, req),
            Engine::Persistent(ops) => ops.record_sale(actor, req),
        }
    }

    pub fn reports(&self) -> &AppReports {
        &self.reports
    }

    /// Stand-in for the catalog collaborator; tests seed through this.
    pub fn variants(&self) -> &Arc<InMemoryVariantDirectory> {
        &self.variants
    }

    /// Stand-in for the warehouse registry collaborator.
    pub fn warehouses(&self) -> &Arc<InMemoryWarehouseDirectory> {
        &self.warehouses
    }

    /// Stand-in for the accounting ledger collaborator.
    pub fn journal(&self) -> &Arc<InMemoryJournal> {
        &self.journal
    }
}

pub async fn build_services() -> AppServices {
    let use_persistent = std::env::var("USE_PERSISTENT_STORES")
        .unwrap_or_else(|_| "false".to_string())
        .parse::<bool>()
        .unwrap_or(false);

    if use_persistent {
        build_persistent_services().await
    } else {
        build_in_memory_services()
    }
}

struct ProjectionSet {
    bus: Bus,
    movement_ledger: Arc<MovementLedgerProjection<LedgerStore>>,
    live_stock: Arc<LiveStockProjection<LiveStore>>,
    stock_levels: Arc<StockLevelsProjection<LevelsStore>>,
}

fn build_projections() -> ProjectionSet {
    let bus: Bus = Arc::new(InMemoryEventBus::new());

    let ledger_store: LedgerStore = Arc::new(InMemoryReadModelStore::new());
    let movement_ledger = Arc::new(MovementLedgerProjection::new(ledger_store));
    let live_store: LiveStore = Arc::new(InMemoryReadModelStore::new());
    let live_stock = Arc::new(LiveStockProjection::new(live_store));
    let levels_store: LevelsStore = Arc::new(InMemoryReadModelStore::new());
    let stock_levels = Arc::new(StockLevelsProjection::new(levels_store));

    // Background subscriber: bus -> projections. The live stock view is
    // applied last; once a change is visible there, the ledger and levels
    // views already carry it.
    {
        let sub = bus.subscribe();
        let movement_ledger = movement_ledger.clone();
        let live_stock = live_stock.clone();
        let stock_levels = stock_levels.clone();
        tokio::task::spawn_blocking(move || {
            loop {
                match sub.recv() {
                    Ok(env) => {
                        if let Err(e) = movement_ledger.apply_envelope(&env) {
                            tracing::warn!("movement ledger apply failed: {e}");
                        }
                        if let Err(e) = stock_levels.apply_envelope(&env) {
                            tracing::warn!("stock levels apply failed: {e}");
                        }
                        if let Err(e) = live_stock.apply_envelope(&env) {
                            tracing::warn!("live stock apply failed: {e}");
                        }
                    }
                    Err(_) => break,
                }
            }
        });
    }

    ProjectionSet {
        bus,
        movement_ledger,
        live_stock,
        stock_levels,
    }
}

pub fn build_in_memory_services() -> AppServices {
    let store = Arc::new(InMemoryEventStore::new());
    let projections = build_projections();

    let variants = Arc::new(InMemoryVariantDirectory::new());
    let warehouses = Arc::new(InMemoryWarehouseDirectory::new());
    let journal = Arc::new(InMemoryJournal::new());

    let dispatcher = CommandDispatcher::new(store, projections.bus.clone());
    let operations = Operations::new(
        dispatcher,
        variants.clone(),
        warehouses.clone(),
        journal.clone(),
    );

    let reports = Reports::new(
        projections.movement_ledger,
        projections.live_stock,
        projections.stock_levels,
        variants.clone(),
    );

    AppServices {
        engine: Engine::InMemory(operations),
        reports,
        variants,
        warehouses,
        journal,
    }
}

async fn build_persistent_services() -> AppServices {
    let database_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set when USE_PERSISTENT_STORES=true");

    let pool = sqlx::PgPool::connect(&database_url)
        .await
        .expect("failed to connect to Postgres");
    let store = Arc::new(PostgresEventStore::new(pool));

    let projections = build_projections();

    // Read models are in-memory; replay the durable log into them before
    // taking traffic.
    let history = store
        .load_all_async()
        .await
        .expect("failed to load event history");
    let envelopes: Vec<_> = history.iter().map(|e| e.to_envelope()).collect();
    projections
        .movement_ledger
        .rebuild_from_scratch(envelopes.clone())
        .expect("failed to rebuild movement ledger");
    projections
        .live_stock
        .rebuild_from_scratch(envelopes.clone())
        .expect("failed to rebuild live stock log");
    projections
        .stock_levels
        .rebuild_from_scratch(envelopes)
        .expect("failed to rebuild stock levels");
    tracing::info!(events = history.len(), "projections rebuilt from event log");

    let variants = Arc::new(InMemoryVariantDirectory::new());
    let warehouses = Arc::new(InMemoryWarehouseDirectory::new());
    let journal = Arc::new(InMemoryJournal::new());

    let dispatcher = CommandDispatcher::new(store, projections.bus.clone());
    let operations = Operations::new(
        dispatcher,
        variants.clone(),
        warehouses.clone(),
        journal.clone(),
    );

    let reports = Reports::new(
        projections.movement_ledger,
        projections.live_stock,
        projections.stock_levels,
        variants.clone(),
    );

    AppServices {
        engine: Engine::Persistent(operations),
        reports,
        variants,
        warehouses,
        journal,
    }
}
