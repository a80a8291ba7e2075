//! `stocklot-stock` — the stock write model.
//!
//! One `VariantStock` aggregate per sellable variant holds the batch
//! registry, per-warehouse batch quantities, and per-warehouse aggregate
//! stock. All stock-affecting operations are commands on this aggregate;
//! the movement ledger and live stock log are projections over its events.

pub mod batch;
pub mod movement;
pub mod variant_stock;

pub use batch::Batch;
pub use movement::MovementKind;
pub use variant_stock::{
    AdjustStock, ReceiveStock, RecordSale, SaleRecorded, StockAdjusted, StockCommand, StockEvent,
    StockReceived, StockTransferred, TransferStock, VariantStock,
};
