//! Read-model projections over the stock event stream.
//!
//! Each projection consumes published envelopes and maintains one queryable
//! view. The movement ledger and the live stock log are deliberately
//! separate views of the same events: the first is batch-resolution and
//! receives only purchase/sale movements, the second is batch-agnostic and
//! receives every movement. Because both derive from one append log, they
//! cannot drift apart the way independently-written tables can.

pub mod live_stock;
pub mod movement_ledger;
pub mod stock_levels;

pub use live_stock::{LiveStockProjection, LiveStockRow};
pub use movement_ledger::{LedgerFilter, MovementLedgerProjection, MovementRow};
pub use stock_levels::{BatchLevel, StockLevelsProjection};
