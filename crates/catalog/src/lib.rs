//! `stocklot-catalog` — collaborator interfaces for catalog data.
//!
//! Variants and warehouses are owned by external subsystems; this crate
//! defines the records and the narrow interfaces the stock engine needs:
//! read access plus tax-metadata updates on variants. The in-memory
//! directories back tests, dev, and the API's default wiring.

pub mod variant;
pub mod warehouse;

pub use variant::{DEFAULT_MIN_STOCK_LEVEL, InMemoryVariantDirectory, Variant, VariantDirectory};
pub use warehouse::{InMemoryWarehouseDirectory, Warehouse, WarehouseDirectory};
