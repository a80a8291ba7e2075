pub mod ledger;
pub mod reports;
pub mod stock;
