use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use stocklot_core::BatchId;

/// A dated, costed lot of a variant, identified by a per-variant batch number.
///
/// Re-receiving under an existing batch number **merges** into this record:
/// quantities add, while unit cost and expiry are overwritten by the latest
/// receipt (last-write-wins). The movement ledger keeps every receipt at its
/// own cost, so acquisition history survives the overwrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    pub batch_number: String,
    pub expiry: NaiveDate,
    /// Acquisition cost per unit, in minor currency units.
    pub unit_cost: i64,
    pub initial_quantity: i64,
    pub current_quantity: i64,
}

impl Batch {
    pub fn new(
        id: BatchId,
        batch_number: impl Into<String>,
        expiry: NaiveDate,
        unit_cost: i64,
        quantity: i64,
    ) -> Self {
        Self {
            id,
            batch_number: batch_number.into(),
            expiry,
            unit_cost,
            initial_quantity: quantity,
            current_quantity: quantity,
        }
    }

    /// Fold another receipt into this lot (same batch number).
    pub fn merge_receipt(&mut self, expiry: NaiveDate, unit_cost: i64, quantity: i64) {
        self.initial_quantity += quantity;
        self.current_quantity += quantity;
        self.unit_cost = unit_cost;
        self.expiry = expiry;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn new_batch_starts_with_equal_initial_and_current() {
        let b = Batch::new(BatchId::new(), "B1", date(2027, 1, 31), 1050, 40);
        assert_eq!(b.initial_quantity, 40);
        assert_eq!(b.current_quantity, 40);
    }

    #[test]
    fn merge_adds_quantities_and_overwrites_cost_and_expiry() {
        let mut b = Batch::new(BatchId::new(), "B1", date(2027, 1, 31), 1050, 40);
        b.merge_receipt(date(2027, 6, 30), 990, 60);

        assert_eq!(b.initial_quantity, 100);
        assert_eq!(b.current_quantity, 100);
        assert_eq!(b.unit_cost, 990);
        assert_eq!(b.expiry, date(2027, 6, 30));
    }
}
