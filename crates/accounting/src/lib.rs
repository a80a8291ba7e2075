//! `stocklot-accounting` — accounting-ledger hand-off.
//!
//! The stock engine is not a general ledger. On goods receipt it emits one
//! balanced journal entry (debit the inventory asset account) to whatever
//! accounting system sits behind [`AccountingSink`]; the hand-off is
//! fire-and-forget from the orchestrator's point of view.

pub mod journal;

pub use journal::{
    Account, AccountKind, AccountingSink, InMemoryJournal, JournalEntry, JournalLine,
};
