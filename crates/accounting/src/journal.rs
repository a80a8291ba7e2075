use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stocklot_core::{DomainError, DomainResult, UserId};

/// High-level account kind (determines normal balance side).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
}

/// Account identifier + metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Account {
    pub code: String, // e.g. "1400"
    pub name: String, // e.g. "Inventory Asset"
    pub kind: AccountKind,
}

/// One side of a journal entry (immutable).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalLine {
    pub account: Account,
    /// Positive amount in smallest unit (e.g., cents).
    pub amount: i64,
    /// true = debit, false = credit.
    pub is_debit: bool,
}

/// A balanced double-entry journal entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub entry_id: Uuid,
    pub lines: Vec<JournalLine>,
    pub description: Option<String>,
    pub recorded_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

impl JournalEntry {
    /// Check the double-entry invariant: non-empty, positive lines whose
    /// debits equal credits.
    pub fn validate(&self) -> DomainResult<()> {
        if self.lines.is_empty() {
            return Err(DomainError::validation("journal entry must have lines"));
        }

        let mut debit_total: i128 = 0;
        let mut credit_total: i128 = 0;

        for line in &self.lines {
            if line.amount <= 0 {
                return Err(DomainError::validation("amount must be positive"));
            }
            if line.is_debit {
                debit_total += line.amount as i128;
            } else {
                credit_total += line.amount as i128;
            }
        }

        if debit_total != credit_total {
            return Err(DomainError::invariant("debits must equal credits"));
        }

        Ok(())
    }
}

/// Append-only sink onto the external accounting ledger.
pub trait AccountingSink: Send + Sync {
    fn post(&self, entry: JournalEntry) -> DomainResult<()>;
}

impl<S> AccountingSink for Arc<S>
where
    S: AccountingSink + ?Sized,
{
    fn post(&self, entry: JournalEntry) -> DomainResult<()> {
        (**self).post(entry)
    }
}

/// In-memory journal for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJournal {
    entries: RwLock<Vec<JournalEntry>>,
}

impl InMemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<JournalEntry> {
        match self.entries.read() {
            Ok(entries) => entries.clone(),
            Err(_) => vec![],
        }
    }
}

impl AccountingSink for InMemoryJournal {
    fn post(&self, entry: JournalEntry) -> DomainResult<()> {
        entry.validate()?;
        self.entries
            .write()
            .map_err(|_| DomainError::invariant("journal lock poisoned"))?
            .push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_account(code: &str, kind: AccountKind) -> Account {
        Account {
            code: code.to_string(),
            name: code.to_string(),
            kind,
        }
    }

    fn entry(lines: Vec<JournalLine>) -> JournalEntry {
        JournalEntry {
            entry_id: Uuid::now_v7(),
            lines,
            description: None,
            recorded_by: UserId::new(),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn balanced_entry_is_accepted() {
        let journal = InMemoryJournal::new();
        let e = entry(vec![
            JournalLine {
                account: test_account("1400", AccountKind::Asset),
                amount: 100,
                is_debit: true,
            },
            JournalLine {
                account: test_account("2100", AccountKind::Liability),
                amount: 100,
                is_debit: false,
            },
        ]);

        journal.post(e).unwrap();
        assert_eq!(journal.entries().len(), 1);
    }

    #[test]
    fn unbalanced_entry_is_rejected() {
        let journal = InMemoryJournal::new();
        let e = entry(vec![
            JournalLine {
                account: test_account("1400", AccountKind::Asset),
                amount: 100,
                is_debit: true,
            },
            JournalLine {
                account: test_account("2100", AccountKind::Liability),
                amount: 90,
                is_debit: false,
            },
        ]);

        let err = journal.post(e).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
        assert!(journal.entries().is_empty());
    }

    #[test]
    fn empty_entry_is_rejected() {
        let e = entry(vec![]);
        assert!(matches!(
            e.validate().unwrap_err(),
            DomainError::Validation(_)
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: for any posted sequence of balanced entries, the sum of
        /// debits minus credits across the whole journal is zero.
        #[test]
        fn posted_journal_stays_balanced(
            amounts in prop::collection::vec(1i64..1_000_000i64, 1..10)
        ) {
            let journal = InMemoryJournal::new();

            for amount in amounts {
                let e = entry(vec![
                    JournalLine {
                        account: test_account("1400", AccountKind::Asset),
                        amount,
                        is_debit: true,
                    },
                    JournalLine {
                        account: test_account("2100", AccountKind::Liability),
                        amount,
                        is_debit: false,
                    },
                ]);
                journal.post(e).unwrap();
            }

            let mut total: i128 = 0;
            for posted in journal.entries() {
                for line in &posted.lines {
                    if line.is_debit {
                        total += line.amount as i128;
                    } else {
                        total -= line.amount as i128;
                    }
                }
            }

            prop_assert_eq!(total, 0);
        }
    }
}
