//! Append-only store of lending transactions.
//!
//! The ledger allocates ids, keeps every record ever written (closed
//! transactions are the borrowing history), and answers the availability
//! queries the engine builds on. A record is replaced whole under the write
//! lock, so readers never see a half-updated transaction.

use crate::error::{LendingError, Result};
use crate::transaction::{BookId, Transaction, TransactionId, TransactionState};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// Records the lifecycle of every lending transaction.
#[derive(Debug, Default)]
pub struct TransactionLedger {
    records: RwLock<HashMap<TransactionId, Transaction>>,
    next_id: AtomicU64,
}

impl TransactionLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        TransactionLedger::default()
    }

    /// Allocates the next transaction id. Ids are monotonic, hence
    /// time-ordered by creation.
    pub fn next_id(&self) -> TransactionId {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Stores a new transaction record.
    pub fn add(&self, tx: Transaction) {
        let mut records = self.records.write().expect("ledger lock poisoned");
        records.insert(tx.id, tx);
    }

    /// Replaces an existing record in one write.
    ///
    /// Fails with `UnknownTransaction` if the id was never added.
    pub fn update(&self, tx: Transaction) -> Result<()> {
        let mut records = self.records.write().expect("ledger lock poisoned");
        if !records.contains_key(&tx.id) {
            return Err(LendingError::UnknownTransaction { id: tx.id });
        }
        records.insert(tx.id, tx);
        Ok(())
    }

    /// Looks up one record by id.
    pub fn get(&self, id: TransactionId) -> Option<Transaction> {
        let records = self.records.read().expect("ledger lock poisoned");
        records.get(&id).cloned()
    }

    /// The single `Active` checkout for a book, if any.
    pub fn active_checkout(&self, book_id: &str) -> Option<Transaction> {
        let records = self.records.read().expect("ledger lock poisoned");
        records
            .values()
            .find(|tx| tx.book_id == book_id && tx.state == TransactionState::Active)
            .cloned()
    }

    /// The patron's open (`Requested` or `Active`) transaction for a book,
    /// if any. A patron has at most one.
    pub fn open_transaction(&self, book_id: &str, patron_id: &str) -> Option<Transaction> {
        let records = self.records.read().expect("ledger lock poisoned");
        records
            .values()
            .find(|tx| {
                tx.book_id == book_id && tx.patron_id == patron_id && tx.state.is_open()
            })
            .cloned()
    }

    /// Books whose active checkout is past due at `now` and not yet
    /// returned. Recomputed fresh on every call.
    pub fn overdue_book_ids(&self, now: DateTime<Utc>) -> BTreeSet<BookId> {
        let records = self.records.read().expect("ledger lock poisoned");
        records
            .values()
            .filter(|tx| {
                tx.state == TransactionState::Active
                    && tx.returned_at.is_none()
                    && tx.due_at.is_some_and(|due| due < now)
            })
            .map(|tx| tx.book_id.clone())
            .collect()
    }

    /// Books currently in state `Active`.
    pub fn borrowed_book_ids(&self) -> BTreeSet<BookId> {
        let records = self.records.read().expect("ledger lock poisoned");
        records
            .values()
            .filter(|tx| tx.state == TransactionState::Active)
            .map(|tx| tx.book_id.clone())
            .collect()
    }

    /// Full borrowing history for one book, oldest transaction first.
    pub fn history(&self, book_id: &str) -> Vec<Transaction> {
        let records = self.records.read().expect("ledger lock poisoned");
        let mut history: Vec<Transaction> = records
            .values()
            .filter(|tx| tx.book_id == book_id)
            .cloned()
            .collect();
        history.sort_by_key(|tx| tx.id);
        history
    }
}
