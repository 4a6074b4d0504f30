//! Core book lending engine.
//!
//! Orchestrates the transaction ledger and the per-book wait queues to
//! implement reserve, checkout, return, hold cancellation, and overdue
//! scanning. The engine is the sole mutator of book availability state and
//! the sole enforcer of the lending invariants.
//!
//! # Concurrency
//!
//! Every mutating operation runs inside a per-book critical section: a lock
//! registry hands out one mutex per book id, and the whole
//! check-queue-then-write sequence happens under that mutex. Operations on
//! distinct books proceed in parallel; concurrent operations on the same
//! book serialize, so at most one checkout can ever win a race for a copy.

use crate::clock::{Clock, SystemClock};
use crate::error::{LendingError, Result};
use crate::fee::{FeeCalculator, LendingPolicy};
use crate::ledger::TransactionLedger;
use crate::queue::BookQueue;
use crate::transaction::{BookId, Transaction};
use chrono::Duration;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// The book lending engine.
///
/// Holds the ledger, the wait queues, and the lending policy. All
/// operations take `&self`; the engine is `Send + Sync` and is meant to be
/// shared behind an `Arc` by concurrent callers.
///
/// # Invariants
///
/// - at most one `Active` transaction exists per book at any instant
/// - every `Requested` transaction has exactly one matching queue entry,
///   and vice versa
/// - a queued patron can only check out from the head of the queue
pub struct LendingEngine {
    /// Every transaction ever created, open and closed.
    ledger: TransactionLedger,

    /// Per-book FIFO hold queues.
    queue: BookQueue,

    /// Overdue fee computation, configured from the lending policy.
    calculator: FeeCalculator,

    /// Checkout duration from the lending policy.
    loan_period: Duration,

    /// Time source; swapped for a manual clock in tests.
    clock: Arc<dyn Clock>,

    /// One mutex per book id, created on first touch. The registry lock is
    /// held only long enough to clone the book's mutex out.
    book_locks: Mutex<HashMap<BookId, Arc<Mutex<()>>>>,
}

impl LendingEngine {
    /// Creates an engine using the system clock.
    pub fn new(policy: LendingPolicy) -> Self {
        LendingEngine::with_clock(policy, Arc::new(SystemClock))
    }

    /// Creates an engine with an injected time source.
    pub fn with_clock(policy: LendingPolicy, clock: Arc<dyn Clock>) -> Self {
        LendingEngine {
            ledger: TransactionLedger::new(),
            queue: BookQueue::new(),
            calculator: FeeCalculator::new(policy.daily_fine),
            loan_period: policy.loan_period,
            clock,
            book_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Fetches (or creates) the mutex guarding one book's state.
    fn book_lock(&self, book_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.book_locks.lock().expect("lock registry poisoned");
        locks
            .entry(book_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Places a hold on a book.
    ///
    /// If the book has no active checkout and nobody is waiting, the hold
    /// is an instant checkout: the transaction is created `Active` with
    /// checkout and due dates stamped. Otherwise the transaction is created
    /// `Requested` and the patron joins the book's queue.
    ///
    /// Fails with `AlreadyHeld` if the patron already has an open
    /// transaction for this book.
    pub fn reserve(&self, book_id: &str, patron_id: &str) -> Result<Transaction> {
        let lock = self.book_lock(book_id);
        let _guard = lock.lock().expect("book lock poisoned");

        if self.ledger.open_transaction(book_id, patron_id).is_some() {
            warn!(
                "reserve rejected: patron {} already holds book {}",
                patron_id, book_id
            );
            return Err(LendingError::AlreadyHeld {
                book_id: book_id.to_string(),
                patron_id: patron_id.to_string(),
            });
        }

        let now = self.clock.now();
        let tx = if self.ledger.active_checkout(book_id).is_none()
            && self.queue.is_empty(book_id)
        {
            // Free book, nobody waiting: the reservation is an instant
            // checkout, librarian unassigned.
            let tx = Transaction::active(
                self.ledger.next_id(),
                book_id.to_string(),
                patron_id.to_string(),
                None,
                now,
                now + self.loan_period,
            );
            self.ledger.add(tx.clone());
            debug!(
                "reserve: instant checkout of book {} to patron {}, due {}",
                book_id,
                patron_id,
                now + self.loan_period
            );
            tx
        } else {
            let entry = self.queue.enqueue(book_id, patron_id, now)?;
            let tx = Transaction::requested(
                self.ledger.next_id(),
                book_id.to_string(),
                patron_id.to_string(),
                now,
            );
            self.ledger.add(tx.clone());
            debug!(
                "reserve: patron {} queued for book {} at position {} (seq {})",
                patron_id,
                book_id,
                self.queue.len(book_id),
                entry.seq
            );
            tx
        };
        Ok(tx)
    }

    /// Checks a book out to a patron, mediated by a librarian.
    ///
    /// Valid when the patron is at the head of the book's queue (their
    /// `Requested` hold converts to an `Active` checkout), or when the book
    /// is free with an empty queue (walk-in checkout).
    ///
    /// Fails with `BookUnavailable` while another checkout is active, and
    /// with `NotAtHeadOfQueue` if anyone enqueued earlier is still waiting.
    pub fn checkout(
        &self,
        book_id: &str,
        patron_id: &str,
        librarian_id: &str,
    ) -> Result<Transaction> {
        let lock = self.book_lock(book_id);
        let _guard = lock.lock().expect("book lock poisoned");

        if self.ledger.active_checkout(book_id).is_some() {
            warn!(
                "checkout rejected: book {} is already out, patron {} must wait",
                book_id, patron_id
            );
            return Err(LendingError::BookUnavailable {
                book_id: book_id.to_string(),
            });
        }

        let now = self.clock.now();
        match self.queue.peek(book_id) {
            Some(head) if head.patron_id == patron_id => {
                self.queue.dequeue(book_id)?;

                // Safety: a queue entry always has a matching Requested
                // transaction; both are maintained under the book lock.
                let mut tx = self
                    .ledger
                    .open_transaction(book_id, patron_id)
                    .expect("queue head has a matching hold transaction");
                tx.activate(librarian_id.to_string(), now, now + self.loan_period);
                self.ledger.update(tx.clone())?;
                debug!(
                    "checkout: book {} to queued patron {} by librarian {}, due {}",
                    book_id,
                    patron_id,
                    librarian_id,
                    now + self.loan_period
                );
                Ok(tx)
            }
            Some(_) => {
                // Queue presence means ordering must be honored, even for
                // patrons who never enqueued.
                warn!(
                    "checkout rejected: patron {} is not at the head of the queue for book {}",
                    patron_id, book_id
                );
                Err(LendingError::NotAtHeadOfQueue {
                    book_id: book_id.to_string(),
                    patron_id: patron_id.to_string(),
                })
            }
            None => {
                // Walk-in checkout on a free, unqueued book.
                let tx = Transaction::active(
                    self.ledger.next_id(),
                    book_id.to_string(),
                    patron_id.to_string(),
                    Some(librarian_id.to_string()),
                    now,
                    now + self.loan_period,
                );
                self.ledger.add(tx.clone());
                debug!(
                    "checkout: walk-in, book {} to patron {} by librarian {}, due {}",
                    book_id,
                    patron_id,
                    librarian_id,
                    now + self.loan_period
                );
                Ok(tx)
            }
        }
    }

    /// Returns a checked-out book.
    ///
    /// Stamps the return date and, if the book came back past its due date,
    /// records the overdue fee. The queue head (if any) is *not* converted
    /// automatically; that patron claims the book with an explicit
    /// [`checkout`](Self::checkout) once notified.
    ///
    /// Fails with `NoActiveCheckout` unless this exact (book, patron) pair
    /// has an `Active` transaction.
    pub fn return_book(&self, book_id: &str, patron_id: &str) -> Result<Transaction> {
        let lock = self.book_lock(book_id);
        let _guard = lock.lock().expect("book lock poisoned");

        let mut tx = self
            .ledger
            .active_checkout(book_id)
            .filter(|tx| tx.patron_id == patron_id)
            .ok_or_else(|| LendingError::NoActiveCheckout {
                book_id: book_id.to_string(),
                patron_id: patron_id.to_string(),
            })?;

        let now = self.clock.now();
        // Safety: an Active transaction always carries a due date
        let due = tx.due_at.expect("active checkout has a due date");
        let fee = if now > due {
            let fee = self.calculator.fee_for(now - due);
            warn!(
                "return: book {} from patron {} is overdue, fee {}",
                book_id, patron_id, fee
            );
            Some(fee)
        } else {
            debug!("return: book {} from patron {} on time", book_id, patron_id);
            None
        };

        tx.close_returned(now, fee);
        self.ledger.update(tx.clone())?;
        Ok(tx)
    }

    /// Cancels a patron's hold, removing their queue entry and closing the
    /// `Requested` transaction as `Cancelled`.
    ///
    /// Fails with `HoldNotFound` if the patron is not waiting for the book.
    pub fn cancel_hold(&self, book_id: &str, patron_id: &str) -> Result<Transaction> {
        let lock = self.book_lock(book_id);
        let _guard = lock.lock().expect("book lock poisoned");

        self.queue.remove(book_id, patron_id)?;

        // Safety: a queue entry always has a matching Requested
        // transaction; both are maintained under the book lock.
        let mut tx = self
            .ledger
            .open_transaction(book_id, patron_id)
            .expect("queue entry has a matching hold transaction");
        tx.cancel();
        self.ledger.update(tx.clone())?;
        debug!("cancel: patron {} dropped hold on book {}", patron_id, book_id);
        Ok(tx)
    }

    /// Books whose active checkout is past due right now.
    ///
    /// Recomputed fresh on every call, sorted for deterministic output, and
    /// read-only: calling it twice without intervening mutation yields the
    /// same result.
    pub fn overdue_scan(&self) -> Vec<BookId> {
        self.ledger
            .overdue_book_ids(self.clock.now())
            .into_iter()
            .collect()
    }

    /// The active checkout for one book, if any.
    pub fn active_checkout(&self, book_id: &str) -> Option<Transaction> {
        self.ledger.active_checkout(book_id)
    }

    /// All books currently checked out, sorted.
    pub fn borrowed_books(&self) -> Vec<BookId> {
        self.ledger.borrowed_book_ids().into_iter().collect()
    }

    /// Number of patrons waiting for a book.
    pub fn queue_length(&self, book_id: &str) -> usize {
        self.queue.len(book_id)
    }

    /// Full borrowing history for a book, oldest first. Closed transactions
    /// are never deleted.
    pub fn history(&self, book_id: &str) -> Vec<Transaction> {
        self.ledger.history(book_id)
    }
}

impl Default for LendingEngine {
    fn default() -> Self {
        LendingEngine::new(LendingPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::money::Money;
    use crate::transaction::{TransactionKind, TransactionState};
    use chrono::{TimeZone, Utc};
    use std::str::FromStr;

    fn engine() -> (LendingEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
        ));
        let policy = LendingPolicy::new(14, Money::from_str("0.50").unwrap());
        (LendingEngine::with_clock(policy, clock.clone()), clock)
    }

    #[test]
    fn test_reserve_free_book_is_instant_checkout() {
        let (engine, clock) = engine();
        let tx = engine.reserve("x", "p1").unwrap();

        assert_eq!(tx.state, TransactionState::Active);
        assert_eq!(tx.kind, TransactionKind::Checkout);
        assert_eq!(tx.checked_out_at, Some(clock.now()));
        assert_eq!(tx.due_at, Some(clock.now() + Duration::days(14)));
        assert!(tx.librarian_id.is_none());
        assert_eq!(engine.queue_length("x"), 0);
    }

    #[test]
    fn test_reserve_busy_book_queues() {
        let (engine, _clock) = engine();
        engine.reserve("x", "p1").unwrap();

        let tx = engine.reserve("x", "p2").unwrap();
        assert_eq!(tx.state, TransactionState::Requested);
        assert_eq!(tx.kind, TransactionKind::Reservation);
        assert!(tx.due_at.is_none());
        assert_eq!(engine.queue_length("x"), 1);
    }

    #[test]
    fn test_reserve_twice_fails_already_held() {
        let (engine, _clock) = engine();
        engine.reserve("x", "p1").unwrap();
        engine.reserve("x", "p2").unwrap();

        // Both an Active holder and a Requested holder are rejected.
        assert!(matches!(
            engine.reserve("x", "p1").unwrap_err(),
            LendingError::AlreadyHeld { .. }
        ));
        assert!(matches!(
            engine.reserve("x", "p2").unwrap_err(),
            LendingError::AlreadyHeld { .. }
        ));
    }

    #[test]
    fn test_walk_in_checkout_equivalent_to_reserve() {
        let (engine, clock) = engine();
        let tx = engine.checkout("x", "p1", "lib1").unwrap();

        assert_eq!(tx.state, TransactionState::Active);
        assert_eq!(tx.due_at, Some(clock.now() + Duration::days(14)));
        assert_eq!(tx.librarian_id.as_deref(), Some("lib1"));
    }

    #[test]
    fn test_checkout_of_busy_book_fails() {
        let (engine, _clock) = engine();
        engine.reserve("x", "p1").unwrap();

        assert_eq!(
            engine.checkout("x", "p2", "lib1").unwrap_err(),
            LendingError::BookUnavailable {
                book_id: "x".into()
            }
        );
    }

    #[test]
    fn test_queue_head_converts_hold_on_checkout() {
        let (engine, clock) = engine();
        engine.reserve("x", "p1").unwrap();
        let hold = engine.reserve("x", "p2").unwrap();
        engine.return_book("x", "p1").unwrap();

        let tx = engine.checkout("x", "p2", "lib1").unwrap();
        // Same transaction record, converted in place.
        assert_eq!(tx.id, hold.id);
        assert_eq!(tx.kind, TransactionKind::Checkout);
        assert_eq!(tx.state, TransactionState::Active);
        assert_eq!(tx.checked_out_at, Some(clock.now()));
        assert_eq!(engine.queue_length("x"), 0);
    }

    #[test]
    fn test_non_head_patron_cannot_jump_queue() {
        let (engine, _clock) = engine();
        engine.reserve("x", "p1").unwrap();
        engine.reserve("x", "p2").unwrap();
        engine.reserve("x", "p3").unwrap();
        engine.return_book("x", "p1").unwrap();

        // The book is free, but p3 is behind p2. So is a walk-in stranger.
        assert!(matches!(
            engine.checkout("x", "p3", "lib1").unwrap_err(),
            LendingError::NotAtHeadOfQueue { .. }
        ));
        assert!(matches!(
            engine.checkout("x", "p9", "lib1").unwrap_err(),
            LendingError::NotAtHeadOfQueue { .. }
        ));
        assert!(engine.checkout("x", "p2", "lib1").is_ok());
    }

    #[test]
    fn test_return_requires_matching_patron() {
        let (engine, _clock) = engine();
        engine.reserve("x", "p1").unwrap();

        assert!(matches!(
            engine.return_book("x", "p2").unwrap_err(),
            LendingError::NoActiveCheckout { .. }
        ));
        assert!(matches!(
            engine.return_book("y", "p1").unwrap_err(),
            LendingError::NoActiveCheckout { .. }
        ));
    }

    #[test]
    fn test_on_time_return_has_no_fee() {
        let (engine, clock) = engine();
        engine.reserve("x", "p1").unwrap();
        clock.advance(Duration::days(10));

        let tx = engine.return_book("x", "p1").unwrap();
        assert_eq!(tx.state, TransactionState::Returned);
        assert!(tx.fee.is_none());
        assert!(!tx.was_overdue());
    }

    #[test]
    fn test_late_return_accrues_fee() {
        let (engine, clock) = engine();
        engine.reserve("x", "p1").unwrap();
        clock.advance(Duration::days(17));

        // Three days past a fourteen-day loan at 0.50/day.
        let tx = engine.return_book("x", "p1").unwrap();
        assert_eq!(tx.fee.unwrap().to_string(), "1.50");
        assert!(tx.was_overdue());
    }

    #[test]
    fn test_return_does_not_auto_convert_queue_head() {
        let (engine, _clock) = engine();
        engine.reserve("x", "p1").unwrap();
        let hold = engine.reserve("x", "p2").unwrap();
        engine.return_book("x", "p1").unwrap();

        // The hold stays Requested until p2 claims it.
        let stored = engine.history("x");
        let hold_now = stored.iter().find(|t| t.id == hold.id).unwrap();
        assert_eq!(hold_now.state, TransactionState::Requested);
        assert_eq!(engine.queue_length("x"), 1);
        assert!(engine.active_checkout("x").is_none());
    }

    #[test]
    fn test_cancel_hold_frees_queue_slot() {
        let (engine, _clock) = engine();
        engine.reserve("x", "p1").unwrap();
        let hold = engine.reserve("x", "p2").unwrap();

        let tx = engine.cancel_hold("x", "p2").unwrap();
        assert_eq!(tx.id, hold.id);
        assert_eq!(tx.state, TransactionState::Cancelled);
        assert_eq!(engine.queue_length("x"), 0);

        // A cancelled hold no longer blocks a fresh reservation.
        let again = engine.reserve("x", "p2").unwrap();
        assert_eq!(again.state, TransactionState::Requested);
    }

    #[test]
    fn test_cancel_hold_without_hold_fails() {
        let (engine, _clock) = engine();
        engine.reserve("x", "p1").unwrap();

        // p1 has an Active checkout, not a hold.
        assert!(matches!(
            engine.cancel_hold("x", "p1").unwrap_err(),
            LendingError::HoldNotFound { .. }
        ));
    }

    #[test]
    fn test_overdue_scan_is_sorted_and_fresh() {
        let (engine, clock) = engine();
        engine.reserve("b", "p1").unwrap();
        engine.reserve("a", "p2").unwrap();
        engine.reserve("c", "p3").unwrap();

        clock.advance(Duration::days(15));
        assert_eq!(engine.overdue_scan(), vec!["a", "b", "c"]);
        // Idempotent without intervening mutation.
        assert_eq!(engine.overdue_scan(), vec!["a", "b", "c"]);

        engine.return_book("b", "p1").unwrap();
        assert_eq!(engine.overdue_scan(), vec!["a", "c"]);
    }

    #[test]
    fn test_borrowed_books_tracks_active_checkouts() {
        let (engine, _clock) = engine();
        engine.reserve("x", "p1").unwrap();
        engine.reserve("y", "p2").unwrap();
        engine.return_book("x", "p1").unwrap();

        assert_eq!(engine.borrowed_books(), vec!["y"]);
    }

    #[test]
    fn test_patron_may_hold_several_different_books() {
        let (engine, _clock) = engine();
        engine.reserve("x", "p1").unwrap();
        engine.reserve("y", "p1").unwrap();

        assert_eq!(engine.borrowed_books(), vec!["x", "y"]);
    }

    #[test]
    fn test_at_most_one_active_checkout_per_book() {
        let (engine, _clock) = engine();
        engine.reserve("x", "p1").unwrap();
        engine.reserve("x", "p2").unwrap();
        engine.return_book("x", "p1").unwrap();
        engine.checkout("x", "p2", "lib1").unwrap();

        let active: Vec<_> = engine
            .history("x")
            .into_iter()
            .filter(|t| t.state == TransactionState::Active)
            .collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].patron_id, "p2");
    }
}
