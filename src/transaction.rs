//! Lending transaction records and their state machine.
//!
//! A `Transaction` is the audit record of one lending lifecycle:
//! `Requested -> Active -> Returned`, or `Requested -> Cancelled`. Closed
//! records are never deleted; they remain as borrowing history.

use crate::money::Money;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// ISBN-equivalent book key.
pub type BookId = String;

/// Opaque patron identifier.
pub type PatronId = String;

/// Opaque librarian identifier.
pub type LibrarianId = String;

/// Ledger-allocated transaction id. Monotonic, so ids are time-ordered.
pub type TransactionId = u64;

/// What kind of lending record this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransactionKind {
    /// A hold waiting in the book's queue. Converts to `Checkout` when
    /// claimed, or stays a `Reservation` if cancelled.
    Reservation,

    /// An actual loan with checkout and due dates.
    Checkout,
}

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransactionState {
    /// Hold placed, book not yet handed over.
    Requested,

    /// Checkout granted; the book is out with the patron.
    Active,

    /// Book returned. Terminal.
    Returned,

    /// Hold withdrawn before checkout. Terminal.
    Cancelled,
}

impl TransactionState {
    /// Returns `true` for states that still demand engine action.
    pub fn is_open(&self) -> bool {
        matches!(self, TransactionState::Requested | TransactionState::Active)
    }
}

/// A single lending transaction.
///
/// # Invariants
///
/// - `checked_out_at` and `due_at` are set together, exactly when the
///   transaction enters `Active`
/// - `returned_at` is set exactly when the transaction enters `Returned`
/// - `fee` is only ever set on `Returned` transactions that came back late
/// - state and timestamps change together in one record write; readers never
///   observe a half-stamped record
#[derive(Debug, Clone, Serialize)]
pub struct Transaction {
    /// Ledger-allocated id, unique and time-ordered.
    pub id: TransactionId,

    /// The book this transaction concerns.
    pub book_id: BookId,

    /// The patron borrowing or waiting.
    pub patron_id: PatronId,

    /// The librarian who granted the checkout, once one has.
    pub librarian_id: Option<LibrarianId>,

    /// Reservation or checkout.
    pub kind: TransactionKind,

    /// Current lifecycle state.
    pub state: TransactionState,

    /// When the patron first asked for the book.
    pub reserved_at: DateTime<Utc>,

    /// When the checkout was granted.
    pub checked_out_at: Option<DateTime<Utc>>,

    /// When the book is due back. Set at checkout.
    pub due_at: Option<DateTime<Utc>>,

    /// When the book came back.
    pub returned_at: Option<DateTime<Utc>>,

    /// Overdue fee charged at return, if the book was late.
    pub fee: Option<Money>,
}

impl Transaction {
    /// Creates a hold in state `Requested`. No dates beyond the reservation
    /// stamp are set yet.
    pub fn requested(
        id: TransactionId,
        book_id: BookId,
        patron_id: PatronId,
        now: DateTime<Utc>,
    ) -> Self {
        Transaction {
            id,
            book_id,
            patron_id,
            librarian_id: None,
            kind: TransactionKind::Reservation,
            state: TransactionState::Requested,
            reserved_at: now,
            checked_out_at: None,
            due_at: None,
            returned_at: None,
            fee: None,
        }
    }

    /// Creates a transaction that is `Active` from the start: a reservation
    /// on a free book, or a walk-in checkout.
    pub fn active(
        id: TransactionId,
        book_id: BookId,
        patron_id: PatronId,
        librarian_id: Option<LibrarianId>,
        now: DateTime<Utc>,
        due_at: DateTime<Utc>,
    ) -> Self {
        Transaction {
            id,
            book_id,
            patron_id,
            librarian_id,
            kind: TransactionKind::Checkout,
            state: TransactionState::Active,
            reserved_at: now,
            checked_out_at: Some(now),
            due_at: Some(due_at),
            returned_at: None,
            fee: None,
        }
    }

    /// Converts a `Requested` hold into an `Active` checkout, stamping the
    /// checkout date, due date, and granting librarian in one step.
    pub fn activate(
        &mut self,
        librarian_id: LibrarianId,
        now: DateTime<Utc>,
        due_at: DateTime<Utc>,
    ) {
        debug_assert_eq!(self.state, TransactionState::Requested);
        self.kind = TransactionKind::Checkout;
        self.state = TransactionState::Active;
        self.librarian_id = Some(librarian_id);
        self.checked_out_at = Some(now);
        self.due_at = Some(due_at);
    }

    /// Closes an `Active` checkout as `Returned`, recording the return stamp
    /// and any overdue fee.
    pub fn close_returned(&mut self, now: DateTime<Utc>, fee: Option<Money>) {
        debug_assert_eq!(self.state, TransactionState::Active);
        self.state = TransactionState::Returned;
        self.returned_at = Some(now);
        self.fee = fee;
    }

    /// Closes a `Requested` hold as `Cancelled`.
    pub fn cancel(&mut self) {
        debug_assert_eq!(self.state, TransactionState::Requested);
        self.state = TransactionState::Cancelled;
    }

    /// Returns `true` if this record was returned after its due date.
    pub fn was_overdue(&self) -> bool {
        match (self.returned_at, self.due_at) {
            (Some(returned), Some(due)) => returned > due,
            _ => false,
        }
    }
}
