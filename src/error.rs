//! Error types for the lending engine.
//!
//! Every variant is a recoverable, caller-visible business-rule violation
//! with a stable message, so the surrounding API layer can render
//! deterministic responses.

use crate::transaction::TransactionId;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, LendingError>;

/// Errors that can occur during engine operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LendingError {
    /// The patron already has an open hold or checkout for this book
    #[error("patron {patron_id} already holds book {book_id}")]
    AlreadyHeld { book_id: String, patron_id: String },

    /// Another patron's checkout is active for this book
    #[error("book {book_id} is currently checked out")]
    BookUnavailable { book_id: String },

    /// A queued patron tried to check out ahead of the queue head
    #[error("patron {patron_id} is not at the head of the queue for book {book_id}")]
    NotAtHeadOfQueue { book_id: String, patron_id: String },

    /// Return attempted without a matching active checkout
    #[error("no active checkout of book {book_id} by patron {patron_id}")]
    NoActiveCheckout { book_id: String, patron_id: String },

    /// The patron is already waiting in this book's queue
    #[error("patron {patron_id} is already queued for book {book_id}")]
    DuplicateHold { book_id: String, patron_id: String },

    /// Dequeue attempted on a book with no waiting patrons
    #[error("no patrons are queued for book {book_id}")]
    EmptyQueue { book_id: String },

    /// Hold cancellation for a patron who is not in the queue
    #[error("patron {patron_id} has no hold on book {book_id}")]
    HoldNotFound { book_id: String, patron_id: String },

    /// Ledger update referenced a transaction id that was never added
    #[error("unknown transaction id {id}")]
    UnknownTransaction { id: TransactionId },
}
