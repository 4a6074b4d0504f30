//! # Lending Engine
//!
//! A book lending and queueing engine: per-book availability state machine,
//! FIFO hold queues, checkout/return transactions, and overdue fee accrual.
//!
//! ## Design Principles
//!
//! - **At most one active checkout per book**: enforced by a per-book
//!   critical section, so concurrent checkout races have exactly one winner
//! - **FIFO fairness**: holds convert to checkouts strictly in enqueue
//!   order, tie-broken by a monotonic sequence number
//! - **Append-only ledger**: closed transactions remain as borrowing
//!   history; records update atomically, never half-stamped
//! - **Deterministic time and money**: an injectable [`Clock`] and
//!   fixed-point [`Money`] keep due dates and fees reproducible
//!
//! ## Example
//!
//! ```
//! use lending_engine::{LendingEngine, LendingPolicy, TransactionState};
//!
//! let engine = LendingEngine::new(LendingPolicy::default());
//!
//! // A reservation on a free book is an instant checkout.
//! let tx = engine.reserve("978-0134685991", "patron-42").unwrap();
//! assert_eq!(tx.state, TransactionState::Active);
//!
//! engine.return_book("978-0134685991", "patron-42").unwrap();
//! ```

pub mod clock;
pub mod engine;
pub mod error;
pub mod fee;
pub mod ledger;
pub mod money;
pub mod queue;
pub mod transaction;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::LendingEngine;
pub use error::{LendingError, Result};
pub use fee::{FeeCalculator, LendingPolicy};
pub use ledger::TransactionLedger;
pub use money::Money;
pub use queue::{BookQueue, QueueEntry};
pub use transaction::{
    BookId, LibrarianId, PatronId, Transaction, TransactionId, TransactionKind, TransactionState,
};
