//! Per-book FIFO wait queues for holds.
//!
//! Each book id has an independent queue; operations on different books
//! never interact. Ordering is by a global monotonic sequence number
//! allocated at enqueue time, so entries enqueued within the same clock
//! tick still dequeue in insertion order.

use crate::error::{LendingError, Result};
use crate::transaction::{BookId, PatronId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// One patron's place in a book's wait queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueueEntry {
    /// The book being waited on.
    pub book_id: BookId,

    /// The waiting patron.
    pub patron_id: PatronId,

    /// When the hold was placed.
    pub enqueued_at: DateTime<Utc>,

    /// Insertion sequence number; the FIFO tie-break when enqueue
    /// timestamps collide.
    pub seq: u64,
}

/// FIFO wait queues, one per book id.
///
/// Safe for concurrent use across distinct book ids; the map lock is held
/// only for the duration of a single queue operation.
#[derive(Debug, Default)]
pub struct BookQueue {
    queues: RwLock<HashMap<BookId, VecDeque<QueueEntry>>>,
    next_seq: AtomicU64,
}

impl BookQueue {
    /// Creates an empty queue set.
    pub fn new() -> Self {
        BookQueue::default()
    }

    /// Appends a patron to the tail of a book's queue.
    ///
    /// Fails with `DuplicateHold` if the patron is already waiting for
    /// that book.
    pub fn enqueue(
        &self,
        book_id: &str,
        patron_id: &str,
        now: DateTime<Utc>,
    ) -> Result<QueueEntry> {
        let mut queues = self.queues.write().expect("queue lock poisoned");
        let queue = queues.entry(book_id.to_string()).or_default();

        if queue.iter().any(|e| e.patron_id == patron_id) {
            return Err(LendingError::DuplicateHold {
                book_id: book_id.to_string(),
                patron_id: patron_id.to_string(),
            });
        }

        let entry = QueueEntry {
            book_id: book_id.to_string(),
            patron_id: patron_id.to_string(),
            enqueued_at: now,
            // Allocated under the write lock, so seq order matches
            // insertion order.
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        };
        queue.push_back(entry.clone());
        Ok(entry)
    }

    /// Removes and returns the head entry (lowest sequence number).
    ///
    /// Fails with `EmptyQueue` if no patron is waiting.
    pub fn dequeue(&self, book_id: &str) -> Result<QueueEntry> {
        let mut queues = self.queues.write().expect("queue lock poisoned");
        let entry = queues
            .get_mut(book_id)
            .and_then(|q| q.pop_front())
            .ok_or_else(|| LendingError::EmptyQueue {
                book_id: book_id.to_string(),
            })?;

        // Drop emptied queues so the map doesn't grow with dead keys.
        if queues.get(book_id).is_some_and(|q| q.is_empty()) {
            queues.remove(book_id);
        }
        Ok(entry)
    }

    /// Read-only look at the head entry, if any.
    pub fn peek(&self, book_id: &str) -> Option<QueueEntry> {
        let queues = self.queues.read().expect("queue lock poisoned");
        queues.get(book_id).and_then(|q| q.front()).cloned()
    }

    /// Number of patrons currently waiting for a book.
    pub fn len(&self, book_id: &str) -> usize {
        let queues = self.queues.read().expect("queue lock poisoned");
        queues.get(book_id).map_or(0, |q| q.len())
    }

    /// Returns `true` if nobody is waiting for the book.
    pub fn is_empty(&self, book_id: &str) -> bool {
        self.len(book_id) == 0
    }

    /// Removes a specific patron's entry, wherever it sits in the queue.
    ///
    /// Used when a patron cancels a hold. Fails with `HoldNotFound` if the
    /// patron is not waiting for that book.
    pub fn remove(&self, book_id: &str, patron_id: &str) -> Result<QueueEntry> {
        let mut queues = self.queues.write().expect("queue lock poisoned");
        let queue = queues
            .get_mut(book_id)
            .ok_or_else(|| LendingError::HoldNotFound {
                book_id: book_id.to_string(),
                patron_id: patron_id.to_string(),
            })?;

        let pos = queue
            .iter()
            .position(|e| e.patron_id == patron_id)
            .ok_or_else(|| LendingError::HoldNotFound {
                book_id: book_id.to_string(),
                patron_id: patron_id.to_string(),
            })?;

        // Safety: position was found just above
        let entry = queue.remove(pos).expect("entry exists at found position");
        if queue.is_empty() {
            queues.remove(book_id);
        }
        Ok(entry)
    }
}
