//! Per-worker local queue.
//!
//! Uses a lock-based deque for LIFO push/pop (owner) and FIFO steal (thief).
//! Recursive `async` spawns land here, so the owner keeps working depth-first
//! while thieves take the oldest, usually largest, pieces of work.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use super::worker::WorkerId;

/// A local work queue for a worker.
///
/// This queue is single-producer, multi-consumer. The worker owning this
/// queue pushes and pops from one end (LIFO), while other workers steal
/// from the other end (FIFO).
pub(crate) struct LocalQueue<T> {
    owner: WorkerId,
    inner: Arc<Mutex<VecDeque<T>>>,
}

impl<T> LocalQueue<T> {
    /// Creates a new local queue owned by `owner`.
    pub(crate) fn new(owner: WorkerId) -> Self {
        Self {
            owner,
            inner: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Pushes an item to the local queue.
    pub(crate) fn push(&self, item: T) {
        self.inner.lock().push_back(item);
    }

    /// Pops an item from the local queue (LIFO).
    pub(crate) fn pop(&self) -> Option<T> {
        self.inner.lock().pop_back()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Creates a stealer for this queue.
    pub(crate) fn stealer(&self) -> Stealer<T> {
        Stealer {
            owner: self.owner,
            inner: Arc::clone(&self.inner),
        }
    }
}

/// A handle to steal work from a local queue.
pub(crate) struct Stealer<T> {
    owner: WorkerId,
    inner: Arc<Mutex<VecDeque<T>>>,
}

impl<T> Clone for Stealer<T> {
    fn clone(&self) -> Self {
        Self {
            owner: self.owner,
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Stealer<T> {
    /// The worker whose queue this handle steals from.
    pub(crate) const fn owner(&self) -> WorkerId {
        self.owner
    }

    /// Steals the oldest item from the queue.
    pub(crate) fn steal(&self) -> Option<T> {
        self.inner.lock().pop_front()
    }
}
