//! Global injection queue.
//!
//! A thread-safe unbounded queue for work submitted from threads that are
//! not workers of the pool: transport delivery threads and the main thread.

use crossbeam_queue::SegQueue;

/// A global work queue.
pub(crate) struct GlobalQueue<T> {
    inner: SegQueue<T>,
}

impl<T> GlobalQueue<T> {
    /// Creates a new global queue.
    pub(crate) fn new() -> Self {
        Self {
            inner: SegQueue::new(),
        }
    }

    /// Pushes an item to the global queue.
    pub(crate) fn push(&self, item: T) {
        self.inner.push(item);
    }

    /// Pops an item from the global queue.
    pub(crate) fn pop(&self) -> Option<T> {
        self.inner.pop()
    }

    /// Returns true if the queue is empty.
    pub(crate) fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
