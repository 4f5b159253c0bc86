//! Bounded submission queue with an evict-oldest overflow policy.
//!
//! When the queue is full, pushing a new entry drops the oldest not-yet-
//! started entry instead of rejecting the newest. The map view favours
//! freshness of what is visible over exhaustive processing of a backlog:
//! the oldest queued tile is the one most likely to have scrolled away.
//!
//! The queue is not thread-safe; the worker pool wraps it in a `Mutex`.

use std::collections::VecDeque;

/// FIFO queue with a fixed capacity and evict-oldest overflow behaviour.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    /// Creates a queue with the given capacity. A capacity of zero is
    /// treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Enqueues an entry.
    ///
    /// If the queue is at capacity, the oldest entry is removed to make room
    /// and returned so the caller can account for the eviction.
    pub fn push(&mut self, entry: T) -> Option<T> {
        let evicted = if self.entries.len() == self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(entry);
        evicted
    }

    /// Dequeues the oldest entry.
    pub fn pop(&mut self) -> Option<T> {
        self.entries.pop_front()
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no entries are queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Removes all queued entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
