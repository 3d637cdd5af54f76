//! Fixed-capacity FIFO buffers
//!
//! Used for the filtered-distance trend of each entity and for the window
//! of recent raw positions. Pushing past capacity evicts the oldest entry.

use std::collections::VecDeque;

/// Bounded, order-preserving sequence
#[derive(Debug, Clone)]
pub struct BoundedHistory<T> {
    items: VecDeque<T>,
    capacity: usize,
}

/// Recent filtered distances (m), oldest first
pub type TrendHistory = BoundedHistory<f64>;

impl<T: Clone> BoundedHistory<T> {
    /// Create an empty history. A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { items: VecDeque::with_capacity(capacity), capacity }
    }

    /// Append a value, returning the evicted oldest value if the buffer was full
    pub fn push(&mut self, value: T) -> Option<T> {
        let evicted = if self.items.len() == self.capacity { self.items.pop_front() } else { None };
        self.items.push_back(value);
        evicted
    }

    /// Current contents, oldest to newest
    pub fn snapshot(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
