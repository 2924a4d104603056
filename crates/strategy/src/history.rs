use std::collections::VecDeque;

/// Fixed-capacity rolling history, oldest first.
///
/// Detectors size one of these to the exact lookback they need. Readiness
/// is a question of `len()`, never of sentinel values.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append, evicting the oldest item when full.
    pub fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() == self.capacity
    }

    pub fn last(&self) -> Option<&T> {
        self.items.back()
    }

    /// The item `n` steps before the newest (`ago(0)` is the newest).
    pub fn ago(&self, n: usize) -> Option<&T> {
        self.items.len().checked_sub(n + 1).and_then(|i| self.items.get(i))
    }

    pub fn iter(&self) -> std::collections::vec_deque::Iter<'_, T> {
        self.items.iter()
    }
}
