//! Owned FIFO of pool items
//!
//! Not thread-safe by itself; the pool wraps each queue in a mutex.

use std::collections::VecDeque;

/// FIFO queue, insertion order is processing order
#[derive(Debug)]
pub struct WorkQueue<T> {
    items: VecDeque<T>,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    /// Append at the tail
    pub fn push(&mut self, item: T) {
        self.items.push_back(item);
    }

    /// Remove from the head, `None` when empty
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Remove every queued item in order
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.items.drain(..)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut queue = WorkQueue::new();
        queue.push(1);
        queue.push(3);
        queue.push(5);
        queue.push(18);

        let mut seen = Vec::new();
        while let Some(v) = queue.pop() {
            seen.push(v);
        }
        assert_eq!(seen, vec![1, 3, 5, 18]);
    }

    #[test]
    fn test_pop_empty() {
        let mut queue: WorkQueue<u8> = WorkQueue::new();
        assert!(queue.pop().is_none());
        queue.push(7);
        assert_eq!(queue.pop(), Some(7));
        assert!(queue.pop().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drain() {
        let mut queue = WorkQueue::new();
        queue.push("a");
        queue.push("b");
        assert_eq!(queue.len(), 2);
        let drained: Vec<_> = queue.drain().collect();
        assert_eq!(drained, vec!["a", "b"]);
        assert!(queue.is_empty());
    }
}
