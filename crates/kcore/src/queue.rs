//! FIFO thread queue.
//!
//! Queues hold arena indices, never descriptors: membership is a pure
//! relation and the thread arena in `ksys` stays the single owner. A thread
//! is a member of at most one queue at a time; the arena records which one
//! through its wait-channel back-reference, and enforces the invariant.

use std::collections::VecDeque;

/// Stable arena index of a thread descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadRef(pub u32);

impl ThreadRef {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Ordered sequence of threads, FIFO for fairness among equals.
#[derive(Debug, Default)]
pub struct ThreadQueue {
    items: VecDeque<ThreadRef>,
}

impl ThreadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a thread at the tail.
    pub fn append(&mut self, thread: ThreadRef) {
        debug_assert!(!self.items.contains(&thread), "thread already queued");
        self.items.push_back(thread);
    }

    /// Removes and returns the head, if any.
    pub fn remove_first(&mut self) -> Option<ThreadRef> {
        self.items.pop_front()
    }

    /// Removes a specific member from wherever it sits.
    ///
    /// Precondition: the thread's current queue is this queue. Returns
    /// false when the member was not found (caller contract violation,
    /// asserted in debug builds).
    pub fn remove(&mut self, thread: ThreadRef) -> bool {
        match self.items.iter().position(|t| *t == thread) {
            Some(pos) => {
                self.items.remove(pos);
                true
            }
            None => {
                debug_assert!(false, "thread {thread:?} not in this queue");
                false
            }
        }
    }

    /// Head of the queue without removing it.
    pub fn first(&self) -> Option<ThreadRef> {
        self.items.front().copied()
    }

    /// Iterates members head to tail (diagnostics and listing only).
    pub fn iter(&self) -> impl Iterator<Item = ThreadRef> + '_ {
        self.items.iter().copied()
    }

    pub fn contains(&self, thread: ThreadRef) -> bool {
        self.items.contains(&thread)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let mut q = ThreadQueue::new();
        q.append(ThreadRef(1));
        q.append(ThreadRef(2));
        q.append(ThreadRef(3));

        assert_eq!(q.remove_first(), Some(ThreadRef(1)));
        assert_eq!(q.remove_first(), Some(ThreadRef(2)));
        assert_eq!(q.remove_first(), Some(ThreadRef(3)));
        assert_eq!(q.remove_first(), None);
    }

    #[test]
    fn remove_specific_member() {
        let mut q = ThreadQueue::new();
        q.append(ThreadRef(1));
        q.append(ThreadRef(2));
        q.append(ThreadRef(3));

        assert!(q.remove(ThreadRef(2)));
        assert_eq!(q.len(), 2);
        assert_eq!(q.remove_first(), Some(ThreadRef(1)));
        assert_eq!(q.remove_first(), Some(ThreadRef(3)));
    }

    #[test]
    fn peek_does_not_consume() {
        let mut q = ThreadQueue::new();
        q.append(ThreadRef(7));
        assert_eq!(q.first(), Some(ThreadRef(7)));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn iteration_matches_order() {
        let mut q = ThreadQueue::new();
        q.append(ThreadRef(5));
        q.append(ThreadRef(6));
        let seen: Vec<_> = q.iter().collect();
        assert_eq!(seen, vec![ThreadRef(5), ThreadRef(6)]);
    }
}
