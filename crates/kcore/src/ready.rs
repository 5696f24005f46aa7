//! Multi-level ready list.
//!
//! One FIFO queue per priority level plus a bitmap recording non-emptiness,
//! so "find the best ready priority" is a bit scan rather than a walk over
//! the levels. Convention throughout the workspace: lower index = higher
//! priority, for thread levels and interrupt levels alike.

use crate::queue::{ThreadQueue, ThreadRef};

const WORD_BITS: usize = u64::BITS as usize;

/// Per-priority ready queues with an O(1) best-priority lookup.
///
/// Invariant: bit `i` of the mask is set if and only if `levels[i]` is
/// non-empty. Every mutation maintains it; `check_invariants` verifies it
/// for tests.
pub struct ReadyList {
    levels: Vec<ThreadQueue>,
    mask: Vec<u64>,
}

impl ReadyList {
    pub fn new(levels: usize) -> Self {
        assert!(levels > 0, "ready list needs at least one priority level");
        Self {
            levels: (0..levels).map(|_| ThreadQueue::new()).collect(),
            mask: vec![0; levels.div_ceil(WORD_BITS)],
        }
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Adds a thread at the tail of its priority level.
    pub fn enqueue(&mut self, prio: usize, thread: ThreadRef) {
        self.assert_range(prio);
        self.levels[prio].append(thread);
        self.mask[prio / WORD_BITS] |= 1u64 << (prio % WORD_BITS);
    }

    /// Removes and returns the head of the given level, clearing its bit
    /// when the level empties.
    pub fn pop(&mut self, prio: usize) -> Option<ThreadRef> {
        self.assert_range(prio);
        let head = self.levels[prio].remove_first();
        if self.levels[prio].is_empty() {
            self.mask[prio / WORD_BITS] &= !(1u64 << (prio % WORD_BITS));
        }
        head
    }

    /// Removes a specific thread from the given level.
    pub fn remove(&mut self, prio: usize, thread: ThreadRef) -> bool {
        self.assert_range(prio);
        let removed = self.levels[prio].remove(thread);
        if self.levels[prio].is_empty() {
            self.mask[prio / WORD_BITS] &= !(1u64 << (prio % WORD_BITS));
        }
        removed
    }

    /// Best (lowest-index) non-empty priority, or None when fully empty.
    pub fn best(&self) -> Option<usize> {
        for (word_index, word) in self.mask.iter().enumerate() {
            if *word != 0 {
                return Some(word_index * WORD_BITS + word.trailing_zeros() as usize);
            }
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.mask.iter().all(|word| *word == 0)
    }

    /// Number of ready threads at the given level.
    pub fn level_len(&self, prio: usize) -> usize {
        self.assert_range(prio);
        self.levels[prio].len()
    }

    /// Total ready threads across all levels (diagnostics).
    pub fn len(&self) -> usize {
        self.levels.iter().map(ThreadQueue::len).sum()
    }

    /// Raw bitmap words (diagnostics).
    pub fn mask_words(&self) -> &[u64] {
        &self.mask
    }

    /// Verifies bit `i` set ⟺ level `i` non-empty; used after every
    /// scheduler-visible mutation in tests.
    pub fn check_invariants(&self) -> bool {
        self.levels.iter().enumerate().all(|(prio, queue)| {
            let bit = self.mask[prio / WORD_BITS] & (1u64 << (prio % WORD_BITS)) != 0;
            bit == !queue.is_empty()
        })
    }

    fn assert_range(&self, prio: usize) {
        assert!(
            prio < self.levels.len(),
            "priority {prio} exceeds supported range 0..{}",
            self.levels.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn best_prefers_lower_index() {
        let mut ready = ReadyList::new(8);
        assert_eq!(ready.best(), None);

        ready.enqueue(5, ThreadRef(1));
        assert_eq!(ready.best(), Some(5));

        ready.enqueue(2, ThreadRef(2));
        assert_eq!(ready.best(), Some(2));

        assert_eq!(ready.pop(2), Some(ThreadRef(2)));
        assert_eq!(ready.best(), Some(5));
        assert!(ready.check_invariants());
    }

    #[test]
    fn bitmap_tracks_emptiness() {
        let mut ready = ReadyList::new(4);
        ready.enqueue(1, ThreadRef(1));
        ready.enqueue(1, ThreadRef(2));
        assert!(ready.check_invariants());

        assert_eq!(ready.pop(1), Some(ThreadRef(1)));
        assert!(ready.check_invariants(), "bit must stay set while non-empty");

        assert_eq!(ready.pop(1), Some(ThreadRef(2)));
        assert!(ready.check_invariants());
        assert_eq!(ready.best(), None);
    }

    #[test]
    fn multi_word_bitmap_scan() {
        let mut ready = ReadyList::new(130);
        ready.enqueue(129, ThreadRef(1));
        assert_eq!(ready.best(), Some(129));

        ready.enqueue(64, ThreadRef(2));
        assert_eq!(ready.best(), Some(64));

        ready.enqueue(3, ThreadRef(3));
        assert_eq!(ready.best(), Some(3));
        assert!(ready.check_invariants());
    }

    #[test]
    fn remove_specific_clears_bit() {
        let mut ready = ReadyList::new(8);
        ready.enqueue(6, ThreadRef(9));
        assert!(ready.remove(6, ThreadRef(9)));
        assert_eq!(ready.best(), None);
        assert!(ready.check_invariants());
    }

    #[test]
    fn fifo_within_level() {
        let mut ready = ReadyList::new(8);
        ready.enqueue(4, ThreadRef(1));
        ready.enqueue(4, ThreadRef(2));
        ready.enqueue(4, ThreadRef(3));

        assert_eq!(ready.pop(4), Some(ThreadRef(1)));
        assert_eq!(ready.pop(4), Some(ThreadRef(2)));
        assert_eq!(ready.pop(4), Some(ThreadRef(3)));
    }

    #[test]
    #[should_panic(expected = "exceeds supported range")]
    fn out_of_range_priority_is_fatal() {
        let mut ready = ReadyList::new(4);
        ready.enqueue(4, ThreadRef(1));
    }
}
