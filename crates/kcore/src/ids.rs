//! Recycling pool of small integer resource ids.
//!
//! Threads and message queues are identified by ids drawn from one pool.
//! Ids are recycled; staleness is detected by the owners (a handle is valid
//! only while its stored id matches the live descriptor's id).

const WORD_BITS: usize = u64::BITS as usize;

/// A system resource id. Id 0 is reserved and never issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Id(pub u32);

/// Bitmap-backed id pool with round-robin search.
///
/// Allocation scans forward from the most recently issued id, wrapping;
/// O(n) worst case but amortized O(1) under typical churn. Running out of
/// ids means the system was sized wrong, which is fatal.
pub struct IdPool {
    words: Vec<u64>,
    capacity: usize,
    cursor: usize,
    issued: usize,
}

impl IdPool {
    /// Creates a pool issuing ids `1..capacity`.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 1, "id pool needs at least one issuable id");
        let mut pool = Self {
            words: vec![0; capacity.div_ceil(WORD_BITS)],
            capacity,
            cursor: 0,
            issued: 0,
        };
        pool.set_bit(0); // id 0 is reserved
        pool
    }

    /// Issues a previously unused id.
    ///
    /// # Panics
    ///
    /// Panics when the pool is exhausted; this is a design-level fatal,
    /// not a recoverable error.
    pub fn allocate(&mut self) -> Id {
        for offset in 1..=self.capacity {
            let candidate = (self.cursor + offset) % self.capacity;
            if candidate == 0 {
                continue;
            }
            if !self.bit(candidate) {
                self.set_bit(candidate);
                self.cursor = candidate;
                self.issued += 1;
                return Id(candidate as u32);
            }
        }
        panic!("id pool exhausted ({} ids)", self.capacity - 1);
    }

    /// Returns an id to the pool.
    ///
    /// # Panics
    ///
    /// Panics on double free or on an id that was never issued; both are
    /// contract violations by the caller.
    pub fn free(&mut self, id: Id) {
        let index = id.0 as usize;
        assert!(index != 0 && index < self.capacity, "freeing id out of range: {id:?}");
        assert!(self.bit(index), "double free of id {id:?}");
        self.clear_bit(index);
        self.issued -= 1;
    }

    pub fn is_used(&self, id: Id) -> bool {
        let index = id.0 as usize;
        index < self.capacity && self.bit(index)
    }

    /// Number of ids currently issued.
    pub fn issued(&self) -> usize {
        self.issued
    }

    fn bit(&self, index: usize) -> bool {
        self.words[index / WORD_BITS] & (1u64 << (index % WORD_BITS)) != 0
    }

    fn set_bit(&mut self, index: usize) {
        self.words[index / WORD_BITS] |= 1u64 << (index % WORD_BITS);
    }

    fn clear_bit(&mut self, index: usize) {
        self.words[index / WORD_BITS] &= !(1u64 << (index % WORD_BITS));
    }
}
