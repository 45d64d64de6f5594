//! Closed-addressing hash chains threaded through dense slot storage.
//!
//! A [`ChainIndex`] of capacity `m` owns two arrays of length `m`:
//! - `heads[b]`: first slot hashed into bucket `b`, or [`NIL`]
//! - `links[s]`: next slot in the same bucket as slot `s`, or [`NIL`]
//!
//! The index never stores keys. Callers pass the cached hash of a slot and a
//! predicate that compares the slot's key, so the same index serves byte-string
//! dictionaries, symbol-keyed child tables and crosstab rows.

use tracing::warn;

/// Chain terminator.
pub const NIL: u32 = u32::MAX;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainIndex {
    heads: Vec<u32>,
    links: Vec<u32>,
}

impl ChainIndex {
    /// Create an index with `capacity` buckets and slots, all empty.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity < NIL as usize, "chain index capacity overflow: {capacity}");
        ChainIndex {
            heads: vec![NIL; capacity],
            links: vec![NIL; capacity],
        }
    }

    /// Number of buckets (and addressable slots).
    #[inline]
    pub fn capacity(&self) -> usize {
        self.heads.len()
    }

    #[inline]
    fn bucket(&self, hash: u32) -> usize {
        hash as usize % self.heads.len()
    }

    /// Find the slot in `hash`'s bucket for which `matches` returns true.
    ///
    /// A chain longer than the capacity can only be a cycle; the walk stops
    /// there and reports a miss.
    pub fn find(&self, hash: u32, mut matches: impl FnMut(usize) -> bool) -> Option<usize> {
        if self.heads.is_empty() {
            return None;
        }
        let mut slot = self.heads[self.bucket(hash)];
        let mut steps = 0;
        while slot != NIL {
            if matches(slot as usize) {
                return Some(slot as usize);
            }
            steps += 1;
            if steps > self.capacity() {
                warn!(hash, "hash chain cycle detected during lookup");
                return None;
            }
            slot = self.links[slot as usize];
        }
        None
    }

    /// Push `slot` onto the front of `hash`'s chain.
    pub fn insert(&mut self, slot: usize, hash: u32) {
        debug_assert!(slot < self.capacity());
        let b = self.bucket(hash);
        self.links[slot] = self.heads[b];
        self.heads[b] = slot as u32;
    }

    /// Remove `slot` from `hash`'s chain. Returns false if it was not found.
    ///
    /// If the chain turns out to be cyclic, the pointer at the point of
    /// detection is forced to [`NIL`] so later walks terminate.
    pub fn unlink(&mut self, slot: usize, hash: u32) -> bool {
        if self.heads.is_empty() {
            return false;
        }
        let b = self.bucket(hash);
        let mut prev: Option<usize> = None;
        let mut cur = self.heads[b];
        let mut steps = 0;
        while cur != NIL {
            let c = cur as usize;
            if c == slot {
                let next = self.links[c];
                match prev {
                    None => self.heads[b] = next,
                    Some(p) => self.links[p] = next,
                }
                self.links[c] = NIL;
                return true;
            }
            steps += 1;
            if steps > self.capacity() {
                warn!(slot, bucket = b, "hash chain cycle detected, truncating chain");
                self.cut(b, prev);
                return false;
            }
            prev = Some(c);
            cur = self.links[c];
        }
        false
    }

    /// The entry at slot `from` has been moved to slot `to`: make the chain
    /// point at `to` instead. `to` must already be unlinked.
    pub fn relink(&mut self, from: usize, to: usize, hash: u32) -> bool {
        let b = self.bucket(hash);
        let mut prev: Option<usize> = None;
        let mut cur = self.heads[b];
        let mut steps = 0;
        while cur != NIL {
            let c = cur as usize;
            if c == from {
                match prev {
                    None => self.heads[b] = to as u32,
                    Some(p) => self.links[p] = to as u32,
                }
                self.links[to] = self.links[from];
                self.links[from] = NIL;
                return true;
            }
            steps += 1;
            if steps > self.capacity() {
                warn!(from, to, bucket = b, "hash chain cycle detected while relinking");
                self.cut(b, prev);
                return false;
            }
            prev = Some(c);
            cur = self.links[c];
        }
        false
    }

    fn cut(&mut self, bucket: usize, prev: Option<usize>) {
        match prev {
            None => self.heads[bucket] = NIL,
            Some(p) => self.links[p] = NIL,
        }
    }

    /// Resize to `capacity` and re-thread every slot from its cached hash.
    ///
    /// `hashes` yields one hash per slot, starting at slot 0.
    pub fn rebuild(&mut self, capacity: usize, hashes: impl IntoIterator<Item = u32>) {
        *self = ChainIndex::with_capacity(capacity);
        for (slot, hash) in hashes.into_iter().enumerate() {
            self.insert(slot, hash);
        }
    }

    /// Raw link of `slot`. Owners that keep free lists thread them through
    /// the links of unused slots.
    #[inline]
    pub fn link(&self, slot: usize) -> u32 {
        self.links[slot]
    }

    #[inline]
    pub fn set_link(&mut self, slot: usize, next: u32) {
        self.links[slot] = next;
    }
}
