//! Reference-counted interning dictionary mapping words to compact [`SymbolId`] values.
//!
//! Entries live in a dense array (index = SymbolId) and are found through a
//! closed-addressing [`ChainIndex`] threaded through the same slots. Each entry
//! caches the FNV-1a hash of its word, so growing the index never rereads the
//! bytes.
//!
//! Besides the word itself, every entry carries usage statistics maintained by
//! the model: how many context tree nodes reference the symbol (`node_count`)
//! and the sum of those nodes' observation counts (`value_sum`). The dictionary
//! also keeps the aggregate of both over all entries.
//!
//! Deletion compacts the array by moving the last entry into the freed slot,
//! which changes that entry's identifier. [`Dictionary::remove`] reports the
//! move as a [`Renumber`] so holders of symbol values can fix themselves up.
//!
//! Sentinel entries `ERROR_ID` (0) and `FIN_ID` (1) are pre-populated at construction
//! and can never be removed.

use serde::{Deserialize, Serialize};
use symbol_core::{
    ChainIndex, ERROR_ID, ERROR_WORD, FIN_ID, FIN_WORD, MAX_WORD_LEN, Renumber, SymbolId, fnv1a,
    grown_capacity, shrunk_capacity,
};
use tracing::{debug, warn};

/// Usage statistics of one symbol, or the aggregate over the whole dictionary.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct WordStats {
    /// Number of context tree nodes labelled with the symbol.
    pub node_count: u64,
    /// Sum of the `value` of those nodes.
    pub value_sum: u64,
}

#[derive(Debug, Clone)]
struct Entry {
    word: Box<[u8]>,
    hash: u32,
    stats: WordStats,
}

impl Entry {
    fn new(word: &[u8]) -> Self {
        Entry {
            word: word.into(),
            hash: fnv1a(word),
            stats: WordStats::default(),
        }
    }
}

fn clip(word: &[u8]) -> &[u8] {
    &word[..word.len().min(MAX_WORD_LEN)]
}

/// An interning dictionary that maps byte strings to compact [`SymbolId`] values.
///
/// Words are compared byte for byte (case-sensitive). Symbols are assigned
/// sequential IDs starting from 0; IDs 0 and 1 are always the [`ERROR_ID`] and
/// [`FIN_ID`] sentinels.
///
/// Lookup and insertion are O(1) on average. The index grows before an insert
/// would fill it, by `capacity + isqrt(capacity + 1)`.
#[derive(Debug, Clone)]
pub struct Dictionary {
    entries: Vec<Entry>,
    index: ChainIndex,
    totals: WordStats,
}

impl Dictionary {
    /// Create a new dictionary holding only the two sentinel entries.
    pub fn new() -> Self {
        let mut dict = Dictionary {
            entries: Vec::new(),
            index: ChainIndex::default(),
            totals: WordStats::default(),
        };
        let error = dict.intern(ERROR_WORD);
        let fin = dict.intern(FIN_WORD);
        debug_assert_eq!(error, ERROR_ID);
        debug_assert_eq!(fin, FIN_ID);
        dict
    }

    /// Insert a word if not already present, returning its ID.
    ///
    /// Words longer than 255 bytes cannot be stored in the brain file; they are
    /// truncated with a warning.
    pub fn intern(&mut self, word: &[u8]) -> SymbolId {
        if word.len() > MAX_WORD_LEN {
            warn!(len = word.len(), "word too long, truncating to {MAX_WORD_LEN} bytes");
        }
        let word = clip(word);

        if let Some(id) = self.lookup(word) {
            return id;
        }

        if self.entries.len() >= self.index.capacity() {
            self.resize(grown_capacity(self.index.capacity()));
        }

        let slot = self.entries.len();
        let entry = Entry::new(word);
        self.index.insert(slot, entry.hash);
        self.entries.push(entry);
        SymbolId::from_usize(slot)
    }

    /// Look up a word without inserting. Returns `None` if absent.
    ///
    /// Over-long words are cut the same way [`Dictionary::intern`] cuts them.
    pub fn lookup(&self, word: &[u8]) -> Option<SymbolId> {
        let word = clip(word);
        self.index
            .find(fnv1a(word), |slot| {
                self.entries.get(slot).is_some_and(|e| &*e.word == word)
            })
            .map(SymbolId::from_usize)
    }

    /// Resolve a SymbolId back to its word.
    ///
    /// # Panics
    /// Panics if `id` is out of bounds.
    #[inline]
    pub fn resolve(&self, id: SymbolId) -> &[u8] {
        &self.entries[id.as_usize()].word
    }

    /// Resolve a SymbolId, returning `None` if it is out of bounds.
    #[inline]
    pub fn get(&self, id: SymbolId) -> Option<&[u8]> {
        self.entries.get(id.as_usize()).map(|e| &*e.word)
    }

    /// Number of entries (including sentinels).
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the dictionary contains only sentinel entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 2
    }

    /// Current index capacity (`msize`).
    #[inline]
    pub fn capacity(&self) -> usize {
        self.index.capacity()
    }

    /// All entries in identifier order.
    pub fn iter(&self) -> impl Iterator<Item = (SymbolId, &[u8])> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| (SymbolId::from_usize(i), &*e.word))
    }

    /// Usage statistics of one symbol (zero for unknown identifiers).
    pub fn stats(&self, id: SymbolId) -> WordStats {
        self.entries
            .get(id.as_usize())
            .map(|e| e.stats)
            .unwrap_or_default()
    }

    /// Aggregate usage statistics over all entries.
    #[inline]
    pub fn totals(&self) -> WordStats {
        self.totals
    }

    /// Record `nodes` new tree nodes and `value` new observations for `id`.
    pub fn bump_reference(&mut self, id: SymbolId, nodes: u64, value: u64) {
        let Some(entry) = self.entries.get_mut(id.as_usize()) else {
            warn!(symbol = id.as_u32(), "reference bump for unknown symbol");
            return;
        };
        entry.stats.node_count = entry.stats.node_count.saturating_add(nodes);
        entry.stats.value_sum = entry.stats.value_sum.saturating_add(value);
        self.totals.node_count = self.totals.node_count.saturating_add(nodes);
        self.totals.value_sum = self.totals.value_sum.saturating_add(value);
    }

    /// Forget `nodes` tree nodes carrying `value` observations for `id`.
    ///
    /// Counters clamp at zero; an underflow means the counts were already stale
    /// and is logged rather than propagated.
    pub fn drop_reference(&mut self, id: SymbolId, nodes: u64, value: u64) {
        let Some(entry) = self.entries.get_mut(id.as_usize()) else {
            warn!(symbol = id.as_u32(), "reference drop for unknown symbol");
            return;
        };
        if entry.stats.node_count < nodes || entry.stats.value_sum < value {
            warn!(
                symbol = id.as_u32(),
                node_count = entry.stats.node_count,
                value_sum = entry.stats.value_sum,
                nodes,
                value,
                "reference count underflow, clamping"
            );
        }
        let nodes = nodes.min(entry.stats.node_count);
        let value = value.min(entry.stats.value_sum);
        entry.stats.node_count -= nodes;
        entry.stats.value_sum -= value;
        self.totals.node_count = self.totals.node_count.saturating_sub(nodes);
        self.totals.value_sum = self.totals.value_sum.saturating_sub(value);
    }

    /// Zero every usage counter, ahead of a full recount.
    pub fn clear_references(&mut self) {
        for entry in &mut self.entries {
            entry.stats = WordStats::default();
        }
        self.totals = WordStats::default();
    }

    /// Remove a word. Returns the renumbering caused by compaction, if any.
    ///
    /// Removing an absent word or a sentinel is logged and ignored.
    pub fn remove(&mut self, word: &[u8]) -> Option<Renumber> {
        match self.lookup(word) {
            Some(id) => self.remove_symbol(id),
            None => {
                warn!(
                    word = %String::from_utf8_lossy(word),
                    "cannot remove word: not in dictionary"
                );
                None
            }
        }
    }

    /// Remove the entry for `id`, moving the last entry into its slot.
    pub fn remove_symbol(&mut self, id: SymbolId) -> Option<Renumber> {
        if id.is_sentinel() {
            warn!(symbol = id.as_u32(), "refusing to remove a sentinel symbol");
            return None;
        }
        let slot = id.as_usize();
        if slot >= self.entries.len() {
            warn!(symbol = id.as_u32(), "cannot remove symbol: out of range");
            return None;
        }

        let mut healthy = self.index.unlink(slot, self.entries[slot].hash);
        if !healthy {
            warn!(symbol = id.as_u32(), "symbol missing from its hash chain");
        }

        let stats = self.entries[slot].stats;
        self.totals.node_count = self.totals.node_count.saturating_sub(stats.node_count);
        self.totals.value_sum = self.totals.value_sum.saturating_sub(stats.value_sum);

        let last = self.entries.len() - 1;
        let renumber = if slot != last {
            healthy &= self.index.relink(last, slot, self.entries[last].hash);
            self.entries.swap_remove(slot);
            Some(Renumber {
                from: SymbolId::from_usize(last),
                to: id,
            })
        } else {
            self.entries.pop();
            None
        };

        if !healthy {
            // Rethread everything from the cached hashes.
            self.resize(self.index.capacity());
        } else if let Some(capacity) = shrunk_capacity(self.entries.len(), self.index.capacity()) {
            self.resize(capacity);
        }

        renumber
    }

    fn resize(&mut self, capacity: usize) {
        debug!(
            from = self.index.capacity(),
            to = capacity,
            len = self.entries.len(),
            "resizing dictionary index"
        );
        self.index
            .rebuild(capacity, self.entries.iter().map(|e| e.hash));
    }

    /// Check the structural invariants: every entry is reachable through its
    /// chain, `len <= capacity`, and the aggregate statistics equal the sum of
    /// the per-entry statistics.
    pub fn is_consistent(&self) -> bool {
        if self.entries.len() > self.index.capacity() {
            return false;
        }
        let reachable = self.entries.iter().enumerate().all(|(slot, entry)| {
            self.index.find(entry.hash, |s| s == slot) == Some(slot)
                && self.lookup(&entry.word) == Some(SymbolId::from_usize(slot))
        });
        let sum = self
            .entries
            .iter()
            .fold(WordStats::default(), |acc, e| WordStats {
                node_count: acc.node_count + e.stats.node_count,
                value_sum: acc.value_sum + e.stats.value_sum,
            });
        reachable && sum == self.totals
    }
}

impl Default for Dictionary {
    fn default() -> Self {
        Self::new()
    }
}
