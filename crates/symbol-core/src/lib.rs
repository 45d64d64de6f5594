//! Core symbol identifiers and the hashing machinery shared by the brain structures.
//!
//! Every structure in the brain (dictionary, context tree child tables, crosstab
//! rows) indexes its entries with the same closed-addressing scheme: a bucket
//! array of chain heads plus one link per slot, threaded through the dense slot
//! storage. That scheme lives in [`ChainIndex`] so the three owners agree on
//! growth, unlinking and cycle healing.

mod chain;
mod hash;

pub use chain::{ChainIndex, NIL};
pub use hash::{fnv1a, grown_capacity, shrunk_capacity};

use serde::{Deserialize, Serialize};

/// Compact identifier assigned to a word by the dictionary.
///
/// Identifiers are dense, starting at 0. IDs 0 and 1 are reserved for the
/// [`ERROR_ID`] and [`FIN_ID`] sentinels. An identifier is only valid until the
/// next dictionary deletion: deletion moves the last entry into the freed slot,
/// which renumbers it (see [`Renumber`]).
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Serialize, Deserialize)]
pub struct SymbolId(pub u32);

impl SymbolId {
    /// The raw `u32` value, as written to the brain file.
    #[inline]
    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// Create a SymbolId from a usize index. Panics if index > u32::MAX.
    #[inline]
    pub fn from_usize(index: usize) -> Self {
        assert!(index <= u32::MAX as usize, "SymbolId overflow: {index}");
        SymbolId(index as u32)
    }

    /// Convert to usize for indexing.
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Whether this is one of the two reserved sentinels.
    #[inline]
    pub fn is_sentinel(self) -> bool {
        self == ERROR_ID || self == FIN_ID
    }
}

/// Sentinel SymbolId for "not found" / error state. Always ID 0.
pub const ERROR_ID: SymbolId = SymbolId(0);

/// Sentinel SymbolId for end-of-sentence. Always ID 1.
pub const FIN_ID: SymbolId = SymbolId(1);

/// Word stored in the [`ERROR_ID`] slot.
pub const ERROR_WORD: &[u8] = b"<ERROR>";

/// Word stored in the [`FIN_ID`] slot.
pub const FIN_WORD: &[u8] = b"<FIN>";

/// Longest word the brain can store (the file format uses a one-byte length).
pub const MAX_WORD_LEN: usize = u8::MAX as usize;

/// An identifier change caused by swap-remove compaction.
///
/// The entry that used to live at `from` (always the last slot) now lives at `to`
/// (the slot that was freed).
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub struct Renumber {
    pub from: SymbolId,
    pub to: SymbolId,
}
