//! Binary brain file format and the advisory lock that guards it.
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! cookie        9 bytes   "MegaHALv9"
//! order         u32
//! forward tree  node records, pre-order from the root
//! backward tree node records, pre-order from the root
//! dictionary    size: u32, then size × (length: u8, bytes[length])
//! ```
//!
//! A node record is `symbol: u32, child_sum: u64, value: u32, stamp: u32,
//! branch: u32`, immediately followed by its `branch` children. The dictionary
//! section includes the two sentinel entries, so stored index `i` is
//! identifier `i`.

use std::fs::{self, File, OpenOptions, TryLockError};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use ngram_trie::{NodeRef, Tree};
use symbol_core::{MAX_WORD_LEN, SymbolId};
use symbol_dict::Dictionary;
use tracing::{debug, info, warn};

use crate::error::{BrainError, Result};

/// Magic bytes at the start of every brain file.
pub const COOKIE: &[u8; 9] = b"MegaHALv9";

const NODE_RECORD_LEN: usize = 4 + 8 + 4 + 4 + 4;

/// How long to wait for another process to release a brain file.
///
/// Attempts back off exponentially from `initial_backoff` up to `max_backoff`.
/// `max_wait: None` waits forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_wait: Option<Duration>,
}

impl Default for LockPolicy {
    fn default() -> Self {
        LockPolicy {
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_secs(1),
            max_wait: None,
        }
    }
}

/// An open brain file with the exclusive lock held.
#[derive(Debug)]
pub(crate) struct HeldLock {
    /// Canonical path of the locked file.
    pub(crate) path: PathBuf,
    pub(crate) file: File,
}

impl HeldLock {
    /// Open `path` and take the exclusive lock, retrying per `policy`.
    pub(crate) fn acquire(path: &Path, create: bool, policy: &LockPolicy) -> Result<HeldLock> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .truncate(false)
            .open(path)?;

        let started = Instant::now();
        let mut backoff = policy.initial_backoff;
        loop {
            match file.try_lock() {
                Ok(()) => {
                    let path = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
                    return Ok(HeldLock { path, file });
                }
                Err(TryLockError::WouldBlock) => {
                    let waited = started.elapsed();
                    let mut pause = backoff;
                    if let Some(max_wait) = policy.max_wait {
                        if waited >= max_wait {
                            return Err(BrainError::LockTimeout {
                                path: path.to_path_buf(),
                                waited,
                            });
                        }
                        pause = pause.min(max_wait - waited);
                    }
                    debug!(path = %path.display(), ?pause, "brain file is locked, retrying");
                    thread::sleep(pause);
                    backoff = (backoff * 2).min(policy.max_backoff);
                }
                Err(TryLockError::Error(e)) => return Err(e.into()),
            }
        }
    }

    /// Whether `path` names the locked file, however it is spelled.
    pub(crate) fn is_for(&self, path: &Path) -> bool {
        fs::canonicalize(path).is_ok_and(|p| p == self.path)
    }

    /// Replace the file contents with `bytes` and release the lock.
    pub(crate) fn rewrite(mut self, bytes: &[u8]) -> Result<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(bytes)?;
        self.file.sync_data()?;
        self.file.unlock()?;
        Ok(())
    }

    pub(crate) fn read_all(&mut self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}

fn write_tree(out: &mut Vec<u8>, tree: &Tree) {
    tree.walk(|_, _, node| {
        out.extend_from_slice(&node.symbol.as_u32().to_le_bytes());
        out.extend_from_slice(&node.child_sum.to_le_bytes());
        out.extend_from_slice(&node.value.to_le_bytes());
        out.extend_from_slice(&node.stamp.to_le_bytes());
        out.extend_from_slice(&(node.branch() as u32).to_le_bytes());
    });
}

fn write_dictionary(out: &mut Vec<u8>, dict: &Dictionary) {
    out.extend_from_slice(&(dict.len() as u32).to_le_bytes());
    for (_, word) in dict.iter() {
        let len = word.len().min(MAX_WORD_LEN);
        out.push(len as u8);
        out.extend_from_slice(&word[..len]);
    }
}

/// Serialize a whole brain into memory.
pub(crate) fn encode(order: u8, forward: &Tree, backward: &Tree, dict: &Dictionary) -> Vec<u8> {
    let mut out = Vec::with_capacity(
        COOKIE.len() + 4 + (forward.len() + backward.len()) * NODE_RECORD_LEN + dict.len() * 8,
    );
    out.extend_from_slice(COOKIE);
    out.extend_from_slice(&(order as u32).to_le_bytes());
    write_tree(&mut out, forward);
    write_tree(&mut out, backward);
    write_dictionary(&mut out, dict);
    info!(
        bytes = out.len(),
        forward_nodes = forward.len(),
        backward_nodes = backward.len(),
        words = dict.len(),
        "encoded brain"
    );
    out
}

/// Bounds-checked little-endian reader over a byte slice.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Cursor { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(BrainError::Corrupt(format!(
                "unexpected end of file at offset {} (wanted {n} bytes)",
                self.pos
            )));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    fn u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }
}

struct NodeRecord {
    symbol: SymbolId,
    child_sum: u64,
    value: u32,
    stamp: u32,
    branch: usize,
}

fn read_record(cur: &mut Cursor<'_>) -> Result<NodeRecord> {
    let symbol = SymbolId(cur.u32()?);
    let child_sum = cur.u64()?;
    let value = cur.u32()?;
    let stamp = cur.u32()?;
    let branch = cur.u32()? as usize;
    // Every child needs at least one record's worth of bytes.
    if branch > cur.remaining() / NODE_RECORD_LEN {
        return Err(BrainError::Corrupt(format!(
            "branch count {branch} exceeds the remaining file"
        )));
    }
    Ok(NodeRecord {
        symbol,
        child_sum,
        value,
        stamp,
        branch,
    })
}

/// Rebuild one tree. Returns the largest symbol referenced by a non-root node.
fn read_tree(cur: &mut Cursor<'_>, tree: &mut Tree) -> Result<Option<SymbolId>> {
    let root = tree.root();
    let record = read_record(cur)?;
    tree.restore_root(record.value, record.stamp);
    tree.set_child_sum(root, record.child_sum);
    tree.reserve_children(root, record.branch);

    let mut max_symbol: Option<SymbolId> = None;
    let mut repaired = 0usize;
    let mut stack: Vec<(NodeRef, usize)> = vec![(root, record.branch)];
    while let Some((node, pending)) = stack.last_mut() {
        if *pending == 0 {
            let node = *node;
            stack.pop();
            if let Some(stored) = tree.recount(node) {
                repaired += 1;
                debug!(stored, actual = tree.node(node).child_sum, "re-derived child_sum");
            }
            continue;
        }
        *pending -= 1;
        let parent = *node;

        let record = read_record(cur)?;
        let child = tree
            .attach(parent, record.symbol, record.value, record.stamp)
            .ok_or_else(|| {
                BrainError::Corrupt(format!("duplicate child symbol {}", record.symbol.as_u32()))
            })?;
        tree.set_child_sum(child, record.child_sum);
        tree.reserve_children(child, record.branch);
        max_symbol = max_symbol.max(Some(record.symbol));
        stack.push((child, record.branch));
    }
    if repaired > 0 {
        warn!(nodes = repaired, "stored child sums disagreed with children, re-derived");
    }
    Ok(max_symbol)
}

fn read_dictionary(cur: &mut Cursor<'_>) -> Result<Dictionary> {
    let size = cur.u32()? as usize;
    if size < 2 {
        return Err(BrainError::Corrupt(format!(
            "dictionary holds {size} entries, sentinels missing"
        )));
    }
    let mut dict = Dictionary::new();
    for index in 0..size {
        let len = cur.u8()? as usize;
        let word = cur.take(len)?;
        let id = dict.intern(word);
        if id.as_usize() != index {
            return Err(BrainError::Corrupt(format!(
                "dictionary entry {index} ({:?}) interned as {}",
                String::from_utf8_lossy(word),
                id.as_u32()
            )));
        }
    }
    Ok(dict)
}

/// Everything a brain file holds.
pub(crate) struct Decoded {
    pub(crate) order: u8,
    pub(crate) forward: Tree,
    pub(crate) backward: Tree,
    pub(crate) dictionary: Dictionary,
}

/// Parse a brain file held in memory.
pub(crate) fn decode(bytes: &[u8]) -> Result<Decoded> {
    let mut cur = Cursor::new(bytes);
    if bytes.len() < COOKIE.len() || cur.take(COOKIE.len())? != COOKIE {
        return Err(BrainError::BadCookie);
    }
    let order = cur.u32()?;
    let order = u8::try_from(order)
        .ok()
        .filter(|&o| o > 0)
        .ok_or_else(|| BrainError::Corrupt(format!("unsupported order {order}")))?;

    let mut forward = Tree::new();
    let mut backward = Tree::new();
    let max_forward = read_tree(&mut cur, &mut forward)?;
    let max_backward = read_tree(&mut cur, &mut backward)?;
    let dictionary = read_dictionary(&mut cur)?;

    if let Some(max) = max_forward.max(max_backward)
        && max.as_usize() >= dictionary.len()
    {
        return Err(BrainError::Corrupt(format!(
            "tree references symbol {} but the dictionary holds {} words",
            max.as_u32(),
            dictionary.len()
        )));
    }
    if cur.remaining() > 0 {
        warn!(bytes = cur.remaining(), "ignoring trailing bytes after dictionary");
    }

    Ok(Decoded {
        order,
        forward,
        backward,
        dictionary,
    })
}

/// Rebuild every dictionary reference counter from the trees.
pub(crate) fn set_reference_counts(forward: &Tree, backward: &Tree, dict: &mut Dictionary) {
    dict.clear_references();
    for tree in [forward, backward] {
        let root = tree.root();
        tree.walk(|_, r, node| {
            if r != root {
                dict.bump_reference(node.symbol, 1, node.value as u64);
            }
        });
    }
}
