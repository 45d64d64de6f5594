//! Timestamp-driven eviction of stale context tree nodes.
//!
//! Every node carries the logical time of the last observation through it, and
//! a parent is stamped whenever one of its children is, so a node is never
//! older than its subtree. Pruning raises a cut-off `stamp_min` and drops every
//! subtree rooted at a node older than the cut-off until both trees together
//! fit the node budget again.
//!
//! How far to raise the cut-off is guessed from a running estimate of how many
//! nodes one unit of logical time reclaims. The estimate is smoothed across
//! steps and halved when a step reclaims nothing, which makes the next step
//! longer.

use std::collections::HashMap;

use ngram_trie::Tree;
use symbol_core::SymbolId;
use symbol_dict::Dictionary;
use tracing::debug;

/// State carried between pruning passes.
#[derive(Debug, Clone, Default)]
pub struct Pruner {
    stamp_min: Option<u32>,
    density: f64,
    backward_first: bool,
}

/// What a call to [`crate::Model::prune`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Tree nodes freed.
    pub reclaimed: usize,
    /// Words dropped from the dictionary because no node referenced them any
    /// more, by their identifier before compaction.
    pub forgotten: Vec<SymbolId>,
    /// Surviving symbols whose identifier changed, old to new.
    pub renumbered: HashMap<SymbolId, SymbolId>,
}

impl PruneReport {
    pub fn is_empty(&self) -> bool {
        self.reclaimed == 0 && self.forgotten.is_empty()
    }
}

fn stamp_range(forward: &Tree, backward: &Tree) -> Option<(u32, u32)> {
    match (forward.stamp_range(), backward.stamp_range()) {
        (Some((a, b)), Some((c, d))) => Some((a.min(c), b.max(d))),
        (one, other) => one.or(other),
    }
}

impl Pruner {
    /// Current cut-off, if a pass has run.
    pub fn stamp_min(&self) -> Option<u32> {
        self.stamp_min
    }

    /// Evict stale subtrees until `forward` and `backward` together hold at
    /// most `budget` nodes, or the cut-off reaches the newest stamp.
    ///
    /// Returns the number of nodes freed.
    pub fn run(
        &mut self,
        forward: &mut Tree,
        backward: &mut Tree,
        dict: &mut Dictionary,
        budget: usize,
    ) -> usize {
        let live = forward.len() + backward.len();
        if live <= budget {
            return 0;
        }
        let Some((oldest, newest)) = stamp_range(forward, backward) else {
            return 0;
        };

        let mut stamp_min = self.stamp_min.map_or(oldest, |m| m.max(oldest));
        if self.density <= 0.0 {
            self.density = live as f64 / ((newest - oldest) as f64 + 1.0);
        }
        self.backward_first = !self.backward_first;

        let mut reclaimed = 0;
        loop {
            let live = forward.len() + backward.len();
            if live <= budget {
                break;
            }
            let width = newest.saturating_sub(stamp_min);
            if width == 0 {
                break;
            }
            let excess = (live - budget) as f64;
            let step = ((excess / self.density).ceil() as u32).clamp(1, width);
            stamp_min += step;

            let freed = if self.backward_first {
                sweep(backward, dict, stamp_min) + sweep(forward, dict, stamp_min)
            } else {
                sweep(forward, dict, stamp_min) + sweep(backward, dict, stamp_min)
            };
            reclaimed += freed;

            self.density = if freed == 0 {
                self.density * 0.5
            } else {
                0.5 * self.density + 0.5 * (freed as f64 / step as f64)
            };
            debug!(stamp_min, step, freed, density = self.density, "pruning step");
        }

        self.stamp_min = Some(stamp_min);
        reclaimed
    }
}

/// Remove every subtree rooted at a node stamped before `stamp_min`.
///
/// Depth first, highest child index first, so the swap-compaction done by
/// `remove_child` only ever moves children that were already visited.
fn sweep(tree: &mut Tree, dict: &mut Dictionary, stamp_min: u32) -> usize {
    let mut freed = 0;
    let mut stack = vec![tree.root()];
    while let Some(node) = stack.pop() {
        let mut i = tree.branch_count(node);
        while i > 0 {
            i -= 1;
            let child = tree.children(node)[i];
            let c = tree.node(child);
            if c.stamp < stamp_min {
                let symbol = c.symbol;
                freed += tree.remove_child(node, symbol, &mut |s, value| {
                    dict.drop_reference(s, 1, value as u64)
                });
            } else {
                stack.push(child);
            }
        }
    }
    freed
}

/// Drop dictionary words that no tree node references any more.
///
/// Compaction may renumber survivors; the composed map is applied to both
/// trees in one walk and returned alongside the forgotten identifiers.
pub(crate) fn forget_orphans(
    forward: &mut Tree,
    backward: &mut Tree,
    dict: &mut Dictionary,
) -> (Vec<SymbolId>, HashMap<SymbolId, SymbolId>) {
    let orphans: Vec<SymbolId> = dict
        .iter()
        .map(|(id, _)| id)
        .filter(|&id| !id.is_sentinel() && dict.stats(id).node_count == 0)
        .collect();
    if orphans.is_empty() {
        return (orphans, HashMap::new());
    }

    // slot -> identifier the entry had before any removal
    let mut original: Vec<SymbolId> = dict.iter().map(|(id, _)| id).collect();
    let mut slot_of: HashMap<SymbolId, usize> =
        original.iter().map(|&id| (id, id.as_usize())).collect();

    for &orphan in &orphans {
        let Some(slot) = slot_of.remove(&orphan) else {
            continue;
        };
        dict.remove_symbol(SymbolId::from_usize(slot));
        original.swap_remove(slot);
        if let Some(&moved) = original.get(slot) {
            slot_of.insert(moved, slot);
        }
    }

    let renumbered: HashMap<SymbolId, SymbolId> = original
        .iter()
        .enumerate()
        .filter(|&(slot, id)| id.as_usize() != slot)
        .map(|(slot, &id)| (id, SymbolId::from_usize(slot)))
        .collect();
    if !renumbered.is_empty() {
        let touched = forward.relabel(&renumbered) + backward.relabel(&renumbered);
        debug!(moved = renumbered.len(), nodes = touched, "relabelled trees after compaction");
    }
    (orphans, renumbered)
}
