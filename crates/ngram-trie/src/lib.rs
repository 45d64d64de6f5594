//! Arena-based n-ary context tree with hashed child tables and logical timestamps.
//!
//! Nodes are stored in a contiguous arena (`Vec<TreeNode>`) and referenced by
//! opaque [`NodeRef`] handles, which are plain indices. This design avoids borrow
//! checker issues when maintaining a context window alongside a mutable tree, and
//! it keeps references stable when other subtrees are freed: freed slots go onto
//! a free list and are reused by later allocations.
//!
//! Every node owns a dense array of child references plus a closed-addressing
//! [`ChainIndex`] keyed by child symbol. The child table grows by
//! `branch + isqrt(branch + 1)`; on growth only, children are stably sorted by
//! descending `value` (ties by ascending symbol) so that frequency-weighted walks
//! meet the heavy children first.
//!
//! Each node records:
//! - `value`: how many times its symbol was observed in its parent's context
//! - `child_sum`: the sum of its children's `value`, the sampling denominator
//! - `stamp`: the logical time of the last observation through it

use std::collections::HashMap;

use rand::Rng;
use serde::{Deserialize, Serialize};
use symbol_core::{ChainIndex, ERROR_ID, SymbolId, grown_capacity, shrunk_capacity};
use tracing::warn;

/// Opaque handle into the tree's node arena.
///
/// This is a plain index and does not borrow the tree. A handle stays valid
/// until the subtree containing it is removed.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub struct NodeRef(u32);

impl NodeRef {
    /// Convert to usize for indexing into the arena.
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }

    #[inline]
    fn from_usize(index: usize) -> Self {
        NodeRef(index as u32)
    }
}

/// A single node of the context tree: one (context, symbol) pair.
#[derive(Debug, Clone)]
pub struct TreeNode {
    /// Edge label: the symbol observed after the parent's context.
    pub symbol: SymbolId,
    /// Times `symbol` was observed in the parent's context. Saturates at u32::MAX.
    pub value: u32,
    /// Sum of the children's `value`.
    pub child_sum: u64,
    /// Logical time of the last observation through this node.
    pub stamp: u32,
    children: Vec<NodeRef>,
    index: ChainIndex,
}

impl TreeNode {
    fn new(symbol: SymbolId) -> Self {
        TreeNode {
            symbol,
            value: 0,
            child_sum: 0,
            stamp: 0,
            children: Vec::new(),
            index: ChainIndex::default(),
        }
    }

    /// Number of children.
    #[inline]
    pub fn branch(&self) -> usize {
        self.children.len()
    }

    /// Capacity of the child table.
    #[inline]
    pub fn branch_capacity(&self) -> usize {
        self.index.capacity()
    }
}

/// Result of [`Tree::add_observation`].
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct Observed {
    /// The child node for the observed symbol.
    pub node: NodeRef,
    /// The child did not exist before this call.
    pub created: bool,
    /// The counts were incremented (false once they have saturated).
    pub counted: bool,
}

/// Arena-based context tree. The root (index 0) represents the empty context.
///
/// # Example
///
/// ```
/// use ngram_trie::Tree;
/// use symbol_core::SymbolId;
///
/// let mut tree = Tree::new();
/// let root = tree.root();
///
/// let seen = tree.add_observation(root, SymbolId(2), 1);
/// assert!(seen.created);
/// assert_eq!(tree.node(seen.node).value, 1);
/// assert_eq!(tree.node(root).child_sum, 1);
///
/// let again = tree.add_observation(root, SymbolId(2), 2);
/// assert_eq!(again.node, seen.node);
/// assert_eq!(tree.node(seen.node).value, 2);
/// assert_eq!(tree.node(seen.node).stamp, 2);
/// ```
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<TreeNode>,
    free: Vec<NodeRef>,
    live: usize,
}

impl Tree {
    /// Create a new tree holding only the root.
    pub fn new() -> Self {
        Tree {
            nodes: vec![TreeNode::new(ERROR_ID)],
            free: Vec::new(),
            live: 1,
        }
    }

    /// Reset to a lone root, dropping every node.
    pub fn clear(&mut self) {
        *self = Tree::new();
    }

    /// The root node.
    #[inline]
    pub fn root(&self) -> NodeRef {
        NodeRef(0)
    }

    /// Access a node by reference.
    #[inline]
    pub fn node(&self, r: NodeRef) -> &TreeNode {
        &self.nodes[r.as_usize()]
    }

    /// The child references of a node, in child table order.
    #[inline]
    pub fn children(&self, parent: NodeRef) -> &[NodeRef] {
        &self.nodes[parent.as_usize()].children
    }

    /// Number of children of a node.
    #[inline]
    pub fn branch_count(&self, parent: NodeRef) -> usize {
        self.nodes[parent.as_usize()].children.len()
    }

    /// Number of live nodes, including the root.
    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    /// Whether the tree contains only the root node.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 1
    }

    fn child_slot(&self, parent: NodeRef, symbol: SymbolId) -> Option<usize> {
        let node = &self.nodes[parent.as_usize()];
        node.index.find(symbol.as_u32(), |slot| {
            node.children
                .get(slot)
                .is_some_and(|c| self.nodes[c.as_usize()].symbol == symbol)
        })
    }

    /// Find an existing child of `parent` matching `symbol`.
    pub fn find_child(&self, parent: NodeRef, symbol: SymbolId) -> Option<NodeRef> {
        self.child_slot(parent, symbol)
            .map(|slot| self.nodes[parent.as_usize()].children[slot])
    }

    /// Find or create a child of `parent` matching `symbol`.
    ///
    /// A new child starts with zero `value`. Returns the child and whether it
    /// was created.
    pub fn find_or_create_child(&mut self, parent: NodeRef, symbol: SymbolId) -> (NodeRef, bool) {
        if let Some(child) = self.find_child(parent, symbol) {
            return (child, false);
        }

        let p = parent.as_usize();
        if self.nodes[p].children.len() >= self.nodes[p].index.capacity() {
            self.grow_children(parent);
        }

        let child = self.alloc(symbol);
        let node = &mut self.nodes[p];
        let slot = node.children.len();
        node.index.insert(slot, symbol.as_u32());
        node.children.push(child);
        (child, true)
    }

    /// Grow the child table and re-sort children by descending value.
    fn grow_children(&mut self, parent: NodeRef) {
        let p = parent.as_usize();
        let capacity = grown_capacity(self.nodes[p].index.capacity());
        let mut children = std::mem::take(&mut self.nodes[p].children);
        children.sort_by(|a, b| {
            let (a, b) = (&self.nodes[a.as_usize()], &self.nodes[b.as_usize()]);
            b.value.cmp(&a.value).then(a.symbol.cmp(&b.symbol))
        });
        let hashes: Vec<u32> = children
            .iter()
            .map(|c| self.nodes[c.as_usize()].symbol.as_u32())
            .collect();
        children.reserve(capacity.saturating_sub(children.len()));
        let node = &mut self.nodes[p];
        node.index.rebuild(capacity, hashes);
        node.children = children;
    }

    fn rethread_children(&mut self, parent: NodeRef, capacity: usize) {
        let p = parent.as_usize();
        let hashes: Vec<u32> = self.nodes[p]
            .children
            .iter()
            .map(|c| self.nodes[c.as_usize()].symbol.as_u32())
            .collect();
        let node = &mut self.nodes[p];
        node.index.rebuild(capacity, hashes);
        node.children.shrink_to(capacity);
    }

    fn alloc(&mut self, symbol: SymbolId) -> NodeRef {
        self.live += 1;
        match self.free.pop() {
            Some(r) => {
                self.nodes[r.as_usize()] = TreeNode::new(symbol);
                r
            }
            None => {
                let r = NodeRef::from_usize(self.nodes.len());
                self.nodes.push(TreeNode::new(symbol));
                r
            }
        }
    }

    /// Record one observation of `symbol` in the context `parent`.
    ///
    /// Increments the child's `value` and the parent's `child_sum`, unless that
    /// would overflow, in which case the counts are left alone and a warning is
    /// logged. Both nodes get `stamp` as their last-touched time.
    pub fn add_observation(&mut self, parent: NodeRef, symbol: SymbolId, stamp: u32) -> Observed {
        let (child, created) = self.find_or_create_child(parent, symbol);
        let (p, c) = (parent.as_usize(), child.as_usize());

        let counted = if self.nodes[c].value == u32::MAX || self.nodes[p].child_sum == u64::MAX {
            warn!(symbol = symbol.as_u32(), "observation count saturated");
            false
        } else {
            self.nodes[c].value += 1;
            self.nodes[p].child_sum += 1;
            true
        };
        self.nodes[c].stamp = stamp;
        self.nodes[p].stamp = stamp;

        Observed {
            node: child,
            created,
            counted,
        }
    }

    /// Frequency-weighted random draw over the children of `node`.
    ///
    /// Draws a credit uniformly from `[0, child_sum)` and walks the children in
    /// table order, spending each child's value. Returns [`ERROR_ID`] when the
    /// node has no observed children.
    pub fn sample<R: Rng + ?Sized>(&self, node: NodeRef, rng: &mut R) -> SymbolId {
        let n = &self.nodes[node.as_usize()];
        if n.children.is_empty() || n.child_sum == 0 {
            return ERROR_ID;
        }
        let mut credit = rng.random_range(0..n.child_sum);
        for &c in &n.children {
            let child = &self.nodes[c.as_usize()];
            let value = child.value as u64;
            if credit < value {
                return child.symbol;
            }
            credit -= value;
        }
        warn!(node = node.as_usize(), "child_sum exceeds the sum of child values");
        ERROR_ID
    }

    /// Remove the child of `parent` labelled `symbol`, freeing its whole subtree.
    ///
    /// `on_free(symbol, value)` is called once per freed node so the caller can
    /// release whatever it tracks per node (dictionary references). Returns the
    /// number of nodes freed.
    pub fn remove_child(
        &mut self,
        parent: NodeRef,
        symbol: SymbolId,
        on_free: &mut impl FnMut(SymbolId, u32),
    ) -> usize {
        let Some(slot) = self.child_slot(parent, symbol) else {
            warn!(symbol = symbol.as_u32(), "cannot remove child: not found");
            return 0;
        };
        let p = parent.as_usize();
        let child = self.nodes[p].children[slot];
        let value = self.nodes[child.as_usize()].value as u64;

        let mut healthy = self.nodes[p].index.unlink(slot, symbol.as_u32());
        let freed = self.free_subtree(child, on_free);

        let node = &mut self.nodes[p];
        if node.child_sum < value {
            warn!(
                child_sum = node.child_sum,
                value,
                "child_sum underflow while removing child, clamping"
            );
            node.child_sum = 0;
        } else {
            node.child_sum -= value;
        }

        let last = self.nodes[p].children.len() - 1;
        if slot != last {
            let moved = self.nodes[p].children[last];
            let moved_hash = self.nodes[moved.as_usize()].symbol.as_u32();
            healthy &= self.nodes[p].index.relink(last, slot, moved_hash);
            self.nodes[p].children.swap_remove(slot);
        } else {
            self.nodes[p].children.pop();
        }

        let capacity = self.nodes[p].index.capacity();
        if !healthy {
            warn!(node = p, "child table damaged, rebuilding");
            self.rethread_children(parent, capacity);
        } else if let Some(smaller) = shrunk_capacity(self.nodes[p].children.len(), capacity) {
            self.rethread_children(parent, smaller);
        }

        freed
    }

    fn free_subtree(&mut self, top: NodeRef, on_free: &mut impl FnMut(SymbolId, u32)) -> usize {
        let mut stack = vec![top];
        let mut freed = 0;
        while let Some(r) = stack.pop() {
            let node = std::mem::replace(&mut self.nodes[r.as_usize()], TreeNode::new(ERROR_ID));
            stack.extend_from_slice(&node.children);
            on_free(node.symbol, node.value);
            self.free.push(r);
            freed += 1;
        }
        self.live -= freed;
        freed
    }

    /// Pre-order walk over every live node, children in table order.
    ///
    /// `visit(depth, node_ref, node)` sees the root at depth 0.
    pub fn walk(&self, mut visit: impl FnMut(usize, NodeRef, &TreeNode)) {
        let mut stack = vec![(0usize, self.root())];
        while let Some((depth, r)) = stack.pop() {
            let node = &self.nodes[r.as_usize()];
            visit(depth, r, node);
            for &c in node.children.iter().rev() {
                stack.push((depth + 1, c));
            }
        }
    }

    /// Oldest and newest stamp among non-root nodes, or `None` for an empty tree.
    pub fn stamp_range(&self) -> Option<(u32, u32)> {
        let mut range: Option<(u32, u32)> = None;
        self.walk(|depth, _, node| {
            if depth == 0 {
                return;
            }
            range = Some(match range {
                None => (node.stamp, node.stamp),
                Some((lo, hi)) => (lo.min(node.stamp), hi.max(node.stamp)),
            });
        });
        range
    }

    /// Rename symbols according to `map` throughout the tree, rebuilding the
    /// child tables whose keys changed. Returns the number of relabelled nodes.
    ///
    /// The targets must not collide with symbols already present under the
    /// same parent.
    pub fn relabel(&mut self, map: &HashMap<SymbolId, SymbolId>) -> usize {
        if map.is_empty() {
            return 0;
        }
        let mut relabelled = 0;
        let mut stack = vec![self.root()];
        while let Some(parent) = stack.pop() {
            let children = self.nodes[parent.as_usize()].children.clone();
            let mut touched = false;
            for &c in &children {
                let node = &mut self.nodes[c.as_usize()];
                if let Some(&to) = map.get(&node.symbol) {
                    node.symbol = to;
                    touched = true;
                    relabelled += 1;
                }
            }
            if touched {
                let capacity = self.nodes[parent.as_usize()].index.capacity();
                self.rethread_children(parent, capacity);
            }
            stack.extend(children);
        }
        relabelled
    }

    /// Restore the root's own counters from a brain file.
    pub fn restore_root(&mut self, value: u32, stamp: u32) {
        let root = &mut self.nodes[0];
        root.value = value;
        root.stamp = stamp;
    }

    /// Size `parent`'s child table for exactly `branch` children.
    pub fn reserve_children(&mut self, parent: NodeRef, branch: usize) {
        let node = &mut self.nodes[parent.as_usize()];
        node.children.reserve_exact(branch);
        if node.children.is_empty() {
            node.index = ChainIndex::with_capacity(branch);
        }
    }

    /// Append a child restored from a brain file, keeping the stored order.
    ///
    /// Returns `None` if `parent` already has a child labelled `symbol`.
    pub fn attach(
        &mut self,
        parent: NodeRef,
        symbol: SymbolId,
        value: u32,
        stamp: u32,
    ) -> Option<NodeRef> {
        if self.find_child(parent, symbol).is_some() {
            return None;
        }
        let p = parent.as_usize();
        if self.nodes[p].children.len() >= self.nodes[p].index.capacity() {
            let capacity = grown_capacity(self.nodes[p].index.capacity());
            self.rethread_children(parent, capacity);
        }
        let child = self.alloc(symbol);
        let c = &mut self.nodes[child.as_usize()];
        c.value = value;
        c.stamp = stamp;
        let node = &mut self.nodes[p];
        let slot = node.children.len();
        node.index.insert(slot, symbol.as_u32());
        node.children.push(child);
        Some(child)
    }

    /// Recompute `child_sum` of `node` from its children. Returns the stored
    /// value it replaced if the two disagreed.
    pub fn recount(&mut self, node: NodeRef) -> Option<u64> {
        let sum: u64 = self.nodes[node.as_usize()]
            .children
            .iter()
            .map(|c| self.nodes[c.as_usize()].value as u64)
            .sum();
        let n = &mut self.nodes[node.as_usize()];
        if n.child_sum == sum {
            None
        } else {
            Some(std::mem::replace(&mut n.child_sum, sum))
        }
    }

    /// Set `child_sum` directly, as stored in a brain file, ahead of [`Tree::recount`].
    pub fn set_child_sum(&mut self, node: NodeRef, child_sum: u64) {
        self.nodes[node.as_usize()].child_sum = child_sum;
    }

    /// Check that every live node satisfies `child_sum == Σ children.value` and
    /// that every child is reachable through its parent's index.
    pub fn is_consistent(&self) -> bool {
        let mut ok = true;
        let mut counted = 0;
        self.walk(|_, r, node| {
            counted += 1;
            let sum: u64 = node
                .children
                .iter()
                .map(|c| self.nodes[c.as_usize()].value as u64)
                .sum();
            ok &= sum == node.child_sum;
            ok &= node.children.len() <= node.index.capacity();
            for &c in &node.children {
                ok &= self.find_child(r, self.nodes[c.as_usize()].symbol) == Some(c);
            }
        });
        ok && counted == self.live
    }
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    fn no_op(_: SymbolId, _: u32) {}

    #[test]
    fn new_tree_has_root() {
        let tree = Tree::new();
        let root = tree.root();
        let node = tree.node(root);
        assert_eq!(node.symbol, ERROR_ID);
        assert_eq!(node.child_sum, 0);
        assert_eq!(node.value, 0);
        assert!(tree.children(root).is_empty());
        assert_eq!(tree.len(), 1);
        assert!(tree.is_empty());
    }

    #[test]
    fn find_or_create_child_starts_at_zero() {
        let mut tree = Tree::new();
        let root = tree.root();
        let (child, created) = tree.find_or_create_child(root, SymbolId(5));
        assert!(created);
        assert_eq!(tree.node(child).value, 0);
        assert_eq!(tree.node(root).child_sum, 0);
        let (same, created) = tree.find_or_create_child(root, SymbolId(5));
        assert_eq!(same, child);
        assert!(!created);
    }

    #[test]
    fn add_observation_increments_existing() {
        let mut tree = Tree::new();
        let root = tree.root();

        let first = tree.add_observation(root, SymbolId(5), 1);
        let second = tree.add_observation(root, SymbolId(5), 2);

        assert_eq!(first.node, second.node);
        assert!(first.created && !second.created);
        assert_eq!(tree.node(first.node).value, 2);
        assert_eq!(tree.node(root).child_sum, 2);
        assert_eq!(tree.node(root).stamp, 2);
        assert_eq!(tree.branch_count(root), 1);
        assert!(tree.is_consistent());
    }

    #[test]
    fn child_sum_invariant_after_every_observation() {
        let mut tree = Tree::new();
        let root = tree.root();
        for i in 0..200u32 {
            let seen = tree.add_observation(root, SymbolId(2 + i % 37), i);
            tree.add_observation(seen.node, SymbolId(2 + i % 5), i);
            assert!(tree.is_consistent());
        }
        assert_eq!(tree.node(root).child_sum, 200);
    }

    #[test]
    fn growth_sorts_by_descending_value() {
        let mut tree = Tree::new();
        let root = tree.root();
        // Capacity steps 1, 2, 3, 5: the fourth distinct child forces a growth.
        for _ in 0..3 {
            tree.add_observation(root, SymbolId(9), 0);
        }
        tree.add_observation(root, SymbolId(4), 0);
        tree.add_observation(root, SymbolId(7), 0);
        tree.add_observation(root, SymbolId(7), 0);
        tree.add_observation(root, SymbolId(3), 0);

        let symbols: Vec<SymbolId> = tree
            .children(root)
            .iter()
            .map(|&r| tree.node(r).symbol)
            .collect();
        assert_eq!(symbols, vec![SymbolId(9), SymbolId(7), SymbolId(4), SymbolId(3)]);
        assert!(tree.is_consistent());
    }

    #[test]
    fn growth_is_order_independent() {
        let build = |order: &[u32]| {
            let mut tree = Tree::new();
            let root = tree.root();
            for &s in order {
                for _ in 0..(s % 4 + 1) {
                    tree.add_observation(root, SymbolId(s), 0);
                }
            }
            let mut pairs: Vec<(SymbolId, u32)> = tree
                .children(root)
                .iter()
                .map(|&r| (tree.node(r).symbol, tree.node(r).value))
                .collect();
            pairs.sort();
            pairs
        };
        let forward: Vec<u32> = (2..150).collect();
        let backward: Vec<u32> = (2..150).rev().collect();
        assert_eq!(build(&forward), build(&backward));
    }

    #[test]
    fn find_child_missing() {
        let tree = Tree::new();
        assert_eq!(tree.find_child(tree.root(), SymbolId(99)), None);
    }

    #[test]
    fn count_saturation() {
        let mut tree = Tree::new();
        let root = tree.root();
        let seen = tree.add_observation(root, SymbolId(2), 0);
        tree.nodes[seen.node.as_usize()].value = u32::MAX;
        tree.nodes[root.as_usize()].child_sum = u32::MAX as u64;

        let again = tree.add_observation(root, SymbolId(2), 7);
        assert!(!again.counted);
        assert_eq!(tree.node(seen.node).value, u32::MAX);
        assert_eq!(tree.node(root).child_sum, u32::MAX as u64);
        assert_eq!(tree.node(seen.node).stamp, 7);
    }

    #[test]
    fn sample_empty_node_returns_error() {
        let tree = Tree::new();
        let mut rng = SmallRng::seed_from_u64(1);
        assert_eq!(tree.sample(tree.root(), &mut rng), ERROR_ID);
    }

    #[test]
    fn sample_single_child_is_certain() {
        let mut tree = Tree::new();
        let root = tree.root();
        tree.add_observation(root, SymbolId(8), 0);
        let mut rng = SmallRng::seed_from_u64(1);
        for _ in 0..100 {
            assert_eq!(tree.sample(root, &mut rng), SymbolId(8));
        }
    }

    #[test]
    fn sample_is_frequency_weighted() {
        let mut tree = Tree::new();
        let root = tree.root();
        for _ in 0..90 {
            tree.add_observation(root, SymbolId(2), 0);
        }
        for _ in 0..10 {
            tree.add_observation(root, SymbolId(3), 0);
        }
        let mut rng = SmallRng::seed_from_u64(7);
        let heavy = (0..10_000)
            .filter(|_| tree.sample(root, &mut rng) == SymbolId(2))
            .count();
        assert!((8_500..9_500).contains(&heavy), "heavy child drawn {heavy} times");
    }

    #[test]
    fn remove_child_frees_subtree() {
        let mut tree = Tree::new();
        let root = tree.root();
        let a = tree.add_observation(root, SymbolId(2), 1).node;
        tree.add_observation(a, SymbolId(3), 1);
        tree.add_observation(a, SymbolId(4), 1);
        tree.add_observation(root, SymbolId(5), 1);
        assert_eq!(tree.len(), 5);

        let mut freed_symbols = Vec::new();
        let freed = tree.remove_child(root, SymbolId(2), &mut |s, v| freed_symbols.push((s, v)));
        assert_eq!(freed, 3);
        freed_symbols.sort();
        assert_eq!(
            freed_symbols,
            vec![(SymbolId(2), 1), (SymbolId(3), 1), (SymbolId(4), 1)]
        );
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.node(root).child_sum, 1);
        assert_eq!(tree.find_child(root, SymbolId(2)), None);
        assert!(tree.find_child(root, SymbolId(5)).is_some());
        assert!(tree.is_consistent());
    }

    #[test]
    fn remove_missing_child_is_ignored() {
        let mut tree = Tree::new();
        let root = tree.root();
        tree.add_observation(root, SymbolId(2), 1);
        assert_eq!(tree.remove_child(root, SymbolId(3), &mut no_op), 0);
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn remove_clamps_child_sum_underflow() {
        let mut tree = Tree::new();
        let root = tree.root();
        let a = tree.add_observation(root, SymbolId(2), 1).node;
        tree.nodes[a.as_usize()].value = 50;
        tree.remove_child(root, SymbolId(2), &mut no_op);
        assert_eq!(tree.node(root).child_sum, 0);
    }

    #[test]
    fn freed_slots_are_reused() {
        let mut tree = Tree::new();
        let root = tree.root();
        let a = tree.add_observation(root, SymbolId(2), 1).node;
        tree.remove_child(root, SymbolId(2), &mut no_op);
        let b = tree.add_observation(root, SymbolId(3), 2).node;
        assert_eq!(a, b);
        assert_eq!(tree.node(b).symbol, SymbolId(3));
        assert_eq!(tree.node(b).value, 1);
    }

    #[test]
    fn removal_keeps_invariants_and_shrinks() {
        let mut tree = Tree::new();
        let root = tree.root();
        for s in 2..202 {
            tree.add_observation(root, SymbolId(s), 0);
        }
        let grown = tree.node(root).branch_capacity();
        for s in (2..190).step_by(3).chain((3..190).step_by(3)) {
            tree.remove_child(root, SymbolId(s), &mut no_op);
            assert!(tree.is_consistent());
        }
        assert!(tree.node(root).branch_capacity() < grown);
        for s in (4..190).step_by(3) {
            assert!(tree.find_child(root, SymbolId(s)).is_some());
        }
    }

    #[test]
    fn relabel_renames_and_reindexes() {
        let mut tree = Tree::new();
        let root = tree.root();
        let a = tree.add_observation(root, SymbolId(2), 1).node;
        tree.add_observation(a, SymbolId(9), 1);
        tree.add_observation(root, SymbolId(9), 1);

        let map = HashMap::from([(SymbolId(9), SymbolId(3))]);
        assert_eq!(tree.relabel(&map), 2);
        assert!(tree.find_child(root, SymbolId(3)).is_some());
        assert!(tree.find_child(a, SymbolId(3)).is_some());
        assert_eq!(tree.find_child(root, SymbolId(9)), None);
        assert!(tree.is_consistent());
    }

    #[test]
    fn walk_is_preorder_in_table_order() {
        let mut tree = Tree::new();
        let root = tree.root();
        let a = tree.add_observation(root, SymbolId(2), 1).node;
        tree.add_observation(a, SymbolId(3), 1);
        tree.add_observation(root, SymbolId(4), 1);

        let mut seen = Vec::new();
        tree.walk(|depth, _, node| seen.push((depth, node.symbol)));
        assert_eq!(
            seen,
            vec![
                (0, ERROR_ID),
                (1, SymbolId(2)),
                (2, SymbolId(3)),
                (1, SymbolId(4)),
            ]
        );
    }

    #[test]
    fn stamp_range_ignores_root() {
        let mut tree = Tree::new();
        assert_eq!(tree.stamp_range(), None);
        let root = tree.root();
        tree.add_observation(root, SymbolId(2), 4);
        tree.add_observation(root, SymbolId(3), 9);
        assert_eq!(tree.stamp_range(), Some((4, 9)));
    }

    #[test]
    fn attach_and_recount() {
        let mut tree = Tree::new();
        let root = tree.root();
        tree.reserve_children(root, 2);
        tree.set_child_sum(root, 99);
        tree.attach(root, SymbolId(2), 3, 1).unwrap();
        tree.attach(root, SymbolId(5), 4, 1).unwrap();
        assert!(tree.attach(root, SymbolId(5), 1, 1).is_none());
        assert_eq!(tree.node(root).branch_capacity(), 2);
        assert_eq!(tree.recount(root), Some(99));
        assert_eq!(tree.node(root).child_sum, 7);
        assert_eq!(tree.recount(root), None);
        assert!(tree.is_consistent());
    }

    #[test]
    fn node_ref_serde_roundtrip() {
        let r = NodeRef(17);
        let json = serde_json::to_string(&r).unwrap();
        let back: NodeRef = serde_json::from_str(&json).unwrap();
        assert_eq!(r, back);
    }
}
