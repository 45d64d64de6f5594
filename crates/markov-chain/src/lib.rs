//! Bidirectional Markov model with context window, pruning and persistence.
//!
//! [`Model`] is the composition root of the brain: a forward context tree, a
//! backward context tree and the symbol dictionary they share, plus a logical
//! clock that stamps every observation. The [`ContextWindow`] type manages the
//! sliding context state used during both learning (mutating a tree) and
//! generation/evaluation (read-only traversal).
//!
//! A model keeps itself within a node budget by pruning stale subtrees
//! ([`Model::prune`]), and persists to a compact little-endian brain file
//! guarded by an advisory exclusive lock ([`Model::save`], [`Model::load`]).

mod brain;
mod dump;
mod error;
mod prune;

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use ngram_trie::{NodeRef, Tree};
use symbol_core::{FIN_ID, SymbolId};
use symbol_dict::Dictionary;
use tracing::{info, warn};

pub use brain::{COOKIE, LockPolicy};
pub use dump::DumpFlags;
pub use error::{BrainError, Result};
pub use prune::{PruneReport, Pruner};

use brain::HeldLock;

/// A sliding context window tracking position in a context tree.
///
/// Stores `order + 2` slots (indices 0 through `order + 1`). Slot 0 is always
/// the tree root; deeper slots track progressively longer context paths.
///
/// Because slots store [`NodeRef`] indices (not borrows), the window is safe
/// to use alongside `&mut Tree`. Pruning frees nodes, so a window must be
/// re-initialized after the tree it points into has been pruned.
#[derive(Debug, Clone)]
pub struct ContextWindow {
    slots: Vec<Option<NodeRef>>,
    order: u8,
}

impl ContextWindow {
    /// Create a new context window for a model of the given order.
    /// All slots are initialized to `None`.
    pub fn new(order: u8) -> Self {
        ContextWindow {
            slots: vec![None; order as usize + 2],
            order,
        }
    }

    /// Reset the window: set slot[0] to `root`, all others to `None`.
    pub fn initialize(&mut self, root: NodeRef) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.slots[0] = Some(root);
    }

    /// Read-only advance: update context by finding (not creating) children.
    ///
    /// Walks from depth `order + 1` down to 1: if `slots[d-1]` is non-None,
    /// look up the symbol as a child and store the result (which may be
    /// `None`) in `slots[d]`.
    pub fn advance(&mut self, tree: &Tree, symbol: SymbolId) {
        for d in (1..=self.order as usize + 1).rev() {
            if let Some(parent) = self.slots[d - 1] {
                self.slots[d] = tree.find_child(parent, symbol);
            }
        }
    }

    /// Mutating advance used during learning.
    ///
    /// Records one observation of `symbol` at every depth that has a context,
    /// stamping it with `stamp`, and keeps the dictionary's reference counts
    /// in step with the nodes created and counted.
    pub fn advance_and_learn(
        &mut self,
        tree: &mut Tree,
        dict: &mut Dictionary,
        symbol: SymbolId,
        stamp: u32,
    ) {
        for d in (1..=self.order as usize + 1).rev() {
            if let Some(parent) = self.slots[d - 1] {
                let seen = tree.add_observation(parent, symbol, stamp);
                if seen.created || seen.counted {
                    dict.bump_reference(symbol, seen.created as u64, seen.counted as u64);
                }
                self.slots[d] = Some(seen.node);
            }
        }
    }

    /// Get the context node at depth `j` (0-indexed).
    #[inline]
    pub fn at_depth(&self, j: usize) -> Option<NodeRef> {
        self.slots.get(j).copied().flatten()
    }

    /// Get the deepest non-None context node, scanning slots 0 through `order`.
    pub fn deepest(&self) -> Option<NodeRef> {
        self.slots[..=self.order as usize]
            .iter()
            .rev()
            .find_map(|slot| *slot)
    }

    /// The model order this window was created for.
    #[inline]
    pub fn order(&self) -> u8 {
        self.order
    }
}

/// A bidirectional Markov model: forward tree + backward tree + shared dictionary.
///
/// Learning trains both trees from the same token sequence, forward
/// (left-to-right) and backward (right-to-left), so a reply can be grown in
/// both directions from a seed word.
#[derive(Debug)]
pub struct Model {
    order: u8,
    forward: Tree,
    backward: Tree,
    dictionary: Dictionary,
    context: ContextWindow,
    clock: u32,
    pruner: Pruner,
    node_budget: usize,
    lock_policy: LockPolicy,
    lock: Option<HeldLock>,
}

impl Model {
    /// Create a new empty model with the given order and node budget.
    ///
    /// # Panics
    ///
    /// If `order` is zero.
    pub fn new(order: u8, node_budget: usize) -> Self {
        assert!(order > 0, "model order must be at least 1");
        let forward = Tree::new();
        let mut context = ContextWindow::new(order);
        context.initialize(forward.root());
        Model {
            order,
            forward,
            backward: Tree::new(),
            dictionary: Dictionary::new(),
            context,
            clock: 0,
            pruner: Pruner::default(),
            node_budget,
            lock_policy: LockPolicy::default(),
            lock: None,
        }
    }

    /// Use `policy` when waiting for brain file locks.
    pub fn with_lock_policy(mut self, policy: LockPolicy) -> Self {
        self.lock_policy = policy;
        self
    }

    #[inline]
    pub fn order(&self) -> u8 {
        self.order
    }

    #[inline]
    pub fn forward(&self) -> &Tree {
        &self.forward
    }

    #[inline]
    pub fn backward(&self) -> &Tree {
        &self.backward
    }

    #[inline]
    pub fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }

    /// Current logical time: the number of sentences learned.
    #[inline]
    pub fn clock(&self) -> u32 {
        self.clock
    }

    #[inline]
    pub fn node_budget(&self) -> usize {
        self.node_budget
    }

    pub fn set_node_budget(&mut self, node_budget: usize) {
        self.node_budget = node_budget;
    }

    /// Live nodes in both trees, roots included.
    #[inline]
    pub fn node_count(&self) -> usize {
        self.forward.len() + self.backward.len()
    }

    #[inline]
    pub fn over_budget(&self) -> bool {
        self.node_count() > self.node_budget
    }

    /// Whether this model holds the lock on a brain file.
    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    /// Give up the lock on the loaded brain file without saving.
    ///
    /// Returns false if no lock was held.
    pub fn release_lock(&mut self) -> bool {
        self.lock.take().is_some()
    }

    fn tick(&mut self) -> u32 {
        if self.clock == u32::MAX {
            warn!("logical clock saturated, new observations share the last stamp");
        } else {
            self.clock += 1;
        }
        self.clock
    }

    /// Learn from a token sequence, updating both trees.
    ///
    /// Skips entirely if `tokens.len() <= order` (too short for meaningful
    /// context) and returns false. Otherwise interns every token, trains the
    /// forward tree left to right and the backward tree right to left, each
    /// finishing with `FIN_ID`.
    pub fn learn<T: AsRef<[u8]>>(&mut self, tokens: &[T]) -> bool {
        if tokens.len() <= self.order as usize {
            return false;
        }
        let stamp = self.tick();

        let symbol_ids: Vec<SymbolId> = tokens
            .iter()
            .map(|tok| self.dictionary.intern(tok.as_ref()))
            .collect();

        self.context.initialize(self.forward.root());
        for &id in &symbol_ids {
            self.context
                .advance_and_learn(&mut self.forward, &mut self.dictionary, id, stamp);
        }
        self.context
            .advance_and_learn(&mut self.forward, &mut self.dictionary, FIN_ID, stamp);

        self.context.initialize(self.backward.root());
        for &id in symbol_ids.iter().rev() {
            self.context
                .advance_and_learn(&mut self.backward, &mut self.dictionary, id, stamp);
        }
        self.context
            .advance_and_learn(&mut self.backward, &mut self.dictionary, FIN_ID, stamp);
        true
    }

    /// Create a context window initialized to the forward tree root.
    pub fn forward_context(&self) -> ContextWindow {
        let mut ctx = ContextWindow::new(self.order);
        ctx.initialize(self.forward.root());
        ctx
    }

    /// Create a context window initialized to the backward tree root.
    pub fn backward_context(&self) -> ContextWindow {
        let mut ctx = ContextWindow::new(self.order);
        ctx.initialize(self.backward.root());
        ctx
    }

    /// Bring the model back under its node budget.
    ///
    /// Does nothing while the budget holds. Otherwise evicts stale subtrees,
    /// then forgets words no node references any more; the report lists them
    /// together with every identifier that compaction changed.
    pub fn prune(&mut self) -> PruneReport {
        if !self.over_budget() {
            return PruneReport::default();
        }
        let before = self.node_count();
        let reclaimed = self.pruner.run(
            &mut self.forward,
            &mut self.backward,
            &mut self.dictionary,
            self.node_budget,
        );
        let mut report = PruneReport {
            reclaimed,
            ..PruneReport::default()
        };
        if reclaimed > 0 {
            let (forgotten, renumbered) =
                prune::forget_orphans(&mut self.forward, &mut self.backward, &mut self.dictionary);
            report.forgotten = forgotten;
            report.renumbered = renumbered;
        }
        self.context.initialize(self.forward.root());

        info!(
            before,
            after = self.node_count(),
            budget = self.node_budget,
            forgotten = report.forgotten.len(),
            "pruned model"
        );
        if self.over_budget() {
            warn!(
                nodes = self.node_count(),
                budget = self.node_budget,
                "still over budget: every remaining node is recent"
            );
        }
        report
    }

    /// Write the brain to `path`.
    ///
    /// Saving to the file this model was loaded from rewrites it through the
    /// held lock and then releases the lock. Any other path is created if
    /// needed and locked for the duration of the write.
    pub fn save(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let bytes = brain::encode(self.order, &self.forward, &self.backward, &self.dictionary);
        let held = match self.lock.take() {
            Some(held) if held.is_for(path) => held,
            other => {
                self.lock = other;
                HeldLock::acquire(path, true, &self.lock_policy)?
            }
        };
        held.rewrite(&bytes)?;
        info!(path = %path.display(), bytes = bytes.len(), "saved brain");
        Ok(())
    }

    /// Read a brain from `path`, keeping the file locked until it is saved back,
    /// released with [`Model::release_lock`], or the model is dropped.
    ///
    /// Reference counts are rebuilt from the trees and the model is pruned
    /// right away if it does not fit `node_budget`.
    pub fn load(path: impl AsRef<Path>, node_budget: usize, policy: LockPolicy) -> Result<Model> {
        let path = path.as_ref();
        let mut held = HeldLock::acquire(path, false, &policy)?;
        let bytes = held.read_all()?;
        let brain::Decoded {
            order,
            forward,
            backward,
            mut dictionary,
        } = brain::decode(&bytes)?;
        brain::set_reference_counts(&forward, &backward, &mut dictionary);

        let clock = [forward.stamp_range(), backward.stamp_range()]
            .into_iter()
            .flatten()
            .map(|(_, newest)| newest)
            .max()
            .unwrap_or(0);
        let mut context = ContextWindow::new(order);
        context.initialize(forward.root());

        let mut model = Model {
            order,
            forward,
            backward,
            dictionary,
            context,
            clock,
            pruner: Pruner::default(),
            node_budget,
            lock_policy: policy,
            lock: Some(held),
        };
        info!(
            path = %path.display(),
            order,
            nodes = model.node_count(),
            words = model.dictionary.len(),
            clock,
            "loaded brain"
        );
        model.prune();
        Ok(model)
    }

    /// Write a human-readable dump of the model to `path`.
    pub fn dump(&self, path: impl AsRef<Path>, flags: DumpFlags) -> Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        self.write_dump(&mut out, flags)?;
        out.flush()?;
        Ok(())
    }

    /// Write a human-readable dump of the model to `out`.
    pub fn write_dump<W: Write>(&self, out: &mut W, flags: DumpFlags) -> io::Result<()> {
        dump::write_dump(
            out,
            flags,
            self.order,
            &self.forward,
            &self.backward,
            &self.dictionary,
        )
    }

    /// Check the structural invariants of both trees and the dictionary.
    pub fn is_consistent(&self) -> bool {
        self.forward.is_consistent()
            && self.backward.is_consistent()
            && self.dictionary.is_consistent()
    }
}
