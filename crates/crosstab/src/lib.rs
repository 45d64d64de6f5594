//! Fixed-capacity symmetric co-occurrence matrix over a subset of symbols.
//!
//! The crosstab tracks which keywords appear near each other. Row `i` belongs
//! to whichever symbol currently occupies slot `i` of a hash-indexed row table
//! (the same closed-addressing [`ChainIndex`] the dictionary uses). Counts live
//! in the upper triangle of an `m × m` matrix, addressed canonically as
//! `(min, max)`.
//!
//! Per row the matrix keeps a marginal count and the number of distinct
//! neighbours; globally it keeps the grand total and distinct cell count. A
//! symbol's importance is its marginal share of the total ([`Crosstab::ask`]).
//!
//! Capacity never changes. When every row is taken, adding a new symbol evicts
//! the weakest row (lowest marginal share) and wipes its contribution from
//! every surviving row and from the totals. Free rows form a singly linked
//! list threaded through the chain links of unused slots.

use std::collections::HashMap;

use rand::Rng;
use symbol_core::{ChainIndex, NIL, SymbolId};
use tracing::debug;

#[derive(Clone, Copy, Debug, Default)]
struct Row {
    symbol: SymbolId,
    marginal: u64,
    distinct: u32,
    live: bool,
}

/// Bounded symmetric co-occurrence matrix.
#[derive(Debug, Clone)]
pub struct Crosstab {
    rows: Vec<Row>,
    index: ChainIndex,
    free_head: u32,
    cells: Vec<u32>,
    total: u64,
    distinct: u64,
    live: usize,
}

#[inline]
fn cell(x: usize, y: usize) -> usize {
    let (lo, hi) = if x <= y { (x, y) } else { (y, x) };
    hi * (hi + 1) / 2 + lo
}

impl Crosstab {
    /// Create an empty matrix with room for `capacity` symbols.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "crosstab capacity must be positive");
        let mut index = ChainIndex::with_capacity(capacity);
        for slot in 0..capacity {
            let next = if slot + 1 < capacity { (slot + 1) as u32 } else { NIL };
            index.set_link(slot, next);
        }
        Crosstab {
            rows: vec![Row::default(); capacity],
            index,
            free_head: 0,
            cells: vec![0; capacity * (capacity + 1) / 2],
            total: 0,
            distinct: 0,
            live: 0,
        }
    }

    /// Maximum number of rows.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.rows.len()
    }

    /// Number of rows currently holding a symbol.
    #[inline]
    pub fn live_rows(&self) -> usize {
        self.live
    }

    /// Grand total of all pair counts.
    #[inline]
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Number of distinct pairs with a nonzero count.
    #[inline]
    pub fn distinct(&self) -> u64 {
        self.distinct
    }

    fn row_of(&self, symbol: SymbolId) -> Option<usize> {
        self.index.find(symbol.as_u32(), |r| {
            self.rows[r].live && self.rows[r].symbol == symbol
        })
    }

    /// The row index of `symbol`, allocating one if needed.
    ///
    /// Takes a free row if there is one, otherwise evicts the weakest row other
    /// than `pinned`. Returns `None` only when the sole candidate is pinned.
    pub fn find_or_allocate_row(
        &mut self,
        symbol: SymbolId,
        pinned: Option<usize>,
    ) -> Option<usize> {
        if let Some(r) = self.row_of(symbol) {
            return Some(r);
        }

        let slot = if self.free_head != NIL {
            let slot = self.free_head as usize;
            self.free_head = self.index.link(slot);
            slot
        } else {
            let victim = self.victim(pinned)?;
            debug!(
                evicted = self.rows[victim].symbol.as_u32(),
                marginal = self.rows[victim].marginal,
                incoming = symbol.as_u32(),
                "crosstab full, evicting weakest row"
            );
            self.wipe(victim);
            // The wipe pushed the victim onto the free list.
            self.free_head = self.index.link(victim);
            victim
        };

        self.rows[slot] = Row {
            symbol,
            marginal: 0,
            distinct: 0,
            live: true,
        };
        self.index.insert(slot, symbol.as_u32());
        self.live += 1;
        Some(slot)
    }

    /// The live row with the smallest share of the grand total.
    ///
    /// Every share has the same denominator, so comparing marginals is enough.
    /// Ties go to the row with fewer distinct neighbours.
    fn victim(&self, pinned: Option<usize>) -> Option<usize> {
        self.rows
            .iter()
            .enumerate()
            .filter(|&(i, row)| row.live && Some(i) != pinned)
            .min_by_key(|&(_, row)| (row.marginal, row.distinct))
            .map(|(i, _)| i)
    }

    /// Zero a row against every live row, then free it.
    fn wipe(&mut self, row: usize) {
        for other in 0..self.rows.len() {
            if !self.rows[other].live {
                continue;
            }
            let c = cell(row, other);
            let count = self.cells[c] as u64;
            if count == 0 {
                continue;
            }
            self.cells[c] = 0;
            self.total = self.total.saturating_sub(count);
            self.distinct = self.distinct.saturating_sub(1);
            if other != row {
                let r = &mut self.rows[other];
                r.marginal = r.marginal.saturating_sub(count);
                r.distinct = r.distinct.saturating_sub(1);
            }
        }

        let symbol = self.rows[row].symbol;
        self.index.unlink(row, symbol.as_u32());
        self.rows[row] = Row::default();
        self.index.set_link(row, self.free_head);
        self.free_head = row as u32;
        self.live -= 1;
    }

    /// Record that `x` and `y` occurred together with strength `weight`.
    pub fn add_pair(&mut self, x: SymbolId, y: SymbolId, weight: u32) {
        if weight == 0 {
            return;
        }
        let Some(rx) = self.find_or_allocate_row(x, None) else {
            return;
        };
        let Some(ry) = self.find_or_allocate_row(y, Some(rx)) else {
            debug!(x = x.as_u32(), y = y.as_u32(), "no crosstab row available for pair");
            return;
        };

        let c = cell(rx, ry);
        let before = self.cells[c];
        let after = before.saturating_add(weight);
        let added = (after - before) as u64;
        self.cells[c] = after;

        self.rows[rx].marginal += added;
        if ry != rx {
            self.rows[ry].marginal += added;
        }
        self.total += added;

        if before == 0 && after > 0 {
            self.rows[rx].distinct += 1;
            if ry != rx {
                self.rows[ry].distinct += 1;
            }
            self.distinct += 1;
        }
    }

    /// Share of the grand total involving `symbol`, in `[0, 1]`.
    ///
    /// Zero for symbols without a row or an empty matrix.
    pub fn ask(&self, symbol: SymbolId) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        match self.row_of(symbol) {
            Some(r) => self.rows[r].marginal as f64 / self.total as f64,
            None => 0.0,
        }
    }

    /// The symbol occupying row `row`, if any.
    pub fn get(&self, row: usize) -> Option<SymbolId> {
        self.rows
            .get(row)
            .filter(|r| r.live)
            .map(|r| r.symbol)
    }

    /// Co-occurrence count of `x` and `y`.
    pub fn pair(&self, x: SymbolId, y: SymbolId) -> u32 {
        match (self.row_of(x), self.row_of(y)) {
            (Some(rx), Some(ry)) => self.cells[cell(rx, ry)],
            _ => 0,
        }
    }

    /// Marginal count of `symbol`.
    pub fn marginal(&self, symbol: SymbolId) -> u64 {
        self.row_of(symbol).map_or(0, |r| self.rows[r].marginal)
    }

    /// Drop `symbol`'s row and all of its pairs. Returns false if it had no row.
    pub fn remove(&mut self, symbol: SymbolId) -> bool {
        match self.row_of(symbol) {
            Some(r) => {
                self.wipe(r);
                true
            }
            None => false,
        }
    }

    /// Rename row symbols after dictionary compaction.
    ///
    /// Targets must not already have a row.
    pub fn relabel(&mut self, map: &HashMap<SymbolId, SymbolId>) {
        let moved: Vec<usize> = (0..self.rows.len())
            .filter(|&r| self.rows[r].live && map.contains_key(&self.rows[r].symbol))
            .collect();
        for &r in &moved {
            self.index.unlink(r, self.rows[r].symbol.as_u32());
        }
        for &r in &moved {
            let to = map[&self.rows[r].symbol];
            self.rows[r].symbol = to;
            self.index.insert(r, to.as_u32());
        }
    }

    /// Pick a random live row whose symbol passes `accept`.
    ///
    /// Starts at a uniformly random row index and scans forward, so rows after
    /// a long run of free slots are favoured slightly; seeding stays O(1) on a
    /// well-filled matrix.
    pub fn seed<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        mut accept: impl FnMut(SymbolId) -> bool,
    ) -> Option<SymbolId> {
        if self.live == 0 {
            return None;
        }
        let m = self.rows.len();
        let start = rng.random_range(0..m);
        (0..m)
            .map(|offset| (start + offset) % m)
            .filter_map(|r| self.get(r))
            .find(|&symbol| accept(symbol))
    }

    /// Check marginals, distinct counts and the free list against the cells.
    pub fn is_consistent(&self) -> bool {
        let m = self.rows.len();
        let mut total = 0u64;
        let mut distinct = 0u64;
        for y in 0..m {
            for x in 0..=y {
                let count = self.cells[cell(x, y)];
                if count > 0 && !(self.rows[x].live && self.rows[y].live) {
                    return false;
                }
                total += count as u64;
                distinct += (count > 0) as u64;
            }
        }
        if total != self.total || distinct != self.distinct {
            return false;
        }
        for r in 0..m {
            let row = &self.rows[r];
            if !row.live {
                if row.marginal != 0 || row.distinct != 0 {
                    return false;
                }
                continue;
            }
            let marginal: u64 = (0..m).map(|o| self.cells[cell(r, o)] as u64).sum();
            let neighbours = (0..m).filter(|&o| self.cells[cell(r, o)] > 0).count();
            if marginal != row.marginal || neighbours != row.distinct as usize {
                return false;
            }
            if self.row_of(row.symbol) != Some(r) {
                return false;
            }
        }
        let mut free = 0;
        let mut slot = self.free_head;
        while slot != NIL {
            if self.rows[slot as usize].live || free > m {
                return false;
            }
            free += 1;
            slot = self.index.link(slot as usize);
        }
        free + self.live == m
    }
}
