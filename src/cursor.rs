//! Single-column scan engine (spec §4.3 "Scan Engine — Single Column").
//!
//! A `Cursor` descends once to its starting leaf, then walks right-links
//! (forward) or re-descends from root to find each predecessor (backward,
//! spec §9 "no left-links"), evaluating the range's far bound as a stop
//! condition and its near bound as a skip condition (only ever relevant on
//! the first leaf touched, since keys are monotonic from there on).

use crate::config::Config;
use crate::error::Result;
use crate::page::internal;
use crate::page::leaf;
use crate::page::meta::{self as page_meta, Meta};
use crate::pager::PageStore;
use crate::prefetch::{self, ScanShape};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    Initialized,
    Positioned,
    Exhausted,
    Closed,
}

#[derive(Debug, Clone)]
pub struct Bound {
    pub value: Vec<u8>,
    pub inclusive: bool,
}

/// An optional lower and/or upper bound on the encoded key. Equality folds
/// both bounds to the same inclusive value (spec §4.3 "Key range").
#[derive(Debug, Clone, Default)]
pub struct KeyRange {
    pub lower: Option<Bound>,
    pub upper: Option<Bound>,
}

impl KeyRange {
    pub fn unbounded() -> KeyRange {
        KeyRange { lower: None, upper: None }
    }

    pub fn equals(key: Vec<u8>) -> KeyRange {
        KeyRange {
            lower: Some(Bound { value: key.clone(), inclusive: true }),
            upper: Some(Bound { value: key, inclusive: true }),
        }
    }

    pub fn at_least(key: Vec<u8>) -> KeyRange {
        KeyRange { lower: Some(Bound { value: key, inclusive: true }), upper: None }
    }

    pub fn less_than(key: Vec<u8>) -> KeyRange {
        KeyRange { lower: None, upper: Some(Bound { value: key, inclusive: false }) }
    }

    pub fn is_equality(&self) -> bool {
        match (&self.lower, &self.upper) {
            (Some(l), Some(u)) => l.inclusive && u.inclusive && l.value == u.value,
            _ => false,
        }
    }

    fn satisfies_lower(&self, key: &[u8]) -> bool {
        match &self.lower {
            None => true,
            Some(b) if b.inclusive => key >= b.value.as_slice(),
            Some(b) => key > b.value.as_slice(),
        }
    }

    fn satisfies_upper(&self, key: &[u8]) -> bool {
        match &self.upper {
            None => true,
            Some(b) if b.inclusive => key <= b.value.as_slice(),
            Some(b) => key < b.value.as_slice(),
        }
    }

    fn shape(&self) -> ScanShape {
        if self.is_equality() {
            ScanShape::Equality
        } else if self.lower.is_none() && self.upper.is_none() {
            ScanShape::UnboundedForward
        } else {
            ScanShape::Bounded
        }
    }
}

/// Cached `(run_start, run_end)` plus the run's already-decoded key/include,
/// so re-entering the same run on the next row is two integer comparisons
/// instead of a run-table rebuild (spec §9 "Duplicate-include caching").
struct RunCache {
    block: u32,
    bounds: (usize, usize),
    key: Vec<u8>,
    include: Vec<u8>,
}

/// Descends from `root_block` through `height` internal levels, choosing at
/// each level either the last child whose separator is `<= key`
/// (`strict_less = false`, an ordinary lower-bound descent) or the last
/// child whose separator is `< key` (`strict_less = true`, used to find a
/// predecessor leaf). `height == 0` means the root is itself a leaf.
pub(crate) fn descend_for_leaf(
    store: &PageStore,
    root_block: u32,
    height: u16,
    key: &[u8],
    strict_less: bool,
) -> Option<u32> {
    if height == 0 {
        return Some(root_block);
    }
    let mut block = root_block;
    for _ in 0..height {
        let page = store.pin(block as u64);
        let next = if strict_less {
            internal::child_for_key_strict_less(page.memory(), key)
        } else {
            Some(internal::child_for_key(page.memory(), key))
        };
        drop(page);
        match next {
            Some(c) => block = c,
            None => return None,
        }
    }
    Some(block)
}

pub struct Cursor<'a> {
    store: &'a PageStore,
    meta: &'a Meta,
    config: &'a Config,
    range: KeyRange,
    direction: Direction,
    state: CursorState,
    current_block: u32,
    current_idx: usize,
    pages_scanned: u32,
    run_cache: Option<RunCache>,
    cancel: Option<Arc<AtomicBool>>,
    /// Set by the parallel coordinator (`parallel.rs`) to bypass slow start
    /// and issue a fixed-depth prefetch instead (spec §4.5).
    fixed_prefetch_depth: Option<u16>,
    /// Exclusive end of the current parallel claim (spec §4.5): when
    /// forward iteration would step onto this block, the cursor reports a
    /// claim boundary instead of descending further, so `parallel.rs` can
    /// claim the next range and rebind without a fresh root descent.
    claim_end: Option<u32>,
}

impl<'a> Cursor<'a> {
    pub fn open(store: &'a PageStore, meta: &'a Meta, config: &'a Config, range: KeyRange, direction: Direction) -> Cursor<'a> {
        Cursor {
            store,
            meta,
            config,
            range,
            direction,
            state: CursorState::Initialized,
            current_block: page_meta::INVALID_BLOCK,
            current_idx: 0,
            pages_scanned: 0,
            run_cache: None,
            cancel: None,
            fixed_prefetch_depth: None,
            claim_end: None,
        }
    }

    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Cursor<'a> {
        self.cancel = Some(flag);
        self
    }

    /// Used only by the parallel worker wrapper (spec §4.5 "workers issue
    /// prefetches at smol_prefetch_depth, no slow start").
    pub(crate) fn with_fixed_prefetch_depth(mut self, depth: u16) -> Cursor<'a> {
        self.fixed_prefetch_depth = Some(depth);
        self
    }

    /// Jumps straight to `block` (offset 0) without a root descent and
    /// bounds forward iteration to stop at `claim_end` (exclusive). Used by
    /// `parallel.rs` to hand a worker's cursor a freshly claimed leaf range
    /// (spec §4.5 "claim a contiguous range ... atomically advancing
    /// next_block").
    pub(crate) fn rebind_to_claim(&mut self, block: u32, claim_end: u32) {
        self.current_block = block;
        self.current_idx = 0;
        self.run_cache = None;
        self.state = CursorState::Positioned;
        self.claim_end = Some(claim_end);
    }

    /// True once forward iteration has stepped up to (but not past) the
    /// exclusive end of the current claim — the worker should claim a new
    /// range and `rebind_to_claim`, or stop if none remains.
    pub(crate) fn at_claim_boundary(&self) -> bool {
        self.claim_end == Some(self.current_block) && self.current_idx == 0
    }

    /// Repositions the cursor to scan the given range, as if freshly opened
    /// (spec §4.3 "rescan returns any state to initialized").
    pub fn rescan(&mut self, range: KeyRange) {
        self.range = range;
        self.state = CursorState::Initialized;
        self.pages_scanned = 0;
        self.run_cache = None;
    }

    pub fn close(&mut self) {
        self.state = CursorState::Closed;
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    fn canceled(&self) -> bool {
        self.cancel.as_ref().is_some_and_true()
    }

    pub fn next(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        match self.state {
            CursorState::Closed | CursorState::Exhausted => return Ok(None),
            CursorState::Initialized => {
                self.position()?;
                if self.state != CursorState::Positioned {
                    return Ok(None);
                }
            }
            CursorState::Positioned => {}
        }
        self.advance_one()
    }

    fn position(&mut self) -> Result<()> {
        match self.direction {
            Direction::Forward => self.position_forward(),
            Direction::Backward => self.position_backward(),
        }
    }

    fn start_leaf_forward(&self) -> u32 {
        match &self.range.lower {
            None => self.meta.first_leaf,
            Some(b) => {
                let fixed_width_first_col = self.meta.schema.keys[0].is_fixed_width_integer();
                let directory_usable =
                    fixed_width_first_col && !self.meta.directory.is_empty() && !self.meta.directory_is_sampled();
                if directory_usable {
                    page_meta::directory_seek(&self.meta.directory, &b.value).unwrap_or(self.meta.first_leaf)
                } else {
                    descend_for_leaf(self.store, self.meta.root_block, self.meta.height, &b.value, false)
                        .unwrap_or(self.meta.first_leaf)
                }
            }
        }
    }

    fn position_forward(&mut self) -> Result<()> {
        if self.meta.is_empty_tree() {
            self.state = CursorState::Exhausted;
            return Ok(());
        }
        let mut block = self.start_leaf_forward();
        loop {
            let page = self.store.pin(block as u64);
            let n = leaf::nitems(page.memory()) as usize;
            let idx = match &self.range.lower {
                Some(b) => leaf::locate_ge(&self.meta.schema, page.memory(), &b.value),
                None => 0,
            };
            if idx < n {
                self.current_block = block;
                self.current_idx = idx;
                self.run_cache = None;
                self.state = CursorState::Positioned;
                return Ok(());
            }
            let next = leaf::right_link(page.memory());
            drop(page);
            if next == leaf::INVALID_BLOCK {
                self.state = CursorState::Exhausted;
                return Ok(());
            }
            block = next;
        }
    }

    fn predecessor_leaf(&self, first_key_of_current_leaf: &[u8]) -> Option<u32> {
        if self.meta.height == 0 {
            return None;
        }
        descend_for_leaf(
            self.store,
            self.meta.root_block,
            self.meta.height,
            first_key_of_current_leaf,
            true,
        )
    }

    fn position_backward(&mut self) -> Result<()> {
        if self.meta.is_empty_tree() {
            self.state = CursorState::Exhausted;
            return Ok(());
        }
        let start_block = match &self.range.upper {
            Some(b) => descend_for_leaf(self.store, self.meta.root_block, self.meta.height, &b.value, false)
                .unwrap_or(self.meta.last_leaf),
            None => self.meta.last_leaf,
        };
        self.position_backward_in(start_block)
    }

    /// Finds the rightmost entry `<= upper bound` starting at `block`,
    /// stepping to the predecessor leaf if `block` has nothing qualifying
    /// (only possible when the directory/descent landed one leaf too far
    /// right, e.g. the upper bound falls strictly before this leaf's first
    /// entry).
    fn position_backward_in(&mut self, mut block: u32) -> Result<()> {
        loop {
            let page = self.store.pin(block as u64);
            let n = leaf::nitems(page.memory()) as usize;
            let idx = match &self.range.upper {
                Some(b) => {
                    let ge = leaf::locate_ge(&self.meta.schema, page.memory(), &b.value);
                    if ge < n {
                        let (k, _) = leaf::entry_at(&self.meta.schema, page.memory(), ge);
                        if k == b.value.as_slice() && b.inclusive {
                            // `locate_ge` lands on the first entry of a duplicate-key
                            // run; backward iteration must start at its last entry or
                            // every earlier duplicate in the run gets skipped.
                            let (_, run_end) = leaf::run_bounds_at(&self.meta.schema, page.memory(), ge);
                            Some(run_end - 1)
                        } else if ge == 0 {
                            None
                        } else {
                            Some(ge - 1)
                        }
                    } else {
                        Some(n - 1)
                    }
                }
                None => Some(n - 1),
            };
            match idx {
                Some(i) => {
                    self.current_block = block;
                    self.current_idx = i;
                    self.run_cache = None;
                    self.state = CursorState::Positioned;
                    return Ok(());
                }
                None => {
                    let first_key = leaf::entry_at(&self.meta.schema, page.memory(), 0).0.to_vec();
                    drop(page);
                    match self.predecessor_leaf(&first_key) {
                        Some(pred) => block = pred,
                        None => {
                            self.state = CursorState::Exhausted;
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    fn fetch_entry(&mut self, page: &[u8], idx: usize) -> (Vec<u8>, Vec<u8>) {
        if leaf::is_plain(page) {
            let (k, i) = leaf::entry_at(&self.meta.schema, page, idx);
            return (k.to_vec(), i.to_vec());
        }
        if let Some(c) = &self.run_cache {
            if c.block == self.current_block && idx >= c.bounds.0 && idx < c.bounds.1 {
                return (c.key.clone(), c.include.clone());
            }
        }
        let (k, i) = leaf::entry_at(&self.meta.schema, page, idx);
        let bounds = leaf::run_bounds_at(&self.meta.schema, page, idx);
        let key = k.to_vec();
        let include = i.to_vec();
        self.run_cache = Some(RunCache {
            block: self.current_block,
            bounds,
            key: key.clone(),
            include: include.clone(),
        });
        (key, include)
    }

    fn issue_prefetch(&mut self) {
        if self.direction == Direction::Backward {
            return;
        }
        let depth = match self.fixed_prefetch_depth {
            Some(d) => d,
            None => prefetch::depth_for(self.range.shape(), self.pages_scanned, self.config.max_prefetch_depth),
        };
        tracing::trace!(pages_scanned = self.pages_scanned, depth, "prefetch depth");
        let mut block = self.current_block;
        for _ in 0..depth {
            let page = self.store.pin(block as u64);
            let next = leaf::right_link(page.memory());
            drop(page);
            if next == leaf::INVALID_BLOCK {
                break;
            }
            self.store.prefetch(next as u64);
            block = next;
        }
    }

    fn advance_one(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        loop {
            if self.canceled() {
                self.state = CursorState::Exhausted;
                return Ok(None);
            }
            match self.direction {
                Direction::Forward => {
                    if self.at_claim_boundary() {
                        return Ok(None);
                    }
                    let page = self.store.pin(self.current_block as u64);
                    let n = leaf::nitems(page.memory()) as usize;
                    if self.current_idx >= n {
                        let next = leaf::right_link(page.memory());
                        drop(page);
                        if next == leaf::INVALID_BLOCK {
                            self.state = CursorState::Exhausted;
                            return Ok(None);
                        }
                        self.current_block = next;
                        self.current_idx = 0;
                        self.run_cache = None;
                        self.pages_scanned += 1;
                        self.issue_prefetch();
                        continue;
                    }
                    let (key, include) = self.fetch_entry(page.memory(), self.current_idx);
                    drop(page);
                    if !self.range.satisfies_upper(&key) {
                        self.state = CursorState::Exhausted;
                        return Ok(None);
                    }
                    self.current_idx += 1;
                    if !self.range.satisfies_lower(&key) {
                        continue;
                    }
                    return Ok(Some((key, include)));
                }
                Direction::Backward => {
                    if self.current_idx == usize::MAX {
                        let page = self.store.pin(self.current_block as u64);
                        let first_key = leaf::entry_at(&self.meta.schema, page.memory(), 0).0.to_vec();
                        drop(page);
                        match self.predecessor_leaf(&first_key) {
                            Some(pred) => {
                                let p = self.store.pin(pred as u64);
                                let pn = leaf::nitems(p.memory()) as usize;
                                drop(p);
                                self.current_block = pred;
                                self.current_idx = pn - 1;
                                self.run_cache = None;
                                self.pages_scanned += 1;
                                continue;
                            }
                            None => {
                                self.state = CursorState::Exhausted;
                                return Ok(None);
                            }
                        }
                    }
                    let page = self.store.pin(self.current_block as u64);
                    let (key, include) = self.fetch_entry(page.memory(), self.current_idx);
                    drop(page);
                    if !self.range.satisfies_lower(&key) {
                        self.state = CursorState::Exhausted;
                        return Ok(None);
                    }
                    if self.current_idx == 0 {
                        self.current_idx = usize::MAX;
                    } else {
                        self.current_idx -= 1;
                    }
                    if !self.range.satisfies_upper(&key) {
                        continue;
                    }
                    return Ok(Some((key, include)));
                }
            }
        }
    }
}

trait IsSomeAndTrue {
    fn is_some_and_true(&self) -> bool;
}

impl IsSomeAndTrue for Option<&Arc<AtomicBool>> {
    fn is_some_and_true(&self) -> bool {
        match self {
            Some(flag) => flag.load(Ordering::Acquire),
            None => false,
        }
    }
}
