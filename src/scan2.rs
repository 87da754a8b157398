//! Two-column scan engine (spec §4.4 "Scan Engine — Two Column").
//!
//! Two-column schemas are always plain leaves (spec §4.4 "two-column
//! layouts are always plain"), so there is no run cache to maintain here —
//! the extra machinery over the single-column `Cursor` is entirely about
//! splitting the composite key into its two columns and applying the
//! second column as a per-row filter rather than a tree-descent bound.
//!
//! The first-column predicate still bounds which leaves get visited, the
//! same way `Cursor` uses its single key range: descend/locate using the
//! first column's encoded bytes as a (possibly padded) probe key, then let
//! the per-row check apply the exact inclusive/exclusive semantics. Padding
//! the probe with `0x00` (lower) or `0xff` (upper) bytes for the second
//! column's width makes that probe an exact stand-in for "any second-column
//! value", since the order-preserving encoding in `key.rs` uses the full
//! `0x00..=0xff` range for every byte position.

use crate::cursor::{descend_for_leaf, Bound};
use crate::error::Result;
use crate::page::leaf;
use crate::page::meta::{self as page_meta, Meta};
use crate::pager::PageStore;
use crate::schema::Schema;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// The second column's predicate: an optional runtime-key equality
/// (checked on every row, no skipping across leaves per spec §4.4) and/or
/// an inequality range (a per-row filter only).
#[derive(Debug, Clone, Default)]
pub struct SecondColumnPredicate {
    pub eq: Option<Vec<u8>>,
    pub lower: Option<Bound>,
    pub upper: Option<Bound>,
}

impl SecondColumnPredicate {
    pub fn equals(value: Vec<u8>) -> SecondColumnPredicate {
        SecondColumnPredicate {
            eq: Some(value),
            ..Default::default()
        }
    }

    fn satisfies(&self, col2: &[u8]) -> bool {
        if let Some(eq) = &self.eq {
            if col2 != eq.as_slice() {
                return false;
            }
        }
        if let Some(b) = &self.lower {
            let ok = if b.inclusive { col2 >= b.value.as_slice() } else { col2 > b.value.as_slice() };
            if !ok {
                return false;
            }
        }
        if let Some(b) = &self.upper {
            let ok = if b.inclusive { col2 <= b.value.as_slice() } else { col2 < b.value.as_slice() };
            if !ok {
                return false;
            }
        }
        true
    }
}

/// A range over the first key column plus a predicate on the second.
#[derive(Debug, Clone, Default)]
pub struct TwoColumnRange {
    pub col1_lower: Option<Bound>,
    pub col1_upper: Option<Bound>,
    pub col2: SecondColumnPredicate,
}

impl TwoColumnRange {
    fn col1_satisfies_lower(&self, col1: &[u8]) -> bool {
        match &self.col1_lower {
            None => true,
            Some(b) if b.inclusive => col1 >= b.value.as_slice(),
            Some(b) => col1 > b.value.as_slice(),
        }
    }

    fn col1_satisfies_upper(&self, col1: &[u8]) -> bool {
        match &self.col1_upper {
            None => true,
            Some(b) if b.inclusive => col1 <= b.value.as_slice(),
            Some(b) => col1 < b.value.as_slice(),
        }
    }
}

/// Pads a column-1 probe key out to the full composite-key width, so it can
/// be fed into the single-column descent/locate helpers that compare full
/// encoded keys. `fill` is `0x00` for a lower-bound probe, `0xff` for an
/// upper-bound probe (see module docs).
fn padded_probe(schema: &Schema, col1_value: &[u8], fill: u8) -> Vec<u8> {
    let kw2 = schema.keys[1].width();
    let mut out = col1_value.to_vec();
    out.resize(out.len() + kw2, fill);
    out
}

pub struct TwoColumnCursor<'a> {
    store: &'a PageStore,
    meta: &'a Meta,
    range: TwoColumnRange,
    direction: Direction,
    current_block: u32,
    current_idx: usize,
    exhausted: bool,
    started: bool,
}

impl<'a> TwoColumnCursor<'a> {
    pub fn open(store: &'a PageStore, meta: &'a Meta, range: TwoColumnRange, direction: Direction) -> TwoColumnCursor<'a> {
        assert!(meta.schema.is_two_column(), "TwoColumnCursor requires a two-column schema");
        TwoColumnCursor {
            store,
            meta,
            range,
            direction,
            current_block: page_meta::INVALID_BLOCK,
            current_idx: 0,
            exhausted: meta.is_empty_tree(),
            started: false,
        }
    }

    fn kw1(&self) -> usize {
        self.meta.schema.keys[0].width()
    }

    fn split<'k>(&self, key: &'k [u8]) -> (&'k [u8], &'k [u8]) {
        key.split_at(self.kw1())
    }

    fn position(&mut self) {
        match self.direction {
            Direction::Forward => self.position_forward(),
            Direction::Backward => self.position_backward(),
        }
        self.started = true;
    }

    fn position_forward(&mut self) {
        let start_block = match &self.range.col1_lower {
            Some(b) => {
                let probe = padded_probe(&self.meta.schema, &b.value, 0x00);
                descend_for_leaf(self.store, self.meta.root_block, self.meta.height, &probe, false)
                    .unwrap_or(self.meta.first_leaf)
            }
            None => self.meta.first_leaf,
        };
        let mut block = start_block;
        loop {
            let page = self.store.pin(block as u64);
            let n = leaf::nitems(page.memory()) as usize;
            let idx = match &self.range.col1_lower {
                Some(b) => {
                    let probe = padded_probe(&self.meta.schema, &b.value, 0x00);
                    leaf::locate_ge(&self.meta.schema, page.memory(), &probe)
                }
                None => 0,
            };
            if idx < n {
                self.current_block = block;
                self.current_idx = idx;
                return;
            }
            let next = leaf::right_link(page.memory());
            drop(page);
            if next == leaf::INVALID_BLOCK {
                self.exhausted = true;
                return;
            }
            block = next;
        }
    }

    fn position_backward(&mut self) {
        let start_block = match &self.range.col1_upper {
            Some(b) => {
                let probe = padded_probe(&self.meta.schema, &b.value, 0xff);
                descend_for_leaf(self.store, self.meta.root_block, self.meta.height, &probe, false)
                    .unwrap_or(self.meta.last_leaf)
            }
            None => self.meta.last_leaf,
        };
        self.position_backward_in(start_block);
    }

    fn position_backward_in(&mut self, mut block: u32) {
        loop {
            let page = self.store.pin(block as u64);
            let n = leaf::nitems(page.memory()) as usize;
            let idx = match &self.range.col1_upper {
                Some(b) => {
                    let probe = padded_probe(&self.meta.schema, &b.value, 0xff);
                    let ge = leaf::locate_ge(&self.meta.schema, page.memory(), &probe);
                    if ge == 0 { None } else { Some(ge - 1) }
                }
                None if n > 0 => Some(n - 1),
                None => None,
            };
            match idx {
                Some(i) => {
                    self.current_block = block;
                    self.current_idx = i;
                    return;
                }
                None => {
                    let first_key = leaf::entry_at(&self.meta.schema, page.memory(), 0).0.to_vec();
                    drop(page);
                    match descend_for_leaf(self.store, self.meta.root_block, self.meta.height, &first_key, true) {
                        Some(pred) => block = pred,
                        None => {
                            self.exhausted = true;
                            return;
                        }
                    }
                }
            }
        }
    }

    pub fn next(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        if self.exhausted {
            return Ok(None);
        }
        if !self.started {
            self.position();
            if self.exhausted {
                return Ok(None);
            }
        }
        loop {
            match self.direction {
                Direction::Forward => {
                    let page = self.store.pin(self.current_block as u64);
                    let n = leaf::nitems(page.memory()) as usize;
                    if self.current_idx >= n {
                        let next = leaf::right_link(page.memory());
                        drop(page);
                        if next == leaf::INVALID_BLOCK {
                            self.exhausted = true;
                            return Ok(None);
                        }
                        self.current_block = next;
                        self.current_idx = 0;
                        continue;
                    }
                    let (key, include) = leaf::entry_at(&self.meta.schema, page.memory(), self.current_idx);
                    let (col1, col2) = self.split(key);
                    if !self.range.col1_satisfies_upper(col1) {
                        self.exhausted = true;
                        return Ok(None);
                    }
                    let col1_ok = self.range.col1_satisfies_lower(col1);
                    let col2_ok = self.range.col2.satisfies(col2);
                    let row = (key.to_vec(), include.to_vec());
                    drop(page);
                    self.current_idx += 1;
                    if col1_ok && col2_ok {
                        return Ok(Some(row));
                    }
                }
                Direction::Backward => {
                    if self.current_idx == usize::MAX {
                        let page = self.store.pin(self.current_block as u64);
                        let first_key = leaf::entry_at(&self.meta.schema, page.memory(), 0).0.to_vec();
                        drop(page);
                        match descend_for_leaf(self.store, self.meta.root_block, self.meta.height, &first_key, true) {
                            Some(pred) => {
                                let p = self.store.pin(pred as u64);
                                let pn = leaf::nitems(p.memory()) as usize;
                                drop(p);
                                self.current_block = pred;
                                self.current_idx = pn - 1;
                                continue;
                            }
                            None => {
                                self.exhausted = true;
                                return Ok(None);
                            }
                        }
                    }
                    let page = self.store.pin(self.current_block as u64);
                    let (key, include) = leaf::entry_at(&self.meta.schema, page.memory(), self.current_idx);
                    let (col1, col2) = self.split(key);
                    if !self.range.col1_satisfies_lower(col1) {
                        self.exhausted = true;
                        return Ok(None);
                    }
                    let col1_ok = self.range.col1_satisfies_upper(col1);
                    let col2_ok = self.range.col2.satisfies(col2);
                    let row = (key.to_vec(), include.to_vec());
                    drop(page);
                    if self.current_idx == 0 {
                        self.current_idx = usize::MAX;
                    } else {
                        self.current_idx -= 1;
                    }
                    if col1_ok && col2_ok {
                        return Ok(Some(row));
                    }
                }
            }
        }
    }
}
