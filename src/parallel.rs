//! Parallel scan coordination (spec §4.5).
//!
//! Leaf blocks are allocated contiguously by the builder (`build.rs` writes
//! every leaf before any internal level), so "claim a contiguous range of
//! leaf blocks" is just atomically advancing a counter over
//! `[first_leaf, last_leaf]` — no separate block-range index is needed.
//! `ParallelState` is the shared record `gate.rs`-style code in the pack
//! favors for lock-free coordination (`prataprc-rdms/src/gate.rs`'s
//! latch-and-spin `Gate`, generalized here to a monotonically advancing
//! claim cursor instead of a reader/writer latch): one `AtomicU32` for the
//! mutable `next_block`, plain fields for the write-once `last_block`/
//! `batch_size`, and an `AtomicBool` for `finished`.
//!
//! Each worker drives an ordinary `Cursor`, rebound to its claimed block
//! range via `Cursor::rebind_to_claim` instead of a fresh root descent —
//! this is the spec's "workers run the serial scan algorithm except they
//! claim ranges instead of following right-links past a boundary".

use crate::cursor::{Cursor, Direction, KeyRange};
use crate::error::Result;
use crate::page::meta::Meta;
use crate::pager::PageStore;
use crate::Config;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Shared coordination state for one parallel scan. `last_block` and
/// `batch_size` are write-once after construction/rescan (spec §5 "batch_size,
/// schema, and last_block are write-once").
pub struct ParallelState {
    next_block: AtomicU32,
    last_block: u32,
    batch_size: u32,
    finished: AtomicBool,
}

/// A claimed, inclusive-exclusive `[start, end)` block range, or `None` if
/// the scan is finished.
pub type Claim = Option<(u32, u32)>;

impl ParallelState {
    /// `first_block`/`last_block` are the index's `meta.first_leaf`/
    /// `meta.last_leaf`; an empty tree (`first_block` invalid) starts
    /// already finished.
    pub fn new(first_block: u32, last_block: u32, batch_size: u32) -> ParallelState {
        let finished = first_block == crate::page::meta::INVALID_BLOCK || batch_size == 0;
        ParallelState {
            next_block: AtomicU32::new(first_block),
            last_block,
            batch_size: batch_size.max(1),
            finished: AtomicBool::new(finished),
        }
    }

    /// Atomically reserves up to `batch_size` leaf blocks starting at the
    /// current `next_block`. Claiming past `last_block` sets `finished`
    /// (spec §4.5 "Claiming past last_block sets finished").
    pub fn claim(&self) -> Claim {
        if self.finished.load(Ordering::Acquire) {
            return None;
        }
        loop {
            let start = self.next_block.load(Ordering::Acquire);
            if start > self.last_block {
                self.finished.store(true, Ordering::Release);
                return None;
            }
            let end = start.saturating_add(self.batch_size).min(self.last_block + 1);
            match self.next_block.compare_exchange(
                start,
                end,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    tracing::trace!(start, end, "worker claimed block range");
                    return Some((start, end));
                }
                Err(_) => continue, // another worker raced us; retry with the new value
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Resets the claim cursor for a new range (spec §4.5 "Rescan").
    pub fn rescan(&self, first_block: u32, last_block: u32) {
        let finished = first_block == crate::page::meta::INVALID_BLOCK;
        self.next_block.store(first_block, Ordering::Release);
        self.finished.store(finished, Ordering::Release);
        debug_assert!(
            last_block == self.last_block || !finished,
            "ParallelState::last_block is write-once per scan generation"
        );
    }
}

/// One worker's view of a parallel scan. Holds its own `Cursor`, reclaiming
/// a fresh block range from `shared` whenever it runs off the end of its
/// current one. Workers never share a cursor (spec §9 "do not share cursors
/// between workers; share only the block-range claim state and a finished
/// flag").
pub struct ParallelWorker<'a> {
    shared: &'a ParallelState,
    cursor: Cursor<'a>,
    started: bool,
}

impl<'a> ParallelWorker<'a> {
    pub fn new(
        store: &'a PageStore,
        meta: &'a Meta,
        config: &'a Config,
        shared: &'a ParallelState,
        range: KeyRange,
        cancel: Option<Arc<AtomicBool>>,
    ) -> ParallelWorker<'a> {
        let mut cursor = Cursor::open(store, meta, config, range, Direction::Forward)
            .with_fixed_prefetch_depth(config.parallel_chunk_pages);
        if let Some(flag) = cancel {
            cursor = cursor.with_cancel_flag(flag);
        }
        ParallelWorker {
            shared,
            cursor,
            started: false,
        }
    }

    fn claim_next(&mut self) -> bool {
        match self.shared.claim() {
            Some((start, end)) => {
                self.cursor.rebind_to_claim(start, end);
                true
            }
            None => false,
        }
    }

    /// Returns the next row this worker produces, claiming fresh block
    /// ranges as it exhausts each one, or `None` once the shared state is
    /// finished or this worker's cursor hits a range-ending predicate
    /// (spec §4.5 "no per-worker leaf overlap").
    pub fn next(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        if !self.started {
            self.started = true;
            if !self.claim_next() {
                return Ok(None);
            }
        }
        loop {
            match self.cursor.next()? {
                Some(row) => return Ok(Some(row)),
                None => {
                    if self.cursor.state() == crate::cursor::CursorState::Exhausted {
                        // Predicate ended the scan entirely; stop claiming more.
                        return Ok(None);
                    }
                    if !self.claim_next() {
                        return Ok(None);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{build, InputRow};
    use crate::config::TestConfig;
    use crate::include::IncludeVal;
    use crate::key::KeyVal;
    use crate::schema::{IncludeType, KeyType, Schema};
    use std::collections::HashMap;
    use tempfile::tempfile;

    fn built(n: i32, max_tuples_per_page: u32) -> (PageStore, Meta) {
        let schema = Schema::new(vec![KeyType::Int32], vec![IncludeType::Int64]).unwrap();
        let file = tempfile().unwrap();
        let store = PageStore::create(&file, 4096, 8192).unwrap();
        let mut config = Config::default();
        config.test = TestConfig {
            max_tuples_per_page,
            ..TestConfig::default()
        };
        let rows: Vec<InputRow> = (0..n)
            .map(|k| InputRow {
                key: vec![Some(KeyVal::I32(k))],
                include: vec![Some(IncludeVal::I64(k as i64))],
            })
            .collect();
        let summary = build(&store, schema, &config, rows).unwrap();
        (store, summary.meta)
    }

    #[test]
    fn claims_are_disjoint_and_cover_the_whole_range() {
        let shared = ParallelState::new(3, 20, 4);
        let mut seen = Vec::new();
        while let Some((start, end)) = shared.claim() {
            seen.push((start, end));
        }
        assert!(shared.is_finished());
        let mut covered = HashMap::new();
        for (start, end) in &seen {
            for b in *start..*end {
                assert!(covered.insert(b, ()).is_none(), "block {} claimed twice", b);
            }
        }
        for b in 3..=20 {
            assert!(covered.contains_key(&b), "block {} never claimed", b);
        }
    }

    #[test]
    fn union_of_worker_outputs_matches_serial_scan() {
        let (store, meta) = built(2000, 7);
        let config = Config::default();

        let mut serial = Cursor::open(&store, &meta, &config, KeyRange::unbounded(), Direction::Forward);
        let mut serial_keys = Vec::new();
        while let Some((k, _)) = serial.next().unwrap() {
            serial_keys.push(k);
        }

        let shared = ParallelState::new(meta.first_leaf, meta.last_leaf, 3);
        let mut workers: Vec<_> = (0..4)
            .map(|_| ParallelWorker::new(&store, &meta, &config, &shared, KeyRange::unbounded(), None))
            .collect();
        let mut parallel_keys = Vec::new();
        'outer: loop {
            let mut any = false;
            for w in workers.iter_mut() {
                if let Some((k, _)) = w.next().unwrap() {
                    parallel_keys.push(k);
                    any = true;
                }
            }
            if !any {
                break 'outer;
            }
        }

        serial_keys.sort();
        parallel_keys.sort();
        assert_eq!(serial_keys, parallel_keys);
    }

    #[test]
    fn single_worker_matches_serial_when_batch_covers_everything() {
        let (store, meta) = built(500, 5);
        let config = Config::default();
        let shared = ParallelState::new(meta.first_leaf, meta.last_leaf, 1000);
        let mut worker = ParallelWorker::new(&store, &meta, &config, &shared, KeyRange::unbounded(), None);
        let mut count = 0;
        while worker.next().unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 500);
    }
}
