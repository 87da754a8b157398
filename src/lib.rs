//! Read-only, space-optimized ordered B-tree index over fixed-width (and
//! short bounded text) keys.
//!
//! This crate is the index engine described in the module list below; the
//! host planner, catalog, executor glue, buffer manager, and WAL are
//! deliberately out of scope and are represented here only by the minimal
//! stand-ins (`pager::PageStore`, `sortrun::RunSorter`) needed to build and
//! scan an index end-to-end in this repo's own tests.

mod build;
mod config;
mod cost;
mod cursor;
mod error;
mod include;
mod key;
mod page;
mod pager;
mod parallel;
mod prefetch;
mod schema;
mod scan2;
mod sortrun;

pub use build::{build as build_raw, BuildSummary, InputRow};
pub use config::{Config, ForceFormat, TestConfig};
pub use cost::{estimate, Estimate};
pub use cursor::{Bound, Cursor, CursorState, Direction, KeyRange};
pub use error::{Error, Result};
pub use include::IncludeVal;
pub use key::KeyVal;
pub use page::meta::Meta;
pub use pager::PageStore;
pub use parallel::{ParallelState, ParallelWorker};
pub use schema::{IncludeType, KeyType, Schema};
pub use scan2::{
    Direction as TwoColumnDirection, SecondColumnPredicate, TwoColumnCursor, TwoColumnRange,
};

use page::DB_METADATA_PAGE;
use std::fs::File;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// A fully built, opened index: a pinned page store plus its decoded meta
/// page (spec §6 "open(index) -> Handle"). All scan/estimate entry points
/// hang off this.
pub struct Handle {
    store: PageStore,
    meta: Meta,
    config: Config,
}

impl Handle {
    /// Builds a new index into `file` and opens it for scanning in one step
    /// (spec §6 "build(input, schema, memory_budget, worker_count) -> Index"
    /// followed by "open(index) -> Handle"). The build pipeline always runs
    /// serially (`build.rs`'s own doc comment explains why parallel *build*
    /// is out of scope here); `worker_count` has no effect on building and
    /// only matters later, at scan time, via [`Handle::scan_parallel`].
    ///
    /// `rows` must report an accurate `len()`: it sizes the page-store
    /// reservation before the first page is written.
    pub fn build<I>(file: &File, schema: Schema, config: Config, rows: I) -> Result<Handle>
    where
        I: ExactSizeIterator<Item = InputRow>,
    {
        let capacity_pages = (rows.len() as u64).saturating_mul(2).max(16) + 16;
        let store = PageStore::create(file, config.page_size, capacity_pages)?;
        let summary = build::build(&store, schema, &config, rows)?;
        Ok(Handle {
            store,
            meta: summary.meta,
            config,
        })
    }

    /// Re-opens an index file a previous `Handle::build` call wrote and
    /// flushed (spec §6 "open(index) -> Handle").
    pub fn open(file: &File, config: Config) -> Result<Handle> {
        config.validate()?;
        let num_pages = file.metadata()?.len() / config.page_size as u64;
        let store = PageStore::open(file, config.page_size, num_pages)?;
        let meta_page = store.pin(DB_METADATA_PAGE);
        let meta = Meta::decode(meta_page.memory())?;
        drop(meta_page);
        Ok(Handle { store, meta, config })
    }

    pub fn schema(&self) -> &Schema {
        &self.meta.schema
    }

    pub fn row_count(&self) -> u64 {
        self.meta.row_count
    }

    /// Opens a single-column forward/backward scan (spec §6
    /// "scan(handle, key_range, direction, parallel_state?) -> Cursor").
    /// Use [`Handle::scan_parallel`] for the `parallel_state` case.
    pub fn scan(&self, range: KeyRange, direction: Direction) -> Cursor<'_> {
        Cursor::open(&self.store, &self.meta, &self.config, range, direction)
    }

    /// Opens a two-column scan (spec §4.4). Only valid when the schema has
    /// two key columns; panics otherwise, same as `TwoColumnCursor::open`.
    pub fn scan_two_column(&self, range: TwoColumnRange, direction: TwoColumnDirection) -> TwoColumnCursor<'_> {
        TwoColumnCursor::open(&self.store, &self.meta, range, direction)
    }

    /// Creates the shared coordination state for a parallel scan (spec
    /// §4.5). Callers then build one [`ParallelWorker`] per thread via
    /// [`Handle::parallel_worker`], all borrowing this same state — typically
    /// one worker per OS thread; per spec's "if spawn fails, silently fall
    /// back to serial" note, a caller unable to spawn threads can just drive
    /// a single worker in-line instead.
    pub fn scan_parallel(&self) -> ParallelState {
        let batch_size = self.config.parallel_chunk_pages as u32;
        ParallelState::new(self.meta.first_leaf, self.meta.last_leaf, batch_size)
    }

    /// Builds one worker against a previously created [`ParallelState`].
    pub fn parallel_worker<'a>(
        &'a self,
        shared: &'a ParallelState,
        range: KeyRange,
        cancel: Option<Arc<AtomicBool>>,
    ) -> ParallelWorker<'a> {
        ParallelWorker::new(&self.store, &self.meta, &self.config, shared, range, cancel)
    }

    /// Estimates `(startup_cost, total_cost, rows)` for a single-column scan
    /// over `range` (spec §6 "estimate(handle, key_range, workers) ->
    /// (startup, total, rows)").
    pub fn estimate(&self, range: &KeyRange, workers: u16) -> Estimate {
        estimate(&self.meta, range, workers)
    }

    pub fn flush(&self) -> Result<()> {
        self.store.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use tempfile::tempfile;

    fn schema() -> Schema {
        Schema::new(vec![KeyType::Int32], vec![IncludeType::Int64]).unwrap()
    }

    fn rows(n: i32) -> Vec<InputRow> {
        (0..n)
            .map(|k| InputRow {
                key: vec![Some(KeyVal::I32(k))],
                include: vec![Some(IncludeVal::I64(k as i64))],
            })
            .collect()
    }

    #[test]
    fn build_then_reopen_round_trips_rows() {
        let file = tempfile().unwrap();
        let config = Config::default();
        let handle = Handle::build(&file, schema(), config, rows(500).into_iter()).unwrap();
        handle.flush().unwrap();
        drop(handle);

        let reopened = Handle::open(&file, config).unwrap();
        assert_eq!(reopened.row_count(), 500);
        let mut cur = reopened.scan(KeyRange::unbounded(), Direction::Forward);
        let mut count = 0;
        while cur.next().unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 500);
    }

    #[test]
    fn estimate_reflects_built_row_count() {
        let file = tempfile().unwrap();
        let config = Config::default();
        let handle = Handle::build(&file, schema(), config, rows(1000).into_iter()).unwrap();
        let est = handle.estimate(&KeyRange::unbounded(), 1);
        assert_eq!(est.rows, 1000.0);
    }

    #[test]
    fn parallel_workers_cover_the_whole_index() {
        let file = tempfile().unwrap();
        let mut config = Config::default();
        config.test.max_tuples_per_page = 7;
        let handle = Handle::build(&file, schema(), config, rows(3000).into_iter()).unwrap();

        let cancel: Option<Arc<AtomicBool>> = None;
        let shared = handle.scan_parallel();
        let mut workers: Vec<_> = (0..4)
            .map(|_| handle.parallel_worker(&shared, KeyRange::unbounded(), cancel.clone()))
            .collect();

        let mut total = 0;
        loop {
            let mut any = false;
            for w in workers.iter_mut() {
                if w.next().unwrap().is_some() {
                    total += 1;
                    any = true;
                }
            }
            if !any {
                break;
            }
        }
        assert_eq!(total, 3000);
    }
}
