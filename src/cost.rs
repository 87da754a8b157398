//! Cost & selectivity model (spec §4.6), consumed by a host planner.
//!
//! Mirrors the shape of a classic index-scan costing function: a fixed
//! startup term for walking internal pages down to the first leaf, plus a
//! per-page and per-row term for the leaf range actually touched. Selectivity
//! only gets exact when the first key column is a fixed-width integer and
//! the directory can bound `pages_in_range`; every other case falls back to
//! `rows × default_selectivity`, same as the teacher's own `Table::len`-based
//! planner stand-ins fall back to a flat estimate when no index stats apply.

use crate::cursor::{Bound, KeyRange};
use crate::page::meta::Meta;

/// Cost of one page fetch, in the same abstract unit as `cpu_cost` (caller
/// picks the scale; only their ratio matters to a planner comparing plans).
pub const DEFAULT_PAGE_COST: f64 = 1.0;
/// Cost of evaluating/materializing one row once its page is resident.
pub const DEFAULT_CPU_COST: f64 = 0.01;
/// Selectivity assumed for a predicate this estimator cannot bound exactly
/// (non-integer first column, or no lower/upper bound at all).
pub const DEFAULT_SELECTIVITY: f64 = 1.0 / 3.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub startup_cost: f64,
    pub total_cost: f64,
    pub rows: f64,
}

/// Counts directory entries whose leaf range could overlap `range`, used as
/// a stand-in for `pages_in_range` when the first key column is a
/// fixed-width integer. Conservative: a leaf is counted unless it provably
/// lies entirely outside the bounds.
fn pages_in_range(meta: &Meta, range: &KeyRange) -> Option<u64> {
    if !meta.schema.keys[0].is_fixed_width_integer() || meta.directory.is_empty() {
        return None;
    }
    let below = |b: &Bound, last_key: &[u8]| {
        if b.inclusive {
            last_key < b.value.as_slice()
        } else {
            last_key <= b.value.as_slice()
        }
    };
    let above = |b: &Bound, first_key: &[u8]| {
        if b.inclusive {
            first_key > b.value.as_slice()
        } else {
            first_key >= b.value.as_slice()
        }
    };
    let count = meta
        .directory
        .iter()
        .filter(|d| {
            let excluded_by_lower = range.lower.as_ref().is_some_and(|b| below(b, &d.last_key));
            let excluded_by_upper = range.upper.as_ref().is_some_and(|b| above(b, &d.first_key));
            !excluded_by_lower && !excluded_by_upper
        })
        .count();
    Some(count as u64)
}

/// Estimates `(startup_cost, total_cost, rows)` for a single-column scan
/// over `range`, optionally split across `parallel_workers` (>= 1 means
/// serial; this only affects `total_cost`, since startup is paid once per
/// worker and workers run concurrently).
pub fn estimate(meta: &Meta, range: &KeyRange, parallel_workers: u16) -> Estimate {
    let startup_cost = if meta.height == 0 {
        0.0
    } else {
        meta.height as f64 * DEFAULT_PAGE_COST
    };

    let total_rows = meta.row_count as f64;
    let (pages, rows) = match pages_in_range(meta, range) {
        Some(pages) if !meta.directory.is_empty() => {
            let fraction = pages as f64 / meta.directory.len() as f64;
            (pages as f64, total_rows * fraction)
        }
        _ => {
            let rows = total_rows * DEFAULT_SELECTIVITY;
            let pages = meta.directory.len().max(1) as f64 * DEFAULT_SELECTIVITY;
            (pages, rows)
        }
    };

    let workers = parallel_workers.max(1) as f64;
    let total_cost = startup_cost + (pages * DEFAULT_PAGE_COST + rows * DEFAULT_CPU_COST) / workers;

    Estimate {
        startup_cost,
        total_cost,
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{build, InputRow};
    use crate::config::{Config, TestConfig};
    use crate::include::IncludeVal;
    use crate::key::KeyVal;
    use crate::pager::PageStore;
    use crate::schema::{IncludeType, KeyType, Schema};
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

    fn key(n: i32) -> Vec<u8> {
        let mut out = Vec::new();
        KeyVal::I32(n).encode(KeyType::Int32, &mut out).unwrap();
        out
    }

    #[test]
    fn unbounded_scan_estimates_every_row() {
        let (_store, meta) = built(1000, 10);
        let est = estimate(&meta, &KeyRange::unbounded(), 1);
        assert_eq!(est.rows, 1000.0);
        assert!(est.total_cost > 0.0);
    }

    #[test]
    fn narrow_range_estimates_fewer_rows_than_unbounded() {
        let (_store, meta) = built(1000, 10);
        let narrow = KeyRange {
            lower: Some(Bound { value: key(100), inclusive: true }),
            upper: Some(Bound { value: key(110), inclusive: false }),
        };
        let wide = KeyRange::unbounded();
        let narrow_est = estimate(&meta, &narrow, 1);
        let wide_est = estimate(&meta, &wide, 1);
        assert!(narrow_est.rows < wide_est.rows);
    }

    #[test]
    fn more_workers_never_increase_total_cost() {
        let (_store, meta) = built(2000, 6);
        let serial = estimate(&meta, &KeyRange::unbounded(), 1);
        let parallel = estimate(&meta, &KeyRange::unbounded(), 4);
        assert!(parallel.total_cost <= serial.total_cost);
        assert_eq!(parallel.startup_cost, serial.startup_cost);
    }

    #[test]
    fn empty_index_estimates_zero_rows() {
        let (_store, meta) = built(0, 10);
        let est = estimate(&meta, &KeyRange::unbounded(), 1);
        assert_eq!(est.rows, 0.0);
        assert_eq!(est.startup_cost, 0.0);
    }
}
