//! Leaf page codec (spec §4.1, §6 "Leaf page").
//!
//! Three formats share one 6-byte footer (`right_link`, `reserved`) and a
//! 4-byte header (`tag`, `nitems`); only the body between them differs. The
//! accessor/builder split here follows the teacher's `LeafAccessor`/
//! `LeafBuilder` pair (`weids-dev-radarbase/src/binarytree.rs`): a thin
//! read-only view over borrowed page bytes, and a separate writer that
//! assumes the caller sized the buffer correctly.

use crate::config::ForceFormat;
use crate::error::{Error, Result};
use crate::key::compare_encoded;
use crate::schema::Schema;

pub const TAG_PLAIN: u16 = 0x8000;
pub const TAG_KEY_RLE: u16 = 0x8001;
pub const TAG_INCLUDE_RLE: u16 = 0x8003;

pub const HEADER_LEN: usize = 4;
pub const FOOTER_LEN: usize = 6;
pub const INVALID_BLOCK: u32 = u32::MAX;

/// Cap below the 16-bit maximum (65 535), preserved intentionally per spec §9.
pub const MAX_RUN_COUNT: u32 = 32_000;

/// One logical row, as produced by the builder's sort/iteration stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafEntry {
    pub key: Vec<u8>,
    pub include: Vec<u8>,
}

fn key_runs(rows: &[LeafEntry]) -> Vec<(&[u8], u32)> {
    let mut runs: Vec<(&[u8], u32)> = Vec::new();
    for row in rows {
        if let Some(last) = runs.last_mut() {
            if last.0 == row.key.as_slice() && last.1 < MAX_RUN_COUNT {
                last.1 += 1;
                continue;
            }
        }
        runs.push((row.key.as_slice(), 1));
    }
    runs
}

fn joint_runs(rows: &[LeafEntry]) -> Vec<(&[u8], &[u8], u32)> {
    let mut runs: Vec<(&[u8], &[u8], u32)> = Vec::new();
    for row in rows {
        if let Some(last) = runs.last_mut() {
            if last.0 == row.key.as_slice()
                && last.1 == row.include.as_slice()
                && last.2 < MAX_RUN_COUNT
            {
                last.2 += 1;
                continue;
            }
        }
        runs.push((row.key.as_slice(), row.include.as_slice(), 1));
    }
    runs
}

/// `(size_plain, size_key_rle, size_inc_rle)`, each the body length in bytes
/// (not counting the shared 4-byte header / 6-byte footer).
pub fn candidate_body_sizes(schema: &Schema, rows: &[LeafEntry]) -> (usize, usize, usize) {
    let kw = schema.key_width();
    let iw = schema.include_width();
    let nitems = rows.len();

    let size_plain = nitems * (kw + iw);

    let nruns_key = key_runs(rows).len();
    let size_key_rle = 2 + nruns_key * (kw + 2) + nitems * iw;

    let nruns_inc = joint_runs(rows).len();
    let size_inc_rle = 2 + nruns_inc * (kw + 2 + iw);

    (size_plain, size_key_rle, size_inc_rle)
}

/// Selects the smallest-encoding format; ties favor plain, then key-RLE,
/// then include-RLE (spec §4.1 "Format selection rule"). Two-column
/// schemas are always plain regardless of `force` (spec §4.4 "two-column
/// layouts are always plain (no RLE)") — RLE's run-compression only pays
/// off when whole composite-key duplicates are common, which the engine
/// does not attempt to detect for the two-column case.
pub fn select_format(schema: &Schema, rows: &[LeafEntry], force: ForceFormat) -> u16 {
    if schema.is_two_column() {
        return TAG_PLAIN;
    }
    match force {
        ForceFormat::Plain => return TAG_PLAIN,
        ForceFormat::KeyRle => return TAG_KEY_RLE,
        ForceFormat::IncludeRle => return TAG_INCLUDE_RLE,
        ForceFormat::Auto => {}
    }
    let (plain, key_rle, inc_rle) = candidate_body_sizes(schema, rows);
    let min = plain.min(key_rle).min(inc_rle);
    if plain == min {
        TAG_PLAIN
    } else if key_rle == min {
        TAG_KEY_RLE
    } else {
        TAG_INCLUDE_RLE
    }
}

pub fn body_len_for(schema: &Schema, rows: &[LeafEntry], tag: u16) -> usize {
    let (plain, key_rle, inc_rle) = candidate_body_sizes(schema, rows);
    match tag {
        TAG_PLAIN => plain,
        TAG_KEY_RLE => key_rle,
        TAG_INCLUDE_RLE => inc_rle,
        _ => unreachable!("unknown leaf tag"),
    }
}

/// Writes a fully-sealed leaf page into `buf`, which must be exactly
/// `page_size` bytes. Returns an error if the rows do not fit even under
/// the chosen `tag` (spec's `ResourceExceeded`: a single leaf that can't be
/// emitted under the caller's memory/page budget).
pub fn write_leaf(
    buf: &mut [u8],
    schema: &Schema,
    rows: &[LeafEntry],
    tag: u16,
    right_link: u32,
) -> Result<()> {
    let page_size = buf.len();
    let body_len = body_len_for(schema, rows, tag);
    if HEADER_LEN + body_len + FOOTER_LEN > page_size {
        return Err(Error::ResourceExceeded(format!(
            "leaf body of {} bytes does not fit in a {}-byte page",
            body_len, page_size
        )));
    }
    if rows.len() > u16::MAX as usize {
        return Err(Error::ResourceExceeded(
            "leaf holds more than 65535 entries".into(),
        ));
    }

    buf[0..2].copy_from_slice(&tag.to_be_bytes());
    buf[2..4].copy_from_slice(&(rows.len() as u16).to_be_bytes());

    let body = &mut buf[HEADER_LEN..HEADER_LEN + body_len];
    let kw = schema.key_width();
    let iw = schema.include_width();
    match tag {
        TAG_PLAIN => {
            let row_width = kw + iw;
            for (i, row) in rows.iter().enumerate() {
                let off = i * row_width;
                body[off..off + kw].copy_from_slice(&row.key);
                body[off + kw..off + row_width].copy_from_slice(&row.include);
            }
        }
        TAG_KEY_RLE => {
            let runs = key_runs(rows);
            body[0..2].copy_from_slice(&(runs.len() as u16).to_be_bytes());
            let mut off = 2;
            for (key, count) in &runs {
                body[off..off + kw].copy_from_slice(key);
                off += kw;
                body[off..off + 2].copy_from_slice(&(*count as u16).to_be_bytes());
                off += 2;
            }
            // includes, row-major, in original entry order
            for row in rows {
                body[off..off + iw].copy_from_slice(&row.include);
                off += iw;
            }
        }
        TAG_INCLUDE_RLE => {
            let runs = joint_runs(rows);
            body[0..2].copy_from_slice(&(runs.len() as u16).to_be_bytes());
            let mut off = 2;
            for (key, include, count) in &runs {
                body[off..off + kw].copy_from_slice(key);
                off += kw;
                body[off..off + 2].copy_from_slice(&(*count as u16).to_be_bytes());
                off += 2;
                body[off..off + iw].copy_from_slice(include);
                off += iw;
            }
        }
        _ => unreachable!("unknown leaf tag"),
    }

    let footer_off = page_size - FOOTER_LEN;
    buf[footer_off..footer_off + 4].copy_from_slice(&right_link.to_be_bytes());
    buf[footer_off + 4..footer_off + 6].copy_from_slice(&0u16.to_be_bytes());
    Ok(())
}

pub fn tag_of(page: &[u8]) -> u16 {
    u16::from_be_bytes([page[0], page[1]])
}

pub fn nitems(page: &[u8]) -> u16 {
    u16::from_be_bytes([page[2], page[3]])
}

pub fn is_plain(page: &[u8]) -> bool {
    tag_of(page) == TAG_PLAIN
}

pub fn right_link(page: &[u8]) -> u32 {
    let off = page.len() - FOOTER_LEN;
    u32::from_be_bytes(page[off..off + 4].try_into().unwrap())
}

fn check_tag(tag: u16, page_block: u64) -> Result<()> {
    match tag {
        TAG_PLAIN | TAG_KEY_RLE | TAG_INCLUDE_RLE => Ok(()),
        other => Err(Error::CorruptPage {
            block: page_block,
            reason: format!("unrecognized leaf tag 0x{:04x}", other),
        }),
    }
}

/// Validates structural invariants: nitems within the page, run counts sum
/// to nitems, and each run count fits the cap (spec §8 invariant checks,
/// CorruptPage per §7).
pub fn validate(schema: &Schema, page: &[u8], block: u64) -> Result<()> {
    let tag = tag_of(page);
    check_tag(tag, block)?;
    let n = nitems(page) as usize;
    let kw = schema.key_width();
    let iw = schema.include_width();
    let body = &page[HEADER_LEN..page.len() - FOOTER_LEN];
    match tag {
        TAG_PLAIN => {
            if n * (kw + iw) > body.len() {
                return Err(Error::CorruptPage {
                    block,
                    reason: "plain leaf nitems overflows page".into(),
                });
            }
        }
        TAG_KEY_RLE | TAG_INCLUDE_RLE => {
            if body.len() < 2 {
                return Err(Error::CorruptPage {
                    block,
                    reason: "truncated RLE leaf header".into(),
                });
            }
            let nruns = u16::from_be_bytes([body[0], body[1]]) as usize;
            let run_width = if tag == TAG_KEY_RLE { kw + 2 } else { kw + 2 + iw };
            let runs_end = 2 + nruns * run_width;
            if runs_end > body.len() {
                return Err(Error::CorruptPage {
                    block,
                    reason: "RLE run table overflows page".into(),
                });
            }
            let mut total = 0u32;
            let mut off = 2;
            for _ in 0..nruns {
                let count_off = off + kw;
                let count = u16::from_be_bytes([body[count_off], body[count_off + 1]]) as u32;
                if count == 0 || count > MAX_RUN_COUNT {
                    return Err(Error::CorruptPage {
                        block,
                        reason: format!("run count {} outside (0, {}]", count, MAX_RUN_COUNT),
                    });
                }
                total += count;
                off += run_width;
            }
            if total as usize != n {
                return Err(Error::CorruptPage {
                    block,
                    reason: format!("run counts sum to {} but nitems is {}", total, n),
                });
            }
            if tag == TAG_KEY_RLE {
                let includes_end = runs_end + n * iw;
                if includes_end > body.len() {
                    return Err(Error::CorruptPage {
                        block,
                        reason: "key-RLE include region overflows page".into(),
                    });
                }
            }
        }
        _ => unreachable!(),
    }
    Ok(())
}

/// `(start, end)` logical entry indices `[start, end)` for each run, plus
/// that run's key and, when it exists, its shared include payload
/// (include-RLE only — key-RLE runs do not share includes across rows).
struct RunTable<'a> {
    bounds: Vec<(usize, usize)>,
    key: Vec<&'a [u8]>,
    include: Vec<Option<&'a [u8]>>,
}

fn run_table<'a>(schema: &Schema, page: &'a [u8]) -> RunTable<'a> {
    let tag = tag_of(page);
    let kw = schema.key_width();
    let iw = schema.include_width();
    let body = &page[HEADER_LEN..page.len() - FOOTER_LEN];
    let nruns = u16::from_be_bytes([body[0], body[1]]) as usize;
    let run_width = if tag == TAG_KEY_RLE { kw + 2 } else { kw + 2 + iw };
    let mut bounds = Vec::with_capacity(nruns);
    let mut key = Vec::with_capacity(nruns);
    let mut include = Vec::with_capacity(nruns);
    let mut off = 2;
    let mut cursor = 0usize;
    for _ in 0..nruns {
        let k = &body[off..off + kw];
        let count_off = off + kw;
        let count = u16::from_be_bytes([body[count_off], body[count_off + 1]]) as usize;
        let inc = if tag == TAG_INCLUDE_RLE {
            Some(&body[off + kw + 2..off + kw + 2 + iw])
        } else {
            None
        };
        bounds.push((cursor, cursor + count));
        key.push(k);
        include.push(inc);
        cursor += count;
        off += run_width;
    }
    RunTable {
        bounds,
        key,
        include,
    }
}

/// Returns `(key, include)` for the logical entry at `idx` (0-based, in
/// page order).
pub fn entry_at<'a>(schema: &Schema, page: &'a [u8], idx: usize) -> (&'a [u8], &'a [u8]) {
    let tag = tag_of(page);
    let kw = schema.key_width();
    let iw = schema.include_width();
    let body = &page[HEADER_LEN..page.len() - FOOTER_LEN];
    match tag {
        TAG_PLAIN => {
            let off = idx * (kw + iw);
            (&body[off..off + kw], &body[off + kw..off + kw + iw])
        }
        TAG_KEY_RLE => {
            let table = run_table(schema, page);
            let run = table
                .bounds
                .iter()
                .position(|(s, e)| idx >= *s && idx < *e)
                .expect("idx within nitems must land in some run");
            let nruns = table.bounds.len();
            let run_width = kw + 2;
            let includes_start = 2 + nruns * run_width;
            let inc_off = includes_start + idx * iw;
            (table.key[run], &body[inc_off..inc_off + iw])
        }
        TAG_INCLUDE_RLE => {
            let table = run_table(schema, page);
            let run = table
                .bounds
                .iter()
                .position(|(s, e)| idx >= *s && idx < *e)
                .expect("idx within nitems must land in some run");
            (table.key[run], table.include[run].unwrap())
        }
        _ => unreachable!(),
    }
}

/// `(run_start, run_end)` logical index bounds of the run containing `idx`.
/// Plain leaves have no runs; each entry is its own one-element "run" so
/// cursors can use the same caching code path uniformly.
pub fn run_bounds_at(schema: &Schema, page: &[u8], idx: usize) -> (usize, usize) {
    if is_plain(page) {
        return (idx, idx + 1);
    }
    let table = run_table(schema, page);
    *table
        .bounds
        .iter()
        .find(|(s, e)| idx >= *s && idx < *e)
        .expect("idx within nitems must land in some run")
}

/// Binary search for the first logical entry whose key is `>= query`.
/// Returns `nitems` if no such entry exists on this page.
pub fn locate_ge(schema: &Schema, page: &[u8], query: &[u8]) -> usize {
    let n = nitems(page) as usize;
    if n == 0 {
        return 0;
    }
    match tag_of(page) {
        TAG_PLAIN => {
            let (mut lo, mut hi) = (0usize, n);
            while lo < hi {
                let mid = lo + (hi - lo) / 2;
                let (k, _) = entry_at(schema, page, mid);
                if compare_encoded(k, query).is_lt() {
                    lo = mid + 1;
                } else {
                    hi = mid;
                }
            }
            lo
        }
        TAG_KEY_RLE | TAG_INCLUDE_RLE => {
            let table = run_table(schema, page);
            let (mut lo, mut hi) = (0usize, table.key.len());
            while lo < hi {
                let mid = lo + (hi - lo) / 2;
                if compare_encoded(table.key[mid], query).is_lt() {
                    lo = mid + 1;
                } else {
                    hi = mid;
                }
            }
            if lo == table.key.len() {
                n
            } else {
                table.bounds[lo].0
            }
        }
        _ => unreachable!(),
    }
}

/// Decodes every entry in page order; used by tests and by the builder's
/// encode/decode round-trip checks (spec §8 invariant 4).
pub fn iter_entries<'a>(schema: &'a Schema, page: &'a [u8]) -> impl Iterator<Item = (&'a [u8], &'a [u8])> {
    let n = nitems(page) as usize;
    (0..n).map(move |i| entry_at(schema, page, i))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{IncludeType, KeyType};

    fn schema_i32_i32() -> Schema {
        Schema::new(vec![KeyType::Int32], vec![IncludeType::Int32]).unwrap()
    }

    fn row(k: i32, i: i32) -> LeafEntry {
        LeafEntry {
            key: (k as u32 ^ 0x8000_0000).to_be_bytes().to_vec(),
            include: i.to_be_bytes().to_vec(),
        }
    }

    #[test]
    fn plain_round_trip() {
        let schema = schema_i32_i32();
        let rows = vec![row(1, 10), row(2, 20), row(3, 30)];
        let tag = select_format(&schema, &rows, ForceFormat::Plain);
        let mut buf = vec![0u8; 64];
        write_leaf(&mut buf, &schema, &rows, tag, INVALID_BLOCK).unwrap();
        assert_eq!(tag_of(&buf), TAG_PLAIN);
        assert_eq!(nitems(&buf), 3);
        let decoded: Vec<_> = iter_entries(&schema, &buf).collect();
        assert_eq!(decoded[0].0, rows[0].key.as_slice());
        assert_eq!(decoded[2].1, rows[2].include.as_slice());
    }

    #[test]
    fn key_rle_all_equal_keys_varying_includes() {
        let schema = schema_i32_i32();
        let rows = vec![row(5, 1), row(5, 2), row(5, 3)];
        let (plain, key_rle, inc_rle) = candidate_body_sizes(&schema, &rows);
        assert!(key_rle <= plain);
        assert!(key_rle < inc_rle || key_rle == inc_rle);
        let mut buf = vec![0u8; 128];
        write_leaf(&mut buf, &schema, &rows, TAG_KEY_RLE, 7).unwrap();
        assert_eq!(right_link(&buf), 7);
        let decoded: Vec<_> = iter_entries(&schema, &buf).collect();
        for (i, (k, inc)) in decoded.iter().enumerate() {
            assert_eq!(*k, rows[0].key.as_slice());
            assert_eq!(*inc, rows[i].include.as_slice());
        }
        let (s, e) = run_bounds_at(&schema, &buf, 1);
        assert_eq!((s, e), (0, 3));
    }

    #[test]
    fn include_rle_constant_run() {
        let schema = schema_i32_i32();
        let rows = vec![row(5, 9), row(5, 9), row(5, 9), row(6, 1)];
        let mut buf = vec![0u8; 128];
        write_leaf(&mut buf, &schema, &rows, TAG_INCLUDE_RLE, INVALID_BLOCK).unwrap();
        let decoded: Vec<_> = iter_entries(&schema, &buf).collect();
        assert_eq!(decoded.len(), 4);
        assert_eq!(decoded[2].1, 9i32.to_be_bytes());
        assert_eq!(decoded[3].0, rows[3].key.as_slice());
        let (s, e) = run_bounds_at(&schema, &buf, 0);
        assert_eq!((s, e), (0, 3));
    }

    #[test]
    fn locate_ge_binary_search() {
        let schema = schema_i32_i32();
        let rows = vec![row(1, 1), row(3, 1), row(3, 2), row(7, 1)];
        let mut buf = vec![0u8; 128];
        let tag = select_format(&schema, &rows, ForceFormat::Auto);
        write_leaf(&mut buf, &schema, &rows, tag, INVALID_BLOCK).unwrap();
        let mut q = Vec::new();
        let query_key = crate::key::KeyVal::I32(3);
        query_key.encode(KeyType::Int32, &mut q).unwrap();
        let idx = locate_ge(&schema, &buf, &q);
        let (k, _) = entry_at(&schema, &buf, idx);
        assert_eq!(k, &q[..]);
    }

    #[test]
    fn two_column_schemas_are_always_plain() {
        let schema = Schema::new(
            vec![KeyType::Int32, KeyType::Int32],
            vec![IncludeType::Int32],
        )
        .unwrap();
        let rows = vec![row(5, 1), row(5, 1), row(5, 1)];
        assert_eq!(select_format(&schema, &rows, ForceFormat::Auto), TAG_PLAIN);
        assert_eq!(select_format(&schema, &rows, ForceFormat::KeyRle), TAG_PLAIN);
        assert_eq!(select_format(&schema, &rows, ForceFormat::IncludeRle), TAG_PLAIN);
    }

    #[test]
    fn format_selection_is_size_minimal() {
        let schema = schema_i32_i32();
        let rows = vec![row(1, 1), row(2, 2), row(3, 3)];
        let tag = select_format(&schema, &rows, ForceFormat::Auto);
        let (plain, key_rle, inc_rle) = candidate_body_sizes(&schema, &rows);
        let min = plain.min(key_rle).min(inc_rle);
        let expected = if plain == min {
            TAG_PLAIN
        } else if key_rle == min {
            TAG_KEY_RLE
        } else {
            TAG_INCLUDE_RLE
        };
        assert_eq!(tag, expected);
    }
}
