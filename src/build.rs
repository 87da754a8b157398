//! Bulk build pipeline (spec §4.2 "Build").
//!
//! This is the only code path that writes pages; once the meta page lands
//! at block 0 the index is immutable (spec invariant 8, "all pages are
//! immutable after seal"). The five steps below follow the teacher's
//! bottom-up `BinarytreeBuilder::build()`
//! (`weids-dev-radarbase/src/binarytree.rs`) and the external-sort-fed bulk
//! loader shape of `StaticBTreeBuilder` in
//! `other_examples/267b01a6_cityjson-flatcitybuf__src-rust-static-btree-src-builder.rs.rs`:
//! collect and sort, pack leaves left to right, record a directory entry per
//! leaf, pack internal levels bottom-up until one page remains, then write
//! the meta page last.

use crate::config::{Config, ForceFormat};
use crate::error::{Error, Result};
use crate::include::{encode_includes, IncludeVal};
use crate::key::{encode_key, KeyVal};
use crate::page::internal::{self, InternalEntry};
use crate::page::leaf::{self, LeafEntry};
use crate::page::meta::{DirEntry, Meta, FLAG_DIRECTORY_SAMPLED};
use crate::page::DB_METADATA_PAGE;
use crate::pager::PageStore;
use crate::schema::Schema;
use crate::sortrun::{RunSorter, SortedRows};

/// One input tuple in pre-typed-value form. `None` in a key column is a
/// fatal null (spec §7 "NULL in a key column"). `None` in an include column
/// is rejected the same way: §3 defines no NULL bitmap for include columns,
/// so a null include has nowhere to be represented on the leaf page.
pub struct InputRow {
    pub key: Vec<Option<KeyVal>>,
    pub include: Vec<Option<IncludeVal>>,
}

pub struct BuildSummary {
    pub meta: Meta,
    pub row_count: u64,
    pub leaf_count: u64,
}

/// Consumes `rows` and writes a complete index into `store`. `schema` is
/// moved into the returned `Meta` on success.
///
/// Parallel ingestion (partitioning the input across worker threads before
/// the sort) is left to the caller's choice of `rows` producer and to the
/// sorter's own `memory_budget` accounting; this builder itself runs the
/// sort-and-pack pipeline serially; deferring parallel *build* out of scope
/// keeps this reference implementation's single build path easy to reason
/// about, which is fine because §4.2 only requires parallel *scan*, not
/// parallel build.
pub fn build<I>(store: &PageStore, schema: Schema, config: &Config, rows: I) -> Result<BuildSummary>
where
    I: IntoIterator<Item = InputRow>,
{
    config.validate()?;

    // Meta always lives at block 0 but is written last; reserve it now so
    // leaf/internal blocks allocate contiguously starting at 1.
    let meta_block = store.extend()?;
    debug_assert_eq!(meta_block, DB_METADATA_PAGE);

    let memory_budget = config.page_size.saturating_mul(64).max(1 << 16);
    tracing::debug!(memory_budget, "sorting input rows");
    let sorted = collect_and_sort(&schema, memory_budget, rows)?;

    let (directory, first_leaf, last_leaf, row_count) = write_leaves(store, &schema, config, sorted)?;
    let leaf_count = directory.len() as u64;
    tracing::debug!(leaf_count, row_count, "leaves sealed");

    let level0: Vec<(Vec<u8>, u32)> = directory.iter().map(|d| (d.first_key.clone(), d.block)).collect();
    let (root_block, height) = write_internal_levels(store, config, level0)?;
    tracing::info!(root_block, height, leaf_count, row_count, "index build complete");

    let mut meta = Meta::empty(schema);
    meta.root_block = root_block;
    meta.height = height;
    meta.first_leaf = first_leaf;
    meta.last_leaf = last_leaf;
    meta.row_count = row_count;
    meta.directory = directory;
    shrink_directory_to_fit(&mut meta, config.page_size);

    let encoded = meta.encode();
    if encoded.len() > config.page_size {
        return Err(Error::ResourceExceeded(
            "meta page does not fit schema even with an empty directory".into(),
        ));
    }
    let mut buf = vec![0u8; config.page_size];
    buf[..encoded.len()].copy_from_slice(&encoded);
    store.write(meta_block, &buf);
    store.flush()?;

    Ok(BuildSummary {
        meta,
        row_count,
        leaf_count,
    })
}

/// Fixes up an `InvalidKey` error's row number: `key.rs`/`include.rs` encode
/// one row at a time and don't know their caller's row index, so they
/// always report `row: 0`.
fn attribute_row(err: Error, row: u64) -> Error {
    match err {
        Error::InvalidKey { column, reason, .. } => Error::InvalidKey { row, column, reason },
        other => other,
    }
}

fn collect_and_sort<I>(schema: &Schema, memory_budget: usize, rows: I) -> Result<SortedRows>
where
    I: IntoIterator<Item = InputRow>,
{
    let mut sorter = RunSorter::new(memory_budget);
    for (row_idx, row) in rows.into_iter().enumerate() {
        let row_idx = row_idx as u64;

        if row.key.len() != schema.nkeys() {
            return Err(Error::SchemaMismatch {
                reason: format!(
                    "row {} has {} key columns, schema declares {}",
                    row_idx,
                    row.key.len(),
                    schema.nkeys()
                ),
            });
        }
        let mut key_vals = Vec::with_capacity(row.key.len());
        for (col, v) in row.key.into_iter().enumerate() {
            key_vals.push(v.ok_or(Error::NullValue { row: row_idx, column: col })?);
        }
        let key_bytes = encode_key(schema, &key_vals).map_err(|e| attribute_row(e, row_idx))?;

        if row.include.len() != schema.includes.len() {
            return Err(Error::SchemaMismatch {
                reason: format!(
                    "row {} has {} include columns, schema declares {}",
                    row_idx,
                    row.include.len(),
                    schema.includes.len()
                ),
            });
        }
        let mut inc_vals = Vec::with_capacity(row.include.len());
        for (col, v) in row.include.into_iter().enumerate() {
            let column = schema.nkeys() + col;
            inc_vals.push(v.ok_or(Error::NullValue { row: row_idx, column })?);
        }
        let inc_bytes =
            encode_includes(&schema.includes, &inc_vals).map_err(|e| attribute_row(e, row_idx))?;

        sorter.put(key_bytes, inc_bytes)?;
    }
    sorter.finish()
}

/// Packs sorted rows into leaves left to right, sealing one whenever the
/// next row would overflow the page under its best-fit encoding (spec §4.2
/// step 2, "the encoding is re-evaluated only at seal time"). Returns the
/// completed directory plus the first/last leaf block and total row count.
fn write_leaves(
    store: &PageStore,
    schema: &Schema,
    config: &Config,
    mut sorted: SortedRows,
) -> Result<(Vec<DirEntry>, u32, u32, u64)> {
    let capacity = config.page_size - leaf::HEADER_LEN - leaf::FOOTER_LEN;
    let force_format = config.test.force_format;
    let max_tuples = config.test.max_tuples_per_page;

    let mut buffer: Vec<LeafEntry> = Vec::new();
    let mut directory: Vec<DirEntry> = Vec::new();
    let mut first_leaf = leaf::INVALID_BLOCK;
    let mut last_leaf = leaf::INVALID_BLOCK;
    let mut row_count = 0u64;

    while let Some(row) = sorted.next() {
        let (key, include) = row?;
        buffer.push(LeafEntry { key, include });
        row_count += 1;

        let hit_test_cap = max_tuples != 0 && buffer.len() as u32 >= max_tuples;
        let tag = leaf::select_format(schema, &buffer, force_format);
        let overflow = leaf::body_len_for(schema, &buffer, tag) > capacity;

        if hit_test_cap || overflow {
            let carry = if overflow { buffer.pop() } else { None };
            if buffer.is_empty() {
                return Err(Error::ResourceExceeded(
                    "a single row does not fit in one leaf page".into(),
                ));
            }
            seal_leaf(
                store,
                schema,
                config.page_size,
                force_format,
                &buffer,
                &mut directory,
                &mut first_leaf,
                &mut last_leaf,
            )?;
            buffer.clear();
            if let Some(row) = carry {
                buffer.push(row);
            }
        }
    }
    if !buffer.is_empty() {
        seal_leaf(
            store,
            schema,
            config.page_size,
            force_format,
            &buffer,
            &mut directory,
            &mut first_leaf,
            &mut last_leaf,
        )?;
    }

    // Leaf blocks allocate contiguously, so each seal below guesses its
    // right_link is the next block over; the true last leaf has no
    // successor, so its footer needs patching now that the count is final.
    if let Some(last) = directory.last() {
        let mut page = store.pin_mut(last.block as u64);
        let buf = page.memory_mut();
        let footer_off = buf.len() - leaf::FOOTER_LEN;
        buf[footer_off..footer_off + 4].copy_from_slice(&leaf::INVALID_BLOCK.to_be_bytes());
    }

    Ok((directory, first_leaf, last_leaf, row_count))
}

fn seal_leaf(
    store: &PageStore,
    schema: &Schema,
    page_size: usize,
    force_format: ForceFormat,
    rows: &[LeafEntry],
    directory: &mut Vec<DirEntry>,
    first_leaf: &mut u32,
    last_leaf: &mut u32,
) -> Result<()> {
    let block = store.extend()?;
    let tag = leaf::select_format(schema, rows, force_format);
    tracing::trace!(block, tag, nitems = rows.len(), "leaf format selected");
    let provisional_right_link = block as u32 + 1;

    let mut buf = vec![0u8; page_size];
    leaf::write_leaf(&mut buf, schema, rows, tag, provisional_right_link)?;
    store.write(block, &buf);

    if *first_leaf == leaf::INVALID_BLOCK {
        *first_leaf = block as u32;
    }
    *last_leaf = block as u32;
    directory.push(DirEntry {
        first_key: rows.first().expect("seal_leaf called with no rows").key.clone(),
        last_key: rows.last().expect("seal_leaf called with no rows").key.clone(),
        block: block as u32,
    });
    Ok(())
}

/// Packs `(separator, child_block)` pairs bottom-up until one page remains
/// (spec §4.2 step 4). Returns `(root_block, height)`; an empty or
/// single-entry input level needs no internal page at all — the lone leaf
/// (or, for an empty tree, nothing) is the root.
fn write_internal_levels(
    store: &PageStore,
    config: &Config,
    mut level: Vec<(Vec<u8>, u32)>,
) -> Result<(u32, u16)> {
    if level.is_empty() {
        return Ok((leaf::INVALID_BLOCK, 0));
    }
    if level.len() == 1 {
        return Ok((level[0].1, 0));
    }

    let capacity = config.page_size - internal::HEADER_LEN - internal::FOOTER_LEN;
    let max_fanout = config.test.max_internal_fanout;
    let mut height = 0u16;
    loop {
        let promoted = pack_internal_level(store, config.page_size, capacity, max_fanout, &level)?;
        height += 1;
        if promoted.len() == 1 {
            return Ok((promoted[0].1, height));
        }
        level = promoted;
    }
}

fn pack_internal_level(
    store: &PageStore,
    page_size: usize,
    capacity: usize,
    max_fanout: Option<u16>,
    entries: &[(Vec<u8>, u32)],
) -> Result<Vec<(Vec<u8>, u32)>> {
    let mut promoted = Vec::new();
    let mut idx = 0usize;
    while idx < entries.len() {
        let mut page_entries: Vec<InternalEntry> = Vec::new();
        let mut body = 0usize;
        while idx < entries.len() {
            let (key, child) = &entries[idx];
            let width = 2 + key.len() + 4;
            let over_capacity = body + width > capacity;
            let over_fanout = max_fanout.map_or(false, |m| page_entries.len() as u16 >= m);
            if !page_entries.is_empty() && (over_capacity || over_fanout) {
                break;
            }
            page_entries.push(InternalEntry {
                separator: key.clone(),
                child_block: *child,
            });
            body += width;
            idx += 1;
        }
        if page_entries.is_empty() {
            return Err(Error::ResourceExceeded(
                "a separator key is too large for an internal page".into(),
            ));
        }
        let block = store.extend()?;
        let mut buf = vec![0u8; page_size];
        internal::write_internal(&mut buf, &page_entries)?;
        store.write(block, &buf);
        promoted.push((page_entries[0].separator.clone(), block as u32));
    }
    Ok(promoted)
}

/// Thins the directory until the meta page (schema + directory) fits in one
/// page, halving its stride each pass. A directory that still doesn't fit at
/// one entry is dropped entirely; lookups then fall back to a root descent
/// instead of a directory binary search (spec §4.3 "Startup").
fn shrink_directory_to_fit(meta: &mut Meta, page_size: usize) {
    while meta.encode().len() > page_size && meta.directory.len() > 1 {
        meta.directory = meta.directory.iter().step_by(2).cloned().collect();
        meta.flags |= FLAG_DIRECTORY_SAMPLED;
    }
    if meta.encode().len() > page_size {
        meta.directory.clear();
        meta.flags |= FLAG_DIRECTORY_SAMPLED;
    }
}
