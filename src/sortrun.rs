//! External sort (spec §9.4 "ambient stack" addition; §6 "Sorter" consumed
//! interface; §4.2 step 1 "Collect and sort").
//!
//! `spec.md` treats the sorter (`new(memory_budget, cmp)`, `put`, `finish`,
//! `next`) as a host collaborator. This is a concrete reference
//! implementation of that contract: buffer rows in memory, spill a sorted
//! run to a temp file once the budget is exceeded, and k-way merge the
//! runs on `finish`. A host embedding this engine in a real planner is
//! expected to supply its own, e.g. backed by its own work_mem accounting.
//!
//! Ties are broken by arrival order (spec §4.2 "ties broken by arrival
//! order to make builds deterministic"): `Vec::sort_by` is a stable sort,
//! so within one in-memory chunk ties keep insertion order for free; the
//! merge step below additionally prefers the earliest-numbered run on a
//! tie, preserving the same determinism across spilled runs.

use crate::error::{Error, Result};
use crate::key::compare_encoded;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};

pub type Row = (Vec<u8>, Vec<u8>);

fn write_row(w: &mut impl Write, row: &Row) -> Result<()> {
    w.write_all(&(row.0.len() as u32).to_be_bytes())?;
    w.write_all(&row.0)?;
    w.write_all(&(row.1.len() as u32).to_be_bytes())?;
    w.write_all(&row.1)?;
    Ok(())
}

fn read_row(r: &mut impl Read) -> Result<Option<Row>> {
    let mut len_buf = [0u8; 4];
    match r.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(Error::from(e)),
    }
    let key_len = u32::from_be_bytes(len_buf) as usize;
    let mut key = vec![0u8; key_len];
    r.read_exact(&mut key)?;
    r.read_exact(&mut len_buf)?;
    let inc_len = u32::from_be_bytes(len_buf) as usize;
    let mut include = vec![0u8; inc_len];
    r.read_exact(&mut include)?;
    Ok(Some((key, include)))
}

pub struct RunSorter {
    memory_budget: usize,
    buffer: Vec<Row>,
    buffer_bytes: usize,
    runs: Vec<std::fs::File>,
}

impl RunSorter {
    pub fn new(memory_budget: usize) -> RunSorter {
        RunSorter {
            memory_budget: memory_budget.max(1),
            buffer: Vec::new(),
            buffer_bytes: 0,
            runs: Vec::new(),
        }
    }

    pub fn put(&mut self, key: Vec<u8>, include: Vec<u8>) -> Result<()> {
        self.buffer_bytes += key.len() + include.len() + 16;
        self.buffer.push((key, include));
        if self.buffer_bytes >= self.memory_budget {
            self.spill()?;
        }
        Ok(())
    }

    fn spill(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.buffer.sort_by(|a, b| compare_encoded(&a.0, &b.0));
        let file = tempfile::tempfile().map_err(|e| {
            Error::SortFailure(format!("could not create spill file: {}", e))
        })?;
        let mut w = BufWriter::new(file);
        for row in &self.buffer {
            write_row(&mut w, row)?;
        }
        let mut file = w.into_inner().map_err(|e| Error::SortFailure(e.to_string()))?;
        file.seek(SeekFrom::Start(0))?;
        self.runs.push(file);
        self.buffer.clear();
        self.buffer_bytes = 0;
        Ok(())
    }

    /// Consumes the sorter, producing the fully merged ascending stream.
    pub fn finish(mut self) -> Result<SortedRows> {
        if self.runs.is_empty() {
            self.buffer.sort_by(|a, b| compare_encoded(&a.0, &b.0));
            return Ok(SortedRows::Memory(self.buffer.into_iter()));
        }
        self.spill()?;
        let readers: Vec<_> = self.runs.into_iter().map(RowFileReader).collect();
        Ok(SortedRows::Merged(KWayMerge::new(readers)?))
    }
}

pub enum SortedRows {
    Memory(std::vec::IntoIter<Row>),
    Merged(MergeRows),
}

impl Iterator for SortedRows {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Result<Row>> {
        match self {
            SortedRows::Memory(it) => it.next().map(Ok),
            SortedRows::Merged(it) => it.next(),
        }
    }
}

/// Adapts a spilled run file to the `Iterator<Item = Result<Row>>` shape the
/// merge machinery expects, whether the run lives on disk or (in the
/// parallel build path, `build.rs`) is itself another worker's already
/// sorted/merged in-memory stream.
struct RowFileReader(BufReader<std::fs::File>);

impl Iterator for RowFileReader {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Result<Row>> {
        read_row(&mut self.0).transpose()
    }
}

struct HeapItem {
    key: Vec<u8>,
    run: usize,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.run == other.run
    }
}
impl Eq for HeapItem {}
impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_encoded(&self.key, &other.key).then(self.run.cmp(&other.run))
    }
}

/// K-way merge over a set of streams, each already internally ascending.
/// Generic over the stream type so the same machinery merges spilled run
/// files here and, in the parallel build path, per-worker in-memory/merged
/// streams (`build.rs`).
pub struct KWayMerge<S: Iterator<Item = Result<Row>>> {
    streams: Vec<S>,
    pending: Vec<Option<Row>>,
    heap: BinaryHeap<Reverse<HeapItem>>,
}

impl<S: Iterator<Item = Result<Row>>> KWayMerge<S> {
    pub fn new(mut streams: Vec<S>) -> Result<KWayMerge<S>> {
        let mut pending = Vec::with_capacity(streams.len());
        let mut heap = BinaryHeap::new();
        for (i, s) in streams.iter_mut().enumerate() {
            let row = s.next().transpose()?;
            if let Some((key, _)) = &row {
                heap.push(Reverse(HeapItem {
                    key: key.clone(),
                    run: i,
                }));
            }
            pending.push(row);
        }
        Ok(KWayMerge {
            streams,
            pending,
            heap,
        })
    }
}

impl<S: Iterator<Item = Result<Row>>> Iterator for KWayMerge<S> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Result<Row>> {
        let Reverse(top) = self.heap.pop()?;
        let run = top.run;
        let row = self.pending[run].take().expect("heap entry without pending row");

        match self.streams[run].next().transpose() {
            Ok(next_row) => {
                if let Some((key, _)) = &next_row {
                    self.heap.push(Reverse(HeapItem {
                        key: key.clone(),
                        run,
                    }));
                }
                self.pending[run] = next_row;
            }
            Err(e) => return Some(Err(e)),
        }
        Some(Ok(row))
    }
}

pub type MergeRows = KWayMerge<RowFileReader>;

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u32) -> Vec<u8> {
        n.to_be_bytes().to_vec()
    }

    #[test]
    fn sorts_within_memory_budget() {
        let mut sorter = RunSorter::new(1 << 20);
        for n in [5u32, 1, 3, 2, 4] {
            sorter.put(key(n), vec![]).unwrap();
        }
        let rows: Vec<_> = sorter.finish().unwrap().collect::<Result<_>>().unwrap();
        let keys: Vec<u32> = rows
            .iter()
            .map(|(k, _)| u32::from_be_bytes(k.clone().try_into().unwrap()))
            .collect();
        assert_eq!(keys, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn spills_and_merges_runs() {
        // tiny budget forces a spill after every couple of rows
        let mut sorter = RunSorter::new(24);
        for n in [9u32, 1, 8, 2, 7, 3, 6, 4, 5] {
            sorter.put(key(n), vec![]).unwrap();
        }
        let rows: Vec<_> = sorter.finish().unwrap().collect::<Result<_>>().unwrap();
        let keys: Vec<u32> = rows
            .iter()
            .map(|(k, _)| u32::from_be_bytes(k.clone().try_into().unwrap()))
            .collect();
        assert_eq!(keys, vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn ties_keep_arrival_order() {
        let mut sorter = RunSorter::new(1 << 20);
        sorter.put(key(1), vec![1]).unwrap();
        sorter.put(key(1), vec![2]).unwrap();
        sorter.put(key(1), vec![3]).unwrap();
        let rows: Vec<_> = sorter.finish().unwrap().collect::<Result<_>>().unwrap();
        let includes: Vec<u8> = rows.iter().map(|(_, i)| i[0]).collect();
        assert_eq!(includes, vec![1, 2, 3]);
    }
}
