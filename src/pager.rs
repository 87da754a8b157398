//! A reference page-storage backend (spec §9.4 "ambient stack" addition).
//!
//! `spec.md` places the buffer manager ("pin/unpin/prefetch/extend/read/
//! write") out of scope as a host collaborator. This module is a concrete,
//! memmap-backed implementation of that contract so the engine can be
//! built and scanned end-to-end in this repo's own tests, built the way
//! the teacher's `PageManager`/`Storage` pair is built
//! (`weids-dev-radarbase/src/page_manager.rs`): a `RefCell<MmapMut>` with
//! `Ref`/`RefMut`-derived page views, and a small reserved-capacity file
//! grown only by bumping a page counter, never by remapping.

use crate::error::{Error, Result};
use memmap2::MmapMut;
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::fs::File;

pub struct Page<'a> {
    mem: Ref<'a, [u8]>,
}

impl<'a> Page<'a> {
    pub fn memory(&self) -> &[u8] {
        &self.mem
    }
}

pub struct PageMut<'a> {
    mem: RefMut<'a, [u8]>,
}

impl<'a> PageMut<'a> {
    pub fn memory(&self) -> &[u8] {
        &self.mem
    }

    pub fn memory_mut(&mut self) -> &mut [u8] {
        &mut self.mem
    }
}

/// Reference realization of the spec's buffer-manager contract. Reserves
/// `capacity_pages` worth of file space up front (mirroring the teacher's
/// `Database::open`, which pre-sizes its mmap rather than growing it per
/// write) and tracks how many of those pages are in use.
pub struct PageStore {
    mmap: RefCell<MmapMut>,
    page_size: usize,
    capacity_pages: u64,
    next_free: Cell<u64>,
    prefetch_count: Cell<u64>,
}

impl PageStore {
    /// Creates a fresh store backed by `file`, reserving room for
    /// `capacity_pages` pages of `page_size` bytes each.
    pub fn create(file: &File, page_size: usize, capacity_pages: u64) -> Result<PageStore> {
        let len = page_size as u64 * capacity_pages;
        file.set_len(len)?;
        let mmap = unsafe { MmapMut::map_mut(file)? };
        Ok(PageStore {
            mmap: RefCell::new(mmap),
            page_size,
            capacity_pages,
            next_free: Cell::new(0),
            prefetch_count: Cell::new(0),
        })
    }

    /// Opens a store that already has `num_pages` valid pages written,
    /// e.g. re-opening a completed build for scanning.
    pub fn open(file: &File, page_size: usize, num_pages: u64) -> Result<PageStore> {
        let mmap = unsafe { MmapMut::map_mut(file)? };
        let capacity_pages = mmap.len() as u64 / page_size as u64;
        Ok(PageStore {
            mmap: RefCell::new(mmap),
            page_size,
            capacity_pages,
            next_free: Cell::new(num_pages),
            prefetch_count: Cell::new(0),
        })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn num_pages(&self) -> u64 {
        self.next_free.get()
    }

    /// Allocates the next sequential page, growing `next_free`. Build-time
    /// only: pages are never freed once sealed (spec invariant 8, "all
    /// pages are immutable after seal").
    pub fn extend(&self) -> Result<u64> {
        let n = self.next_free.get();
        if n >= self.capacity_pages {
            return Err(Error::ResourceExceeded(format!(
                "page store exhausted its {}-page reservation",
                self.capacity_pages
            )));
        }
        self.next_free.set(n + 1);
        Ok(n)
    }

    fn bounds(&self, page_number: u64) -> (usize, usize) {
        let start = page_number as usize * self.page_size;
        (start, start + self.page_size)
    }

    /// Pins the page for reading. Unpinning happens implicitly when the
    /// returned `Page` is dropped (spec §5 "at most one pinned page per
    /// cursor").
    pub fn pin(&self, page_number: u64) -> Page {
        let (start, end) = self.bounds(page_number);
        Page {
            mem: Ref::map(self.mmap.borrow(), |m| &m[start..end]),
        }
    }

    pub fn pin_mut(&self, page_number: u64) -> PageMut {
        let (start, end) = self.bounds(page_number);
        PageMut {
            mem: RefMut::map(self.mmap.borrow_mut(), |m| &mut m[start..end]),
        }
    }

    pub fn read(&self, page_number: u64, buf: &mut [u8]) {
        let page = self.pin(page_number);
        buf.copy_from_slice(page.memory());
    }

    pub fn write(&self, page_number: u64, buf: &[u8]) {
        let mut page = self.pin_mut(page_number);
        page.memory_mut().copy_from_slice(buf);
    }

    /// Issues an asynchronous read-ahead hint. This reference backend has
    /// no actual I/O queue (the whole file is memory-mapped already), so it
    /// only counts the call — tests assert on the count to verify the
    /// prefetch controller's depth policy without needing real disk I/O.
    pub fn prefetch(&self, _page_number: u64) {
        self.prefetch_count.set(self.prefetch_count.get() + 1);
    }

    pub fn prefetch_count(&self) -> u64 {
        self.prefetch_count.get()
    }

    pub fn flush(&self) -> Result<()> {
        self.mmap.borrow().flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempfile;

    #[test]
    fn extend_and_write_read() {
        let file = tempfile().unwrap();
        let store = PageStore::create(&file, 128, 4).unwrap();
        let p0 = store.extend().unwrap();
        let p1 = store.extend().unwrap();
        assert_eq!((p0, p1), (0, 1));

        store.write(p0, &[7u8; 128]);
        let mut buf = [0u8; 128];
        store.read(p0, &mut buf);
        assert_eq!(buf, [7u8; 128]);

        let mut other = [0u8; 128];
        store.read(p1, &mut other);
        assert_eq!(other, [0u8; 128]);
    }

    #[test]
    fn extend_past_capacity_fails() {
        let file = tempfile().unwrap();
        let store = PageStore::create(&file, 64, 1).unwrap();
        store.extend().unwrap();
        assert!(store.extend().is_err());
    }
}
