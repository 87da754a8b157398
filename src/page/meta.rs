//! Meta page: block 0 (spec §3 "Meta page", §6 wire layout).
//!
//! Written last during a build so an aborted build is detectable by its
//! invalid magic/version — the same "validity oath written last" trick
//! the teacher's `Storage::initialize` uses for its own magic number
//! (`weids-dev-radarbase/src/storage.rs`), generalized here to a tree with
//! internal levels instead of a flat append log.

use crate::error::{Error, Result};
use crate::schema::{IncludeType, KeyType, Schema};

pub const MAGIC: u32 = 0x534D_4F4C; // "SMOL" - arbitrary, spec-fixed value
pub const VERSION: u16 = 1;
pub const INVALID_BLOCK: u32 = u32::MAX;

/// Set when the build had to thin the directory to fit it in the meta page;
/// a sampled directory no longer covers every leaf, so the fast
/// directory-based seek (spec §4.3 "Startup") falls back to a tree descent.
pub const FLAG_DIRECTORY_SAMPLED: u16 = 0x1;

/// One `(first_key, last_key, block)` sample of the meta-resident directory
/// (spec's Glossary "Directory"), enabling an O(log n) lower-bound seek
/// without a tree descent when the first key column is a fixed-width
/// integer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub first_key: Vec<u8>,
    pub last_key: Vec<u8>,
    pub block: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Meta {
    pub version: u16,
    pub flags: u16,
    pub root_block: u32,
    pub height: u16,
    pub first_leaf: u32,
    pub last_leaf: u32,
    /// Total entry count across all leaves, recorded for the cost estimator
    /// (spec §4.6 "rows"); not used by the scan engine itself.
    pub row_count: u64,
    pub schema: Schema,
    pub directory: Vec<DirEntry>,
}

impl Meta {
    pub fn empty(schema: Schema) -> Meta {
        Meta {
            version: VERSION,
            flags: 0,
            root_block: INVALID_BLOCK,
            height: 0,
            first_leaf: INVALID_BLOCK,
            last_leaf: INVALID_BLOCK,
            row_count: 0,
            schema,
            directory: Vec::new(),
        }
    }

    pub fn is_empty_tree(&self) -> bool {
        self.root_block == INVALID_BLOCK
    }

    pub fn directory_is_sampled(&self) -> bool {
        self.flags & FLAG_DIRECTORY_SAMPLED != 0
    }

    /// Encodes the meta page's body (everything after the magic number),
    /// used for in-page storage. Directory spill to dedicated pages (the
    /// large-tree case) is handled by the caller, which passes a directory
    /// slice that already fits.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC.to_be_bytes());
        out.extend_from_slice(&self.version.to_be_bytes());
        out.extend_from_slice(&self.flags.to_be_bytes());
        out.extend_from_slice(&self.root_block.to_be_bytes());
        out.extend_from_slice(&self.height.to_be_bytes());
        out.extend_from_slice(&self.first_leaf.to_be_bytes());
        out.extend_from_slice(&self.last_leaf.to_be_bytes());
        out.extend_from_slice(&self.row_count.to_be_bytes());

        out.push(self.schema.nkeys() as u8);
        out.push(self.schema.includes.len() as u8);
        for k in &self.schema.keys {
            out.extend_from_slice(&k.type_oid().to_be_bytes());
            out.push(k.by_val() as u8);
            out.push(k.width() as u8);
            out.extend_from_slice(&k.collation().to_be_bytes());
        }
        for i in &self.schema.includes {
            out.extend_from_slice(&i.type_oid().to_be_bytes());
            out.push(1u8); // includes are always fixed-width by-value
            out.push(i.width() as u8);
        }

        out.extend_from_slice(&(self.directory.len() as u32).to_be_bytes());
        for d in &self.directory {
            out.extend_from_slice(&d.first_key);
            out.extend_from_slice(&d.last_key);
            out.extend_from_slice(&d.block.to_be_bytes());
        }
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Meta> {
        let mut off = 0usize;
        let read_u32 = |b: &[u8], o: usize| u32::from_be_bytes(b[o..o + 4].try_into().unwrap());
        let read_u16 = |b: &[u8], o: usize| u16::from_be_bytes(b[o..o + 2].try_into().unwrap());

        if buf.len() < 4 || read_u32(buf, 0) != MAGIC {
            return Err(Error::CorruptPage {
                block: 0,
                reason: "bad magic number: build likely incomplete or page not initialized".into(),
            });
        }
        off += 4;
        let version = read_u16(buf, off);
        off += 2;
        let flags = read_u16(buf, off);
        off += 2;
        let root_block = read_u32(buf, off);
        off += 4;
        let height = read_u16(buf, off);
        off += 2;
        let first_leaf = read_u32(buf, off);
        off += 4;
        let last_leaf = read_u32(buf, off);
        off += 4;
        let row_count = u64::from_be_bytes(buf[off..off + 8].try_into().unwrap());
        off += 8;

        let nkeys = buf[off] as usize;
        off += 1;
        let ninclude = buf[off] as usize;
        off += 1;

        let mut keys = Vec::with_capacity(nkeys);
        for i in 0..nkeys {
            let type_oid = read_u32(buf, off);
            off += 4;
            let _by_val = buf[off] != 0;
            off += 1;
            let length = buf[off];
            off += 1;
            let _collation = read_u32(buf, off);
            off += 4;
            keys.push(key_type_from_wire(type_oid, length, i)?);
        }
        let mut includes = Vec::with_capacity(ninclude);
        for i in 0..ninclude {
            let type_oid = read_u32(buf, off);
            off += 4;
            let _by_val = buf[off] != 0;
            off += 1;
            let _length = buf[off];
            off += 1;
            includes.push(include_type_from_wire(type_oid, nkeys + i)?);
        }
        let schema = Schema::new(keys, includes)?;

        let dir_count = read_u32(buf, off) as usize;
        off += 4;
        let kw = schema.key_width();
        let mut directory = Vec::with_capacity(dir_count);
        for _ in 0..dir_count {
            let first_key = buf[off..off + kw].to_vec();
            off += kw;
            let last_key = buf[off..off + kw].to_vec();
            off += kw;
            let block = read_u32(buf, off);
            off += 4;
            directory.push(DirEntry {
                first_key,
                last_key,
                block,
            });
        }

        Ok(Meta {
            version,
            flags,
            root_block,
            height,
            first_leaf,
            last_leaf,
            row_count,
            schema,
            directory,
        })
    }
}

fn key_type_from_wire(type_oid: u32, length: u8, column: usize) -> Result<KeyType> {
    use crate::schema::type_oid as oid;
    Ok(match type_oid {
        oid::INT8 => KeyType::Int8,
        oid::INT16 => KeyType::Int16,
        oid::INT32 => KeyType::Int32,
        oid::INT64 => KeyType::Int64,
        oid::TEXT => KeyType::Text { max_len: length },
        other => {
            return Err(Error::UnsupportedType {
                column,
                reason: format!("unrecognized key type_oid {}", other),
            })
        }
    })
}

fn include_type_from_wire(type_oid: u32, column: usize) -> Result<IncludeType> {
    use crate::schema::type_oid as oid;
    Ok(match type_oid {
        oid::INT8 => IncludeType::Int8,
        oid::INT16 => IncludeType::Int16,
        oid::INT32 => IncludeType::Int32,
        oid::INT64 => IncludeType::Int64,
        other => {
            return Err(Error::UnsupportedType {
                column,
                reason: format!("unrecognized include type_oid {}", other),
            })
        }
    })
}

/// Binary-searches the directory for the first leaf whose `last_key >=
/// lower_bound`. Only valid when the directory is present and the first
/// key column is a fixed-width integer (spec §4.3 "Startup").
pub fn directory_seek(directory: &[DirEntry], lower_bound: &[u8]) -> Option<u32> {
    let (mut lo, mut hi) = (0usize, directory.len());
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if directory[mid].last_key.as_slice() < lower_bound {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    directory.get(lo).map(|d| d.block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{IncludeType, KeyType};

    #[test]
    fn round_trip() {
        let schema = Schema::new(vec![KeyType::Int32], vec![IncludeType::Int64]).unwrap();
        let mut meta = Meta::empty(schema);
        meta.root_block = 3;
        meta.height = 2;
        meta.first_leaf = 1;
        meta.last_leaf = 2;
        meta.row_count = 9;
        meta.directory.push(DirEntry {
            first_key: vec![0, 0, 0, 1],
            last_key: vec![0, 0, 0, 9],
            block: 1,
        });
        let encoded = meta.encode();
        let decoded = Meta::decode(&encoded).unwrap();
        assert_eq!(meta, decoded);
    }

    #[test]
    fn bad_magic_is_corrupt() {
        let buf = vec![0u8; 64];
        assert!(Meta::decode(&buf).is_err());
    }

    #[test]
    fn directory_seek_finds_leaf() {
        let dir = vec![
            DirEntry {
                first_key: vec![0],
                last_key: vec![5],
                block: 1,
            },
            DirEntry {
                first_key: vec![6],
                last_key: vec![10],
                block: 2,
            },
        ];
        assert_eq!(directory_seek(&dir, &[3]), Some(1));
        assert_eq!(directory_seek(&dir, &[7]), Some(2));
        assert_eq!(directory_seek(&dir, &[20]), None);
    }
}
