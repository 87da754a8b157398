//! Typed key values and their order-preserving binary encoding.
//!
//! Spec §9 prefers "a tagged-variant over virtual dispatch" for comparisons
//! across key types. `KeyVal` is that tagged variant. Each variant encodes
//! to a fixed-width byte run chosen so that plain byte-wise comparison
//! (`memcmp`) of the encoded bytes matches the value's natural order —
//! signed integers get their sign bit flipped, text is zero-padded to its
//! declared width. Because encoding already makes the bytes order-preserving,
//! a two-column composite key is just its columns' encodings concatenated:
//! `Ord` on the byte string is `Ord` on the tuple. This is also why internal
//! pages can use one length-prefixed byte format for both the 1- and
//! 2-column case (spec §3 Internal page).

use crate::error::{Error, Result};
use crate::schema::{KeyType, Schema};
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyVal {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    Text(Vec<u8>),
}

impl KeyVal {
    pub fn type_of(&self) -> KeyType {
        match self {
            KeyVal::I8(_) => KeyType::Int8,
            KeyVal::I16(_) => KeyType::Int16,
            KeyVal::I32(_) => KeyType::Int32,
            KeyVal::I64(_) => KeyType::Int64,
            KeyVal::Text(b) => KeyType::Text {
                max_len: b.len().min(u8::MAX as usize) as u8,
            },
        }
    }

    /// Writes the order-preserving encoding of this value for `ty` to `out`.
    pub fn encode(&self, ty: KeyType, out: &mut Vec<u8>) -> Result<()> {
        match (self, ty) {
            (KeyVal::I8(v), KeyType::Int8) => out.push((*v as u8) ^ 0x80),
            (KeyVal::I16(v), KeyType::Int16) => {
                out.extend_from_slice(&((*v as u16) ^ 0x8000).to_be_bytes())
            }
            (KeyVal::I32(v), KeyType::Int32) => {
                out.extend_from_slice(&((*v as u32) ^ 0x8000_0000).to_be_bytes())
            }
            (KeyVal::I64(v), KeyType::Int64) => {
                out.extend_from_slice(&((*v as u64) ^ 0x8000_0000_0000_0000).to_be_bytes())
            }
            (KeyVal::Text(bytes), KeyType::Text { max_len }) => {
                if bytes.len() > max_len as usize {
                    return Err(Error::InvalidKey {
                        row: 0,
                        column: 0,
                        reason: format!(
                            "text key length {} exceeds schema max {}",
                            bytes.len(),
                            max_len
                        ),
                    });
                }
                let start = out.len();
                out.resize(start + max_len as usize, 0);
                out[start..start + bytes.len()].copy_from_slice(bytes);
            }
            _ => {
                return Err(Error::InvalidKey {
                    row: 0,
                    column: 0,
                    reason: "key value does not match column type".into(),
                })
            }
        }
        Ok(())
    }

    pub fn decode(ty: KeyType, raw: &[u8]) -> KeyVal {
        match ty {
            KeyType::Int8 => KeyVal::I8((raw[0] ^ 0x80) as i8),
            KeyType::Int16 => {
                let v = u16::from_be_bytes([raw[0], raw[1]]) ^ 0x8000;
                KeyVal::I16(v as i16)
            }
            KeyType::Int32 => {
                let v = u32::from_be_bytes(raw[0..4].try_into().unwrap()) ^ 0x8000_0000;
                KeyVal::I32(v as i32)
            }
            KeyType::Int64 => {
                let v = u64::from_be_bytes(raw[0..8].try_into().unwrap())
                    ^ 0x8000_0000_0000_0000;
                KeyVal::I64(v as i64)
            }
            KeyType::Text { max_len } => KeyVal::Text(raw[..max_len as usize].to_vec()),
        }
    }
}

/// Encodes a full (possibly two-column) key tuple into its on-disk byte run.
pub fn encode_key(schema: &Schema, values: &[KeyVal]) -> Result<Vec<u8>> {
    if values.len() != schema.keys.len() {
        return Err(Error::InvalidKey {
            row: 0,
            column: 0,
            reason: format!(
                "expected {} key columns, got {}",
                schema.keys.len(),
                values.len()
            ),
        });
    }
    let mut out = Vec::with_capacity(schema.key_width());
    for (v, ty) in values.iter().zip(schema.keys.iter()) {
        v.encode(*ty, &mut out)?;
    }
    Ok(out)
}

/// Encoded keys compare by plain byte-wise order; this function exists only
/// to name the comparator explicitly at call sites.
pub fn compare_encoded(a: &[u8], b: &[u8]) -> Ordering {
    a.cmp(b)
}
