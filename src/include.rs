//! Include-column values (spec §3 "Include schema").
//!
//! Unlike key columns, include columns are never compared, so their
//! encoding is a plain fixed-width byte representation — no sign-bit flip
//! needed.

use crate::error::{Error, Result};
use crate::schema::IncludeType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncludeVal {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
}

impl IncludeVal {
    pub fn encode(&self, ty: IncludeType, out: &mut Vec<u8>) -> Result<()> {
        match (self, ty) {
            (IncludeVal::I8(v), IncludeType::Int8) => out.push(*v as u8),
            (IncludeVal::I16(v), IncludeType::Int16) => out.extend_from_slice(&v.to_be_bytes()),
            (IncludeVal::I32(v), IncludeType::Int32) => out.extend_from_slice(&v.to_be_bytes()),
            (IncludeVal::I64(v), IncludeType::Int64) => out.extend_from_slice(&v.to_be_bytes()),
            _ => {
                return Err(Error::InvalidKey {
                    row: 0,
                    column: 0,
                    reason: "include value does not match column type".into(),
                })
            }
        }
        Ok(())
    }

    pub fn decode(ty: IncludeType, raw: &[u8]) -> IncludeVal {
        match ty {
            IncludeType::Int8 => IncludeVal::I8(raw[0] as i8),
            IncludeType::Int16 => IncludeVal::I16(i16::from_be_bytes(raw[0..2].try_into().unwrap())),
            IncludeType::Int32 => IncludeVal::I32(i32::from_be_bytes(raw[0..4].try_into().unwrap())),
            IncludeType::Int64 => IncludeVal::I64(i64::from_be_bytes(raw[0..8].try_into().unwrap())),
        }
    }
}

pub fn encode_includes(types: &[IncludeType], values: &[IncludeVal]) -> Result<Vec<u8>> {
    if values.len() != types.len() {
        return Err(Error::InvalidKey {
            row: 0,
            column: 0,
            reason: format!("expected {} include columns, got {}", types.len(), values.len()),
        });
    }
    let mut out = Vec::with_capacity(types.iter().map(|t| t.width()).sum());
    for (v, t) in values.iter().zip(types.iter()) {
        v.encode(*t, &mut out)?;
    }
    Ok(out)
}
