//! Key and include column schema (spec §3 "Entities").
//!
//! A key column is either fixed-width by-value (1/2/4/8 bytes) or short
//! bounded text (<=32 bytes, binary-ordered, zero-padded to its declared
//! width so byte-wise comparison matches text collation order). Include
//! columns are always fixed-width, never used for ordering.

use crate::error::{Error, Result};

pub const MAX_TEXT_LEN: u8 = 32;
pub const MAX_INCLUDE_COLUMNS: usize = 16;

/// Stand-in for the host's `type_oid` catalog lookup (spec §6 meta page
/// layout). A real host resolves these against its own catalog; here they
/// just need to round-trip through the meta page.
pub mod type_oid {
    pub const INT8: u32 = 1;
    pub const INT16: u32 = 2;
    pub const INT32: u32 = 3;
    pub const INT64: u32 = 4;
    pub const TEXT: u32 = 5;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Int8,
    Int16,
    Int32,
    Int64,
    /// `max_len` is the fixed, zero-padded on-disk width (<= MAX_TEXT_LEN).
    Text { max_len: u8 },
}

impl KeyType {
    pub fn width(self) -> usize {
        match self {
            KeyType::Int8 => 1,
            KeyType::Int16 => 2,
            KeyType::Int32 => 4,
            KeyType::Int64 => 8,
            KeyType::Text { max_len } => max_len as usize,
        }
    }

    pub fn by_val(self) -> bool {
        !matches!(self, KeyType::Text { .. })
    }

    pub fn type_oid(self) -> u32 {
        match self {
            KeyType::Int8 => type_oid::INT8,
            KeyType::Int16 => type_oid::INT16,
            KeyType::Int32 => type_oid::INT32,
            KeyType::Int64 => type_oid::INT64,
            KeyType::Text { .. } => type_oid::TEXT,
        }
    }

    pub fn collation(self) -> u32 {
        match self {
            KeyType::Text { .. } => 1, // binary collation, the only one this engine supports
            _ => 0,
        }
    }

    pub fn is_fixed_width_integer(self) -> bool {
        !matches!(self, KeyType::Text { .. })
    }

    fn validate(self, column: usize) -> Result<()> {
        if let KeyType::Text { max_len } = self {
            if max_len == 0 || max_len > MAX_TEXT_LEN {
                return Err(Error::UnsupportedType {
                    column,
                    reason: format!("text key length {} exceeds {}", max_len, MAX_TEXT_LEN),
                });
            }
        }
        Ok(())
    }
}

/// Include columns are always fixed-width by-value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncludeType {
    Int8,
    Int16,
    Int32,
    Int64,
}

impl IncludeType {
    pub fn width(self) -> usize {
        match self {
            IncludeType::Int8 => 1,
            IncludeType::Int16 => 2,
            IncludeType::Int32 => 4,
            IncludeType::Int64 => 8,
        }
    }

    pub fn type_oid(self) -> u32 {
        match self {
            IncludeType::Int8 => type_oid::INT8,
            IncludeType::Int16 => type_oid::INT16,
            IncludeType::Int32 => type_oid::INT32,
            IncludeType::Int64 => type_oid::INT64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub keys: Vec<KeyType>,
    pub includes: Vec<IncludeType>,
}

impl Schema {
    pub fn new(keys: Vec<KeyType>, includes: Vec<IncludeType>) -> Result<Schema> {
        if keys.is_empty() || keys.len() > 2 {
            return Err(Error::UnsupportedType {
                column: 0,
                reason: format!("nkeys must be 1 or 2, got {}", keys.len()),
            });
        }
        if keys.len() == 2 && keys.iter().any(|k| !k.is_fixed_width_integer()) {
            return Err(Error::UnsupportedType {
                column: 1,
                reason: "two-column schemas require fixed-width integer keys only".into(),
            });
        }
        if includes.len() > MAX_INCLUDE_COLUMNS {
            return Err(Error::UnsupportedType {
                column: keys.len(),
                reason: format!(
                    "ninclude must be <= {}, got {}",
                    MAX_INCLUDE_COLUMNS,
                    includes.len()
                ),
            });
        }
        for (i, k) in keys.iter().enumerate() {
            k.validate(i)?;
        }
        Ok(Schema { keys, includes })
    }

    pub fn nkeys(&self) -> usize {
        self.keys.len()
    }

    pub fn key_width(&self) -> usize {
        self.keys.iter().map(|k| k.width()).sum()
    }

    pub fn include_width(&self) -> usize {
        self.includes.iter().map(|i| i.width()).sum()
    }

    /// Total byte width of one plain-format row: keys followed by includes.
    pub fn row_width(&self) -> usize {
        self.key_width() + self.include_width()
    }

    pub fn is_two_column(&self) -> bool {
        self.keys.len() == 2
    }
}
