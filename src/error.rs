use thiserror::Error;

/// Engine-wide error kinds (spec §7).
///
/// Build errors are fatal and leave no partial index behind, since the meta
/// page is always written last. Scan errors propagate to the caller except
/// `Canceled`, which callers observe as the cursor quietly going empty.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid key at row {row}, column {column}: {reason}")]
    InvalidKey {
        row: u64,
        column: usize,
        reason: String,
    },

    #[error("null value at row {row}, column {column}")]
    NullValue { row: u64, column: usize },

    #[error("unsupported key/include type at column {column}: {reason}")]
    UnsupportedType { column: usize, reason: String },

    #[error("schema mismatch: {reason}")]
    SchemaMismatch { reason: String },

    #[error("corrupt page {block}: {reason}")]
    CorruptPage { block: u64, reason: String },

    #[error("io failure: {0}")]
    IoFailure(#[from] std::io::Error),

    #[error("sort failure: {0}")]
    SortFailure(String),

    #[error("scan canceled")]
    Canceled,

    #[error("resource exceeded: {0}")]
    ResourceExceeded(String),
}

pub type Result<T> = std::result::Result<T, Error>;
