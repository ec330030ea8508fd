//! Error types for the JSON stores.

use std::path::PathBuf;

/// Errors raised while mutating a store.
///
/// Persistence errors are reported after the in-memory map has already been
/// updated; the mutation stands even though it may be lost on restart.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Writing the backing file failed.
    #[error("failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The map could not be serialized.
    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The requested value was rejected before anything was changed.
    #[error("invalid value: {0}")]
    InvalidValue(String),
}
