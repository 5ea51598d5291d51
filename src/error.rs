//! Error types for blobkv
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using BlobError
pub type Result<T> = std::result::Result<T, BlobError>;

/// Unified error type for blobkv operations
#[derive(Debug, Error)]
pub enum BlobError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Lookup Errors
    // -------------------------------------------------------------------------
    #[error("Key not found")]
    NotFound,

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    /// Malformed or inconsistent on-disk state: bad record, oversize length,
    /// truncated slot, corrupt allocator header, double free.
    #[error("Storage error: {0}")]
    Storage(String),

    /// No backing file could supply a slot of the requested size
    #[error("Insertion failed: no file could supply {size} bytes")]
    InsertionFailed { size: usize },

    // -------------------------------------------------------------------------
    // Metadata Index Errors
    // -------------------------------------------------------------------------
    #[error("Index corruption detected: {0}")]
    IndexCorruption(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl BlobError {
    /// Map a short read inside a slot or header to a storage error.
    ///
    /// A slot that ends before its length prefix says it should is on-disk
    /// inconsistency, not a transient I/O failure.
    pub(crate) fn from_read(err: std::io::Error, what: &str) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            BlobError::Storage(format!("truncated {}", what))
        } else {
            BlobError::Io(err)
        }
    }
}
