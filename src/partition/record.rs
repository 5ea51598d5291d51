//! Value records
//!
//! What the metadata index stores under a key: the value itself, or the
//! location of the slot holding it.

use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::error::{BlobError, Result};

use super::MAX_VALUE_SIZE;

/// Decoded metadata record of one key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueRecord {
    /// Value stored directly in the index
    Inline(Vec<u8>),

    /// Value stored in slot `offset` of data file `file`
    Redirect { file: u64, offset: u64 },
}

/// Fixed-width, little-endian, no trailing garbage, bounded allocation
fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .reject_trailing_bytes()
        .with_limit(MAX_VALUE_SIZE as u64 + 64)
}

impl ValueRecord {
    /// Encode for storage in the metadata index
    pub fn encode(&self) -> Result<Vec<u8>> {
        codec()
            .serialize(self)
            .map_err(|e| BlobError::Serialization(e.to_string()))
    }

    /// Decode a record read from the metadata index
    ///
    /// Anything that is not exactly one well-formed record is a storage
    /// error.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        codec()
            .deserialize(bytes)
            .map_err(|e| BlobError::Storage(format!("Malformed value record: {}", e)))
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, ValueRecord::Inline(_))
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self, ValueRecord::Redirect { .. })
    }
}
