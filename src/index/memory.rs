//! In-memory metadata index
//!
//! BTreeMap under a RwLock. Nothing survives the process.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::error::Result;

use super::MetadataIndex;

/// Volatile ordered index, for tests and scratch partitions
#[derive(Debug, Default)]
pub struct MemoryIndex {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl MetadataIndex for MemoryIndex {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.data.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.data.write().remove(key);
        Ok(())
    }
}
