//! Index-only partition
//!
//! Every value goes verbatim into the metadata index.

use std::io::Write;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{BlobError, Result};
use crate::index::{LogIndex, MetadataIndex};

use super::{KeyValuePartition, INDEX_DIR};

/// Partition without data files
pub struct SimplePartition {
    index: Arc<dyn MetadataIndex>,
}

impl SimplePartition {
    /// Open or create the partition in `config.data_dir`
    pub fn open(config: &Config) -> Result<Self> {
        config.validate()?;
        let index = LogIndex::open(&config.data_dir.join(INDEX_DIR), config.index_sync)?;
        Ok(Self::new(Arc::new(index)))
    }

    pub fn new(index: Arc<dyn MetadataIndex>) -> Self {
        Self { index }
    }
}

impl KeyValuePartition for SimplePartition {
    fn put(&self, id: &[u8], value: &[u8]) -> Result<()> {
        if value.is_empty() {
            return self.index.delete(id);
        }
        self.index.put(id, value)
    }

    fn get(&self, id: &[u8], sink: &mut dyn Write) -> Result<()> {
        let value = self.index.get(id)?.ok_or(BlobError::NotFound)?;
        sink.write_all(&value)?;
        Ok(())
    }

    /// No capacity budget applies
    fn approx_free_space(&self) -> u64 {
        0
    }
}
