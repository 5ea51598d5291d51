//! File-backed partition
//!
//! Small values live inline in the metadata index; large values live in
//! slots of numbered data files and the index holds a redirect to them.

use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::error::{BlobError, Result};
use crate::index::{LogIndex, MetadataIndex};
use crate::storage::{DirStorage, FileRef, ManagerStats, Storage, StorageManager};

use super::placement::Placement;
use super::slot::{read_slot, write_slot, BufferPool, SLOT_PREFIX_SIZE};
use super::{KeyValuePartition, ValueRecord, INDEX_DIR, MAX_VALUE_SIZE};

/// Writers to keys hashing to the same stripe are serialized
const WRITE_STRIPES: usize = 64;

/// Pooled read buffers, and the largest one worth keeping
const BUFFER_POOL_SIZE: usize = 16;
const MAX_POOLED_BUFFER: usize = 1024 * 1024;

/// Partition storing large values in allocator-managed data files
///
/// ## Write protocol
/// - The metadata write is the commit point of every `put`
/// - A slot is freed only after no committed record points at it
/// - A slot allocated by a `put` whose metadata write fails is freed again
///
/// ## Placement rules
/// - Values shorter than `min_size` are always stored inline, even when they
///   would fit the slot the key already has; that slot is then freed
/// - Only values of at least `min_size` bytes are updated in place, and only
///   when they fit the slot's usable size
pub struct FilePartition {
    index: Arc<dyn MetadataIndex>,
    files: StorageManager,
    placement: Placement,
    min_size: usize,
    max_file_space: u64,
    stripes: Vec<Mutex<()>>,
    buffers: BufferPool,
}

impl FilePartition {
    /// Open or create the partition in `config.data_dir`
    pub fn open(config: &Config) -> Result<Self> {
        config.validate()?;
        let storage = DirStorage::open(&config.data_dir)?;
        let index = LogIndex::open(&config.data_dir.join(INDEX_DIR), config.index_sync)?;
        debug!(dir = %config.data_dir.display(), "opened file partition");
        Ok(Self::with_parts(Arc::new(index), Arc::new(storage), config))
    }

    /// Assemble a partition from an index and a backing store
    ///
    /// `config.data_dir` is not used.
    pub fn with_parts(
        index: Arc<dyn MetadataIndex>,
        storage: Arc<dyn Storage>,
        config: &Config,
    ) -> Self {
        Self {
            index,
            files: StorageManager::new(storage, config.max_open_files, config.max_file_size),
            placement: Placement::new(config.placement_probe_limit),
            min_size: config.min_size,
            max_file_space: config.max_file_space,
            stripes: (0..WRITE_STRIPES).map(|_| Mutex::new(())).collect(),
            buffers: BufferPool::new(BUFFER_POOL_SIZE, MAX_POOLED_BUFFER),
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Copy the value of `id` into `sink`
    pub fn get<W: Write + ?Sized>(&self, id: &[u8], sink: &mut W) -> Result<()> {
        let bytes = self.index.get(id)?.ok_or(BlobError::NotFound)?;
        match ValueRecord::decode(&bytes)? {
            ValueRecord::Inline(value) => {
                sink.write_all(&value)?;
                Ok(())
            }
            ValueRecord::Redirect { file, offset } => {
                let handle = self.files.open(file)?;
                read_slot(&handle, offset, sink, &self.buffers)
            }
        }
    }

    /// The value of `id` as a vector
    pub fn get_vec(&self, id: &[u8]) -> Result<Vec<u8>> {
        let mut value = Vec::new();
        self.get(id, &mut value)?;
        Ok(value)
    }

    /// Decoded metadata record of `id`
    pub fn record(&self, id: &[u8]) -> Result<Option<ValueRecord>> {
        self.index
            .get(id)?
            .map(|bytes| ValueRecord::decode(&bytes))
            .transpose()
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Store `value` under `id`; an empty value deletes the key
    pub fn put(&self, id: &[u8], value: &[u8]) -> Result<()> {
        if value.len() > MAX_VALUE_SIZE {
            return Err(BlobError::Storage(format!(
                "Value of {} bytes exceeds maximum {}",
                value.len(),
                MAX_VALUE_SIZE
            )));
        }

        let _guard = self.stripe(id).lock();

        let stored = self.index.get(id)?;
        let slot = match stored.as_deref().map(ValueRecord::decode) {
            Some(Ok(ValueRecord::Redirect { file, offset })) => Some((file, offset)),
            Some(Err(e)) => {
                warn!(error = %e, "overwriting malformed value record");
                None
            }
            _ => None,
        };

        match slot {
            Some((num, offset)) => self.update_redirect(id, value, num, offset),
            None if value.is_empty() => {
                if stored.is_some() {
                    self.index.delete(id)?;
                }
                Ok(())
            }
            None => self.store_new(id, value),
        }
    }

    /// Remove `id`, freeing its slot if it has one
    pub fn delete(&self, id: &[u8]) -> Result<()> {
        self.put(id, &[])
    }

    /// Overwrite, relocate or delete a value that currently has a slot
    fn update_redirect(&self, id: &[u8], value: &[u8], num: u64, offset: u64) -> Result<()> {
        let file = self.files.open(num)?;

        if value.is_empty() {
            self.index.delete(id)?;
            self.release(num, offset, &file);
            return Ok(());
        }

        if value.len() >= self.min_size {
            let usable = file.usable_size(offset)?;
            if usable >= (value.len() + SLOT_PREFIX_SIZE) as u64 {
                write_slot(&file, offset, value)?;
                trace!(file = num, offset, len = value.len(), "updated value in place");
                return Ok(());
            }
        }

        self.store_new(id, value)?;
        debug!(file = num, offset, len = value.len(), "relocated value");
        self.release(num, offset, &file);
        Ok(())
    }

    /// Commit `value` as a fresh inline record or a fresh slot
    fn store_new(&self, id: &[u8], value: &[u8]) -> Result<()> {
        if value.len() < self.min_size {
            let record = ValueRecord::Inline(value.to_vec()).encode()?;
            return self.index.put(id, &record);
        }

        let (num, offset) = self.insert(value)?;
        let committed = ValueRecord::Redirect { file: num, offset }
            .encode()
            .and_then(|record| self.index.put(id, &record));
        if let Err(e) = committed {
            self.discard(num, offset);
            return Err(e);
        }
        Ok(())
    }

    /// Write `value` into a newly allocated slot
    fn insert(&self, value: &[u8]) -> Result<(u64, u64)> {
        let (num, offset, file) = self
            .placement
            .find_free(&self.files, value.len() + SLOT_PREFIX_SIZE)?;

        if let Err(e) = write_slot(&file, offset, value) {
            self.release(num, offset, &file);
            return Err(e);
        }
        Ok((num, offset))
    }

    /// Free a slot no record points at; failures leak the slot
    fn release(&self, num: u64, offset: u64, file: &FileRef) {
        if let Err(e) = self.placement.release(num, offset, file) {
            warn!(file = num, offset, error = %e, "failed to free slot, space leaked");
        }
    }

    /// Undo an allocation whose record never got committed
    fn discard(&self, num: u64, offset: u64) {
        match self.files.open(num) {
            Ok(file) => self.release(num, offset, &file),
            Err(e) => {
                warn!(file = num, offset, error = %e, "cannot reopen file to undo allocation, space leaked")
            }
        }
    }

    fn stripe(&self, id: &[u8]) -> &Mutex<()> {
        &self.stripes[crc32fast::hash(id) as usize % WRITE_STRIPES]
    }

    // =========================================================================
    // Accounting
    // =========================================================================

    /// Estimate of the capacity left under `max_file_space`
    ///
    /// Advisory only: concurrent writers can use the space before a later
    /// `put` gets to it. Zero when no budget is configured.
    pub fn approx_free_space(&self) -> u64 {
        self.placement.estimate_free_space(
            self.files.storage().as_ref(),
            self.max_file_space,
            self.files.max_file_size(),
        )
    }

    /// Data files the free-space map knows about, lowest first
    pub fn known_files(&self) -> Vec<u64> {
        self.placement.known_files()
    }

    /// Last recorded free space of data file `num`
    pub fn known_free_space(&self, num: u64) -> Option<u64> {
        self.placement.known_free_space(num)
    }

    /// Lowest data file number placement has not visited
    pub fn watermark(&self) -> u64 {
        self.placement.watermark()
    }

    /// Open-file cache counters
    pub fn file_stats(&self) -> ManagerStats {
        self.files.stats()
    }

    /// The open-file cache
    pub fn storage_manager(&self) -> &StorageManager {
        &self.files
    }
}

impl KeyValuePartition for FilePartition {
    fn put(&self, id: &[u8], value: &[u8]) -> Result<()> {
        FilePartition::put(self, id, value)
    }

    fn get(&self, id: &[u8], sink: &mut dyn Write) -> Result<()> {
        FilePartition::get(self, id, sink)
    }

    fn approx_free_space(&self) -> u64 {
        FilePartition::approx_free_space(self)
    }
}
