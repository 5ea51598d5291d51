//! Configuration for blobkv
//!
//! Centralized configuration with sensible defaults.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{BlobError, Result};
use crate::partition::MAX_VALUE_SIZE;
use crate::storage::{HEADER_SIZE, MIN_CHUNK_SIZE};

/// Main configuration for one storage partition
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Partition directory
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── 000000.dat       (data files, numbered from zero)
    ///     ├── 000001.dat
    ///     └── index/           (metadata index log)
    pub data_dir: PathBuf,

    /// Which partition implementation `open_partition` builds
    pub backend: Backend,

    // -------------------------------------------------------------------------
    // Placement Configuration
    // -------------------------------------------------------------------------
    /// Values shorter than this are stored inline in the metadata index
    pub min_size: usize,

    /// Capacity of the open-file cache (effective minimum 4)
    pub max_open_files: usize,

    /// Logical size cap of a single data file (in bytes)
    pub max_file_size: u64,

    /// Capacity budget reported by free-space estimation (0 = unknown)
    pub max_file_space: u64,

    /// Watermark advances a single placement may make before giving up
    pub placement_probe_limit: usize,

    // -------------------------------------------------------------------------
    // Index Configuration
    // -------------------------------------------------------------------------
    /// How often the metadata index log is fsynced
    pub index_sync: SyncStrategy,
}

/// Metadata index sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N unsynced entries (balanced durability/performance)
    EveryNEntries { count: usize },
}

/// Partition backend selected by the loader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Small values inline, large values in data files
    File,

    /// Every value stored verbatim in the metadata index
    Index,
}

impl FromStr for Backend {
    type Err = BlobError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "file" => Ok(Backend::File),
            "index" => Ok(Backend::Index),
            other => Err(BlobError::Config(format!("No such backend: {}", other))),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::File => f.write_str("file"),
            Backend::Index => f.write_str("index"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./blobkv_data"),
            backend: Backend::File,
            min_size: 64,
            max_open_files: 100,
            max_file_size: 1 << 40, // 1 TiB
            max_file_space: 0,
            placement_probe_limit: 4096,
            index_sync: SyncStrategy::EveryWrite,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check that the numbers describe a usable partition
    pub fn validate(&self) -> Result<()> {
        if self.max_file_size < HEADER_SIZE + MIN_CHUNK_SIZE {
            return Err(BlobError::Config(format!(
                "max_file_size {} is smaller than one header plus one chunk ({})",
                self.max_file_size,
                HEADER_SIZE + MIN_CHUNK_SIZE
            )));
        }
        if self.min_size > MAX_VALUE_SIZE + 1 {
            return Err(BlobError::Config(format!(
                "min_size {} exceeds the maximum value size {}",
                self.min_size, MAX_VALUE_SIZE
            )));
        }
        if self.placement_probe_limit == 0 {
            return Err(BlobError::Config(
                "placement_probe_limit must be at least 1".to_string(),
            ));
        }
        if let SyncStrategy::EveryNEntries { count: 0 } = self.index_sync {
            return Err(BlobError::Config(
                "index sync count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the partition directory
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the partition backend
    pub fn backend(mut self, backend: Backend) -> Self {
        self.config.backend = backend;
        self
    }

    /// Set the inline/redirect threshold (in bytes)
    pub fn min_size(mut self, size: usize) -> Self {
        self.config.min_size = size;
        self
    }

    /// Set the open-file cache capacity
    pub fn max_open_files(mut self, count: usize) -> Self {
        self.config.max_open_files = count;
        self
    }

    /// Set the per-file logical size cap (in bytes)
    pub fn max_file_size(mut self, size: u64) -> Self {
        self.config.max_file_size = size;
        self
    }

    /// Set the capacity budget used by free-space estimation (in bytes)
    pub fn max_file_space(mut self, size: u64) -> Self {
        self.config.max_file_space = size;
        self
    }

    /// Set how many new files one placement may probe
    pub fn placement_probe_limit(mut self, limit: usize) -> Self {
        self.config.placement_probe_limit = limit;
        self
    }

    /// Set the metadata index sync strategy
    pub fn index_sync(mut self, strategy: SyncStrategy) -> Self {
        self.config.index_sync = strategy;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
