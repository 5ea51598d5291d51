//! # blobkv
//!
//! A partitioned key-value storage node with:
//! - Small values inlined into a durable metadata index
//! - Large values in allocator-managed, size-bounded flat files
//! - A bounded cache of reference-counted open file handles
//! - Advisory free-space accounting across data files
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       FilePartition                          │
//! │          (put / get / approx_free_space, per-key stripes)    │
//! └──────────────┬───────────────────────────────┬──────────────┘
//!                │                               │
//!                ▼                               ▼
//!        ┌───────────────┐              ┌─────────────────┐
//!        │ MetadataIndex │              │    Placement    │
//!        │  (LogIndex)   │              │ (free-space map)│
//!        └───────────────┘              └────────┬────────┘
//!                                                │
//!                                                ▼
//!                                       ┌─────────────────┐
//!                                       │ StorageManager  │
//!                                       │  (LRU, FileRef) │
//!                                       └────────┬────────┘
//!                                                │
//!                                                ▼
//!                                       ┌─────────────────┐
//!                                       │ Storage + Alloc │
//!                                       │  (NNNNNN.dat)   │
//!                                       └─────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod storage;
pub mod index;
pub mod partition;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{BlobError, Result};
pub use config::{Backend, Config, SyncStrategy};
pub use partition::{
    open_partition, FilePartition, KeyValuePartition, SimplePartition, ValueRecord,
    MAX_VALUE_SIZE,
};
pub use storage::{DirStorage, FileRef, MemStorage, StorageManager};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of blobkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
