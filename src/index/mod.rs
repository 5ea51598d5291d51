//! Metadata Index Module
//!
//! Ordered byte-key → byte-value store holding one record per stored key.
//!
//! ## Responsibilities
//! - Point lookups, puts and deletes, durable once the call returns
//! - Append-only log with LSN + CRC32 framing for durability
//! - Crash recovery that drops a torn or corrupted tail
//! - Compaction of superseded history on open
//!
//! ## Log File Format
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ Entry 1                                 │
//! │ ┌─────────┬─────────┬────────┬────────┐ │
//! │ │ LSN (8) │ CRC (4) │Len (4) │ Data   │ │
//! │ └─────────┴─────────┴────────┴────────┘ │
//! ├─────────────────────────────────────────┤
//! │ Entry 2                                 │
//! │ ┌─────────┬─────────┬────────┬────────┐ │
//! │ │ LSN (8) │ CRC (4) │Len (4) │ Data   │ │
//! │ └─────────┴─────────┴────────┴────────┘ │
//! └─────────────────────────────────────────┘
//! ```
//! `Data` is the bincode encoding of an [`Operation`]; the CRC covers the
//! LSN, the length and the data.

mod entry;
mod log_index;
mod memory;
mod recovery;
mod writer;

use crate::error::Result;

pub use entry::{LogEntry, Operation, HEADER_SIZE, MAX_ENTRY_SIZE};
pub use log_index::LogIndex;
pub use memory::MemoryIndex;
pub use recovery::{LogRecovery, RecoveryResult};
pub use writer::{LogFile, LogWriter};

/// Ordered key-value store backing partition metadata
///
/// A successful `put` or `delete` is durable when it returns.
pub trait MetadataIndex: Send + Sync {
    /// Value stored under `key`, if any
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Remove `key`; removing an absent key succeeds
    fn delete(&self, key: &[u8]) -> Result<()>;
}
