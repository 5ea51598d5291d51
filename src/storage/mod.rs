//! Storage Module
//!
//! Flat data files, the byte-range allocator inside each of them, and the
//! bounded cache of open files.
//!
//! ## Responsibilities
//! - Open numbered data files on demand (`Storage`)
//! - Carve each file into reusable slots (`Allocator`)
//! - Keep at most `max_open_files` handles cached, LRU evicted (`StorageManager`)
//! - Close a file exactly once, when its last holder lets go (`FileRef`)
//!
//! ## Data File Format
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │ Allocator Header (512 bytes)                               │
//! │   Magic (8) | End (8) | Heads [u64; 17] | Counts [u64; 17] │
//! │   CRC32 (4) | zero padding                                 │
//! ├────────────────────────────────────────────────────────────┤
//! │ Chunk (2^k bytes, 9 <= k <= 25)                            │
//! │   ┌──────────┬──────────┬─────────────┬──────────────────┐ │
//! │   │ Tag (4)  │ Class(1) │ Reserved(3) │ Usable 2^k - 8   │ │
//! │   └──────────┴──────────┴─────────────┴──────────────────┘ │
//! │   ... chunks repeat up to the logical end ...              │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Offsets handed out by the allocator point at the usable region, never at
//! the chunk header. A free chunk keeps the next free-list link in its first
//! eight usable bytes.

mod alloc;
mod dir;
mod lru;
mod manager;
mod mem;

use std::io;

pub use alloc::{Allocator, CHUNK_HEADER_SIZE, HEADER_SIZE, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};
pub use dir::DirStorage;
pub use manager::{FileRef, ManagerStats, StorageManager};
pub use mem::{MemStorage, MemStorageStats};

/// One open data file with positioned I/O
///
/// Reads and writes at disjoint offsets may run concurrently from many
/// threads; implementors must not rely on a shared cursor.
pub trait BlobFile: Send + Sync {
    /// Fill `buf` from `offset`, failing with `UnexpectedEof` past the end
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()>;

    /// Write all of `buf` at `offset`, extending the file if needed
    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<()>;

    /// Current on-disk length
    fn len(&self) -> io::Result<u64>;

    /// Flush data to durable storage
    fn sync(&self) -> io::Result<()>;
}

/// Source of numbered data files
pub trait Storage: Send + Sync {
    /// Open file `num`, creating it on first use
    fn open(&self, num: u64) -> io::Result<Box<dyn BlobFile>>;

    /// Every existing data file as `(number, on-disk size)`
    fn list(&self) -> io::Result<Vec<(u64, u64)>>;
}
