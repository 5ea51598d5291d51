//! Storage Manager
//!
//! Caches open data files and coordinates their lifetimes.
//!
//! ## Responsibilities
//! - Hand out reference-counted handles to numbered data files
//! - Keep at most `max(max_open_files, 4)` files in the cache, LRU evicted
//! - Close a file exactly once, after its last holder releases it
//! - Enforce the per-file logical size cap on allocation

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::error::{BlobError, Result};

use super::lru::LruList;
use super::{Allocator, BlobFile, Storage};

/// The cache never holds fewer files than this, whatever the configuration
const MIN_OPEN_FILES: usize = 4;

/// Default per-file logical size cap (1 TiB)
const DEFAULT_MAX_FILE_SIZE: u64 = 1 << 40;

// =============================================================================
// File Entries
// =============================================================================

/// One open data file and its allocator
///
/// Lives exactly as long as some `FileRef` points at it. Dropping the last
/// reference closes the file.
struct FileEntry {
    num: u64,
    file: Box<dyn BlobFile>,
    alloc: Mutex<Allocator>,
    max_file_size: u64,
    counters: Arc<Counters>,
}

impl Drop for FileEntry {
    fn drop(&mut self) {
        self.counters.closes.fetch_add(1, Ordering::Relaxed);
        trace!(file = self.num, "closing data file");
    }
}

/// Shared handle to an open data file
///
/// Cloning takes a reference, dropping releases it. The cache holds one
/// reference of its own while the file is cached, so a file evicted while
/// still in use stays open until its last user drops the handle.
#[derive(Clone)]
pub struct FileRef {
    entry: Arc<FileEntry>,
}

impl FileRef {
    /// Data file number
    pub fn number(&self) -> u64 {
        self.entry.num
    }

    /// Outstanding references, the cache's own included
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.entry)
    }

    /// Release this reference
    pub fn release(self) {
        drop(self);
    }

    /// Allocate a slot with at least `size` usable bytes
    ///
    /// Grows the file only if the new chunk stays within the size cap.
    pub fn alloc(&self, size: usize) -> Result<u64> {
        let size = size as u64;
        let chunk = Allocator::chunk_size_for(size).ok_or(BlobError::InsertionFailed {
            size: size as usize,
        })?;

        let mut alloc = self.entry.alloc.lock();
        let room = self.entry.max_file_size.saturating_sub(alloc.file_size());
        alloc.alloc(self.entry.file.as_ref(), size, room < chunk)
    }

    /// Free the slot at `offset`
    pub fn free(&self, offset: u64) -> Result<()> {
        self.entry.alloc.lock().free(self.entry.file.as_ref(), offset)
    }

    /// Usable bytes of the slot at `offset`
    pub fn usable_size(&self, offset: u64) -> Result<u64> {
        self.entry
            .alloc
            .lock()
            .usable_size(self.entry.file.as_ref(), offset)
    }

    /// Free-list bytes plus the room left before the size cap
    pub fn approx_free_space(&self) -> u64 {
        let alloc = self.entry.alloc.lock();
        self.entry.max_file_size.saturating_sub(alloc.file_size()) + alloc.approx_free_space()
    }

    /// Cheap estimate of the space available to a request of `size` bytes
    ///
    /// Counts free chunks large enough for the request, plus the room before
    /// the size cap when a new chunk would fit there. Only a pre-filter: an
    /// allocation can still fail.
    pub fn approx_free_space_for(&self, size: usize) -> u64 {
        let chunk = match Allocator::chunk_size_for(size as u64) {
            Some(chunk) => chunk,
            None => return 0,
        };
        let alloc = self.entry.alloc.lock();
        let room = self.entry.max_file_size.saturating_sub(alloc.file_size());
        let growth = if room >= chunk { room } else { 0 };
        growth + alloc.approx_free_space_for(size as u64)
    }

    /// Logical file size as tracked by the allocator
    pub fn file_size(&self) -> u64 {
        self.entry.alloc.lock().file_size()
    }

    /// Fill `buf` from the absolute `offset`
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        self.entry.file.read_at(buf, offset)
    }

    /// Write `buf` at the absolute `offset`
    pub fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<()> {
        self.entry.file.write_at(buf, offset)
    }

    /// Flush the file to durable storage
    pub fn sync(&self) -> io::Result<()> {
        self.entry.file.sync()
    }
}

impl fmt::Debug for FileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileRef")
            .field("num", &self.entry.num)
            .field("refs", &self.ref_count())
            .finish()
    }
}

// =============================================================================
// Statistics
// =============================================================================

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    opens: AtomicU64,
    evictions: AtomicU64,
    closes: AtomicU64,
}

/// Snapshot of cache activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ManagerStats {
    /// `open` calls served from the cache
    pub hits: u64,
    /// `open` calls that missed the cache
    pub misses: u64,
    /// Files opened through the backing store
    pub opens: u64,
    /// Entries dropped from the cache by the capacity bound
    pub evictions: u64,
    /// Files closed after their last reference went away
    pub closes: u64,
    /// Entries currently cached
    pub cached: usize,
}

// =============================================================================
// Storage Manager
// =============================================================================

struct OpenFiles {
    lru: LruList<FileRef>,
    /// Evicted entries that were still in use at eviction time
    detached: HashMap<u64, Weak<FileEntry>>,
    /// Numbers some caller is opening outside the lock right now
    opening: HashSet<u64>,
}

/// Bounded cache of open data files
///
/// ## Concurrency:
/// - `files`: one Mutex over the map and LRU order, never held across file I/O
/// - References are atomic and released without touching the Mutex
/// - Files opened on a miss are opened outside the lock; other callers
///   missing on the same number wait on `opened` until that open settles,
///   so a file never gets two live allocators
pub struct StorageManager {
    storage: Arc<dyn Storage>,
    files: Mutex<OpenFiles>,
    opened: Condvar,
    max_open_files: usize,
    max_file_size: u64,
    counters: Arc<Counters>,
}

impl StorageManager {
    /// Create a manager over `storage`
    ///
    /// A `max_file_size` of zero selects the 1 TiB default.
    pub fn new(storage: Arc<dyn Storage>, max_open_files: usize, max_file_size: u64) -> Self {
        let max_file_size = if max_file_size == 0 {
            DEFAULT_MAX_FILE_SIZE
        } else {
            max_file_size
        };

        Self {
            storage,
            files: Mutex::new(OpenFiles {
                lru: LruList::new(),
                detached: HashMap::new(),
                opening: HashSet::new(),
            }),
            opened: Condvar::new(),
            max_open_files,
            max_file_size,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Get a handle to data file `num`, opening it on a cache miss
    ///
    /// Fails without touching the cache if the file or its allocator
    /// cannot be opened.
    pub fn open(&self, num: u64) -> Result<FileRef> {
        let mut missed = false;
        let mut files = self.files.lock();
        loop {
            if let Some(cached) = files.lru.touch(num) {
                let handle = cached.clone();
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(handle);
            }
            if !missed {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                missed = true;
            }

            if let Some(handle) = Self::take_detached(&mut files, num) {
                let evicted = self.insert_locked(&mut files, num, handle.clone());
                drop(files);
                drop(evicted);
                return Ok(handle);
            }

            if !files.opening.contains(&num) {
                break;
            }
            // An empty file gets its allocator header on first open, so a
            // second concurrent open could overwrite what the first one wrote
            self.opened.wait(&mut files);
        }
        files.opening.insert(num);
        drop(files);

        // Open outside the lock
        let opened = self.open_entry(num);

        let mut files = self.files.lock();
        files.opening.remove(&num);
        self.opened.notify_all();
        let fresh = opened?;

        let evicted = self.insert_locked(&mut files, num, fresh.clone());
        drop(files);
        drop(evicted);
        Ok(fresh)
    }

    /// Drop every cached entry; files still in use stay open until released
    pub fn evict_all(&self) {
        let evicted = {
            let mut files = self.files.lock();
            let mut evicted = Vec::with_capacity(files.lru.len());
            while let Some((num, handle)) = files.lru.pop_back() {
                if handle.ref_count() > 1 {
                    files.detached.insert(num, Arc::downgrade(&handle.entry));
                }
                evicted.push(handle);
            }
            files.detached.retain(|_, entry| entry.strong_count() > 0);
            evicted
        };
        self.counters
            .evictions
            .fetch_add(evicted.len() as u64, Ordering::Relaxed);
        drop(evicted);
    }

    /// Cached file numbers, most recently used first
    pub fn cached_files(&self) -> Vec<u64> {
        self.files.lock().lru.keys()
    }

    /// Current cache activity counters
    pub fn stats(&self) -> ManagerStats {
        let cached = self.files.lock().lru.len();
        ManagerStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            opens: self.counters.opens.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            closes: self.counters.closes.load(Ordering::Relaxed),
            cached,
        }
    }

    /// Per-file logical size cap
    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Effective cache capacity
    pub fn capacity(&self) -> usize {
        self.max_open_files.max(MIN_OPEN_FILES)
    }

    /// The backing store files are opened from
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Open data file `num` and load its allocator
    fn open_entry(&self, num: u64) -> Result<FileRef> {
        let file = self.storage.open(num)?;
        let alloc = Allocator::open(file.as_ref())?;
        self.counters.opens.fetch_add(1, Ordering::Relaxed);
        debug!(file = num, size = alloc.file_size(), "opened data file");

        Ok(FileRef {
            entry: Arc::new(FileEntry {
                num,
                file,
                alloc: Mutex::new(alloc),
                max_file_size: self.max_file_size,
                counters: Arc::clone(&self.counters),
            }),
        })
    }

    /// Revive an evicted entry that is still held somewhere
    fn take_detached(files: &mut OpenFiles, num: u64) -> Option<FileRef> {
        let entry = files.detached.remove(&num)?.upgrade()?;
        debug!(file = num, "reattaching evicted data file");
        Some(FileRef { entry })
    }

    /// Insert at the front and evict down to capacity
    ///
    /// Returns the evicted handles so the caller can drop them, and with
    /// them possibly close files, after releasing the lock.
    fn insert_locked(&self, files: &mut OpenFiles, num: u64, handle: FileRef) -> Vec<FileRef> {
        files.lru.push_front(num, handle);

        let mut evicted = Vec::new();
        while files.lru.len() > self.capacity() {
            let Some((old, handle)) = files.lru.pop_back() else {
                break;
            };
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(file = old, refs = handle.ref_count(), "evicting data file");
            if handle.ref_count() > 1 {
                files.detached.insert(old, Arc::downgrade(&handle.entry));
            }
            evicted.push(handle);
        }

        if !evicted.is_empty() {
            // Entries only evicted handles keep alive die with them
            files.detached.retain(|_, entry| entry.strong_count() > 0);
        }
        evicted
    }
}
