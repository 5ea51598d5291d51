//! Tests for StorageManager
//!
//! These tests verify:
//! - Cache hits, misses and the capacity floor
//! - LRU eviction order and re-opening of evicted files
//! - Handles held across eviction stay valid and get reattached
//! - Files are closed exactly once, under concurrent use as well
//! - Failed opens leave the cache untouched
//! - Concurrent first opens of a new file initialize it once
//! - Allocation never grows a file past the size cap

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use blobkv::storage::{
    BlobFile, MemStorage, Storage, StorageManager, HEADER_SIZE, MIN_CHUNK_SIZE,
};
use blobkv::{BlobError, DirStorage};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_manager(max_open_files: usize) -> (Arc<MemStorage>, StorageManager) {
    let storage = Arc::new(MemStorage::new());
    let manager = StorageManager::new(storage.clone(), max_open_files, 0);
    (storage, manager)
}

/// Storage whose first `len()` call parks after reading the length
///
/// The parked caller waits on `reached`, then on `resume`.
struct GatedStorage {
    inner: MemStorage,
    gate: Arc<Gate>,
}

struct Gate {
    armed: AtomicBool,
    reached: Barrier,
    resume: Barrier,
}

struct GatedFile {
    inner: Box<dyn BlobFile>,
    gate: Arc<Gate>,
}

impl GatedStorage {
    fn new() -> Self {
        Self {
            inner: MemStorage::new(),
            gate: Arc::new(Gate {
                armed: AtomicBool::new(true),
                reached: Barrier::new(2),
                resume: Barrier::new(2),
            }),
        }
    }
}

impl Storage for GatedStorage {
    fn open(&self, num: u64) -> io::Result<Box<dyn BlobFile>> {
        Ok(Box::new(GatedFile {
            inner: self.inner.open(num)?,
            gate: Arc::clone(&self.gate),
        }))
    }

    fn list(&self) -> io::Result<Vec<(u64, u64)>> {
        self.inner.list()
    }
}

impl BlobFile for GatedFile {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        self.inner.read_at(buf, offset)
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<()> {
        self.inner.write_at(buf, offset)
    }

    fn len(&self) -> io::Result<u64> {
        let len = self.inner.len()?;
        if self.gate.armed.swap(false, Ordering::SeqCst) {
            self.gate.reached.wait();
            self.gate.resume.wait();
        }
        Ok(len)
    }

    fn sync(&self) -> io::Result<()> {
        self.inner.sync()
    }
}

/// Open each number once and immediately release it
fn touch_all(manager: &StorageManager, nums: impl IntoIterator<Item = u64>) {
    for num in nums {
        manager.open(num).unwrap().release();
    }
}

// =============================================================================
// Cache Tests
// =============================================================================

#[test]
fn test_open_then_hit() {
    let (storage, manager) = setup_manager(4);

    let first = manager.open(1).unwrap();
    let second = manager.open(1).unwrap();

    let stats = manager.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.opens, 1);
    assert_eq!(storage.stats().opens, 1);

    // Two callers plus the cache
    assert_eq!(first.ref_count(), 3);
    assert_eq!(second.number(), 1);
}

#[test]
fn test_capacity_floor() {
    let (_storage, manager) = setup_manager(1);
    assert_eq!(manager.capacity(), 4);

    touch_all(&manager, 0..4);

    assert_eq!(manager.stats().evictions, 0);
    assert_eq!(manager.cached_files().len(), 4);
}

#[test]
fn test_clone_and_release_track_references() {
    let (_storage, manager) = setup_manager(4);

    let handle = manager.open(3).unwrap();
    assert_eq!(handle.ref_count(), 2);

    let copy = handle.clone();
    assert_eq!(handle.ref_count(), 3);

    copy.release();
    assert_eq!(handle.ref_count(), 2);
}

// =============================================================================
// Eviction Tests
// =============================================================================

#[test]
fn test_lru_evicts_least_recent() {
    let (storage, manager) = setup_manager(4);
    touch_all(&manager, 0..4);

    manager.open(4).unwrap().release();

    let stats = manager.stats();
    assert_eq!(stats.evictions, 1);
    assert_eq!(stats.closes, 1);
    assert_eq!(manager.cached_files(), vec![4, 3, 2, 1]);
    assert_eq!(storage.stats().live(), 4);
}

#[test]
fn test_touch_protects_from_eviction() {
    let (_storage, manager) = setup_manager(4);
    touch_all(&manager, 0..4);

    // 0 becomes most recent; 1 is now the eviction victim
    manager.open(0).unwrap().release();
    manager.open(4).unwrap().release();

    let cached = manager.cached_files();
    assert_eq!(cached, vec![4, 0, 3, 2]);
}

#[test]
fn test_evicted_file_reopens_on_miss() {
    let (storage, manager) = setup_manager(4);
    touch_all(&manager, 0..5);
    let misses = manager.stats().misses;

    manager.open(0).unwrap().release();

    let stats = manager.stats();
    assert_eq!(stats.misses, misses + 1);
    assert_eq!(stats.opens, 6);
    assert_eq!(storage.stats().opens, 6);
}

#[test]
fn test_evicted_file_keeps_contents() {
    let (_storage, manager) = setup_manager(4);

    let offset = {
        let handle = manager.open(0).unwrap();
        let offset = handle.alloc(5).unwrap();
        handle.write_at(b"hello", offset).unwrap();
        offset
    };
    touch_all(&manager, 1..5);
    assert!(!manager.cached_files().contains(&0));

    let handle = manager.open(0).unwrap();
    let mut buf = [0u8; 5];
    handle.read_at(&mut buf, offset).unwrap();

    assert_eq!(&buf, b"hello");
    assert_eq!(handle.usable_size(offset).unwrap(), MIN_CHUNK_SIZE - 8);
}

// =============================================================================
// Held Handle Tests
// =============================================================================

#[test]
fn test_held_handle_survives_eviction() {
    let (storage, manager) = setup_manager(4);

    let held = manager.open(0).unwrap();
    touch_all(&manager, 1..5);

    assert!(!manager.cached_files().contains(&0));
    assert_eq!(held.ref_count(), 1);
    assert_eq!(storage.stats().live(), 5);

    let offset = held.alloc(3).unwrap();
    held.write_at(b"abc", offset).unwrap();
    let mut buf = [0u8; 3];
    held.read_at(&mut buf, offset).unwrap();
    assert_eq!(&buf, b"abc");

    held.release();
    assert_eq!(storage.stats().live(), 4);
    assert_eq!(manager.stats().closes, 1);
}

#[test]
fn test_held_handle_is_reattached() {
    let (storage, manager) = setup_manager(4);

    let held = manager.open(0).unwrap();
    touch_all(&manager, 1..5);
    let opens = manager.stats().opens;

    let again = manager.open(0).unwrap();

    // Same entry: no second backing open, no second allocator
    assert_eq!(manager.stats().opens, opens);
    assert_eq!(storage.stats().opens, opens);
    assert_eq!(held.ref_count(), 3);
    assert_eq!(again.ref_count(), 3);
    assert_eq!(manager.cached_files()[0], 0);

    let offset = held.alloc(10).unwrap();
    assert_eq!(again.usable_size(offset).unwrap(), MIN_CHUNK_SIZE - 8);
}

#[test]
fn test_evict_all_keeps_held_files_open() {
    let (storage, manager) = setup_manager(4);
    let held = manager.open(2).unwrap();
    touch_all(&manager, [0, 1, 3]);

    manager.evict_all();

    assert!(manager.cached_files().is_empty());
    assert_eq!(storage.stats().live(), 1);
    assert_eq!(held.ref_count(), 1);

    drop(held);
    assert_eq!(storage.stats().live(), 0);
    assert_eq!(manager.stats().closes, 4);
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_open_release_closes_once() {
    let storage = Arc::new(MemStorage::new());
    let manager = Arc::new(StorageManager::new(storage.clone(), 4, 0));

    // Initialize every file up front so threads only reopen
    touch_all(&manager, 0..8);

    let mut handles = Vec::new();
    for t in 0..8u64 {
        let manager = Arc::clone(&manager);
        handles.push(thread::spawn(move || {
            for i in 0..200u64 {
                let num = (t + i) % 8;
                let file = manager.open(num).unwrap();
                let copy = file.clone();
                let offset = HEADER_SIZE + 4096 + t * 8;
                copy.write_at(&i.to_le_bytes(), offset).unwrap();
                let mut buf = [0u8; 8];
                file.read_at(&mut buf, offset).unwrap();
                assert_eq!(u64::from_le_bytes(buf), i);
                drop(copy);
                file.release();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    manager.evict_all();

    let stats = manager.stats();
    let backing = storage.stats();
    assert_eq!(backing.live(), 0);
    assert_eq!(stats.opens, backing.opens);
    assert_eq!(stats.closes, backing.closes);
}

#[test]
fn test_concurrent_first_open_initializes_once() {
    let storage = Arc::new(GatedStorage::new());
    let gate = Arc::clone(&storage.gate);
    let manager = Arc::new(StorageManager::new(storage, 4, 0));

    // First opener reads length 0, then parks before writing a header
    let first = {
        let manager = Arc::clone(&manager);
        thread::spawn(move || manager.open(0).unwrap().release())
    };
    gate.reached.wait();

    let second = {
        let manager = Arc::clone(&manager);
        thread::spawn(move || {
            let file = manager.open(0).unwrap();
            let offset = file.alloc(100).unwrap();
            file.write_at(b"live", offset).unwrap();
            offset
        })
    };
    thread::sleep(Duration::from_millis(50));
    gate.resume.wait();

    let live = second.join().unwrap();
    first.join().unwrap();
    assert_eq!(manager.stats().opens, 1);

    // Reload the allocator from disk
    manager.evict_all();
    let file = manager.open(0).unwrap();
    let next = file.alloc(100).unwrap();

    assert_ne!(next, live);
    assert_eq!(file.usable_size(live).unwrap(), MIN_CHUNK_SIZE - 8);
    let mut buf = [0u8; 4];
    file.read_at(&mut buf, live).unwrap();
    assert_eq!(&buf, b"live");
}

// =============================================================================
// Failure Tests
// =============================================================================

#[test]
fn test_failed_open_leaves_cache_unchanged() {
    let (storage, manager) = setup_manager(4);
    touch_all(&manager, [0, 1]);
    let before = manager.cached_files();

    storage.set_fail_opens(true);
    let result = manager.open(2);

    assert!(matches!(result, Err(BlobError::Io(_))));
    assert_eq!(manager.cached_files(), before);
    assert_eq!(manager.stats().evictions, 0);

    // Cached files stay reachable
    manager.open(0).unwrap().release();
    storage.set_fail_opens(false);
    manager.open(2).unwrap().release();
    assert_eq!(manager.cached_files(), vec![2, 0, 1]);
}

#[test]
fn test_corrupt_allocator_fails_open() {
    let (storage, manager) = setup_manager(4);
    storage
        .open(5)
        .unwrap()
        .write_at(&[0xAB; 600], 0)
        .unwrap();

    let result = manager.open(5);

    assert!(matches!(result, Err(BlobError::Storage(_))));
    assert!(manager.cached_files().is_empty());
}

// =============================================================================
// Size Cap Tests
// =============================================================================

#[test]
fn test_alloc_respects_max_file_size() {
    let storage = Arc::new(MemStorage::new());
    let manager = StorageManager::new(storage, 4, HEADER_SIZE + 2 * MIN_CHUNK_SIZE);
    let file = manager.open(0).unwrap();

    let a = file.alloc(100).unwrap();
    file.alloc(100).unwrap();
    let result = file.alloc(100);

    assert!(matches!(result, Err(BlobError::InsertionFailed { .. })));
    assert_eq!(file.file_size(), HEADER_SIZE + 2 * MIN_CHUNK_SIZE);
    assert_eq!(file.approx_free_space(), 0);

    file.free(a).unwrap();
    assert_eq!(file.approx_free_space(), MIN_CHUNK_SIZE);
    assert_eq!(file.alloc(100).unwrap(), a);
}

#[test]
fn test_approx_free_space_counts_room_before_cap() {
    let storage = Arc::new(MemStorage::new());
    let manager = StorageManager::new(storage, 4, 1 << 20);
    let file = manager.open(0).unwrap();

    assert_eq!(file.approx_free_space(), (1 << 20) - HEADER_SIZE);
    assert_eq!(file.approx_free_space_for(100), (1 << 20) - HEADER_SIZE);
}

#[test]
fn test_default_max_file_size() {
    let (_storage, manager) = setup_manager(4);
    assert_eq!(manager.max_file_size(), 1 << 40);
}

// =============================================================================
// Directory Storage Tests
// =============================================================================

#[test]
fn test_dir_storage_names_and_lists_files() {
    let temp_dir = TempDir::new().unwrap();
    let storage = Arc::new(DirStorage::open(temp_dir.path()).unwrap());
    let manager = StorageManager::new(storage.clone(), 4, 0);

    let file = manager.open(3).unwrap();
    let offset = file.alloc(4).unwrap();
    file.write_at(b"data", offset).unwrap();
    file.sync().unwrap();

    assert!(temp_dir.path().join("000003.dat").exists());
    let listed = storage.list().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].0, 3);
    assert_eq!(listed[0].1, offset + 4);
}
