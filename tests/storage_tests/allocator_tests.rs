//! Tests for the byte-range Allocator
//!
//! These tests verify:
//! - Header initialization on an empty file
//! - Size classes, growth, reuse and splitting of free chunks
//! - Double-free and out-of-range detection
//! - Persistence of allocator state across reopen
//! - Rejection of corrupted headers
//! - Failed header writes leave allocator state unchanged

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use blobkv::storage::{
    Allocator, BlobFile, MemStorage, Storage, CHUNK_HEADER_SIZE, HEADER_SIZE, MAX_CHUNK_SIZE,
    MIN_CHUNK_SIZE,
};
use blobkv::BlobError;

// =============================================================================
// Helper Functions
// =============================================================================

fn new_file() -> (MemStorage, Box<dyn BlobFile>) {
    let storage = MemStorage::new();
    let file = storage.open(0).unwrap();
    (storage, file)
}

/// File whose allocator header can be made unwritable
struct HeaderFailFile {
    inner: Box<dyn BlobFile>,
    fail_header: AtomicBool,
}

impl HeaderFailFile {
    fn new(inner: Box<dyn BlobFile>) -> Self {
        Self {
            inner,
            fail_header: AtomicBool::new(false),
        }
    }

    fn set_fail_header(&self, fail: bool) {
        self.fail_header.store(fail, Ordering::SeqCst);
    }
}

impl BlobFile for HeaderFailFile {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        self.inner.read_at(buf, offset)
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<()> {
        if offset == 0 && self.fail_header.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "header write refused"));
        }
        self.inner.write_at(buf, offset)
    }

    fn len(&self) -> io::Result<u64> {
        self.inner.len()
    }

    fn sync(&self) -> io::Result<()> {
        self.inner.sync()
    }
}

// =============================================================================
// Initialization Tests
// =============================================================================

#[test]
fn test_open_empty_file_writes_header() {
    let (_storage, file) = new_file();

    let alloc = Allocator::open(file.as_ref()).unwrap();

    assert_eq!(alloc.file_size(), HEADER_SIZE);
    assert_eq!(alloc.approx_free_space(), 0);
    assert!(file.len().unwrap() > 0);
}

#[test]
fn test_chunk_size_for_boundaries() {
    assert_eq!(Allocator::chunk_size_for(0), Some(MIN_CHUNK_SIZE));
    assert_eq!(
        Allocator::chunk_size_for(MIN_CHUNK_SIZE - CHUNK_HEADER_SIZE),
        Some(MIN_CHUNK_SIZE)
    );
    assert_eq!(
        Allocator::chunk_size_for(MIN_CHUNK_SIZE - CHUNK_HEADER_SIZE + 1),
        Some(2 * MIN_CHUNK_SIZE)
    );
    assert_eq!(
        Allocator::chunk_size_for(MAX_CHUNK_SIZE - CHUNK_HEADER_SIZE),
        Some(MAX_CHUNK_SIZE)
    );
    assert_eq!(
        Allocator::chunk_size_for(MAX_CHUNK_SIZE - CHUNK_HEADER_SIZE + 1),
        None
    );
}

// =============================================================================
// Alloc/Free Tests
// =============================================================================

#[test]
fn test_alloc_grows_file() {
    let (_storage, file) = new_file();
    let mut alloc = Allocator::open(file.as_ref()).unwrap();

    let first = alloc.alloc(file.as_ref(), 100, false).unwrap();
    let second = alloc.alloc(file.as_ref(), 100, false).unwrap();

    assert_eq!(first, HEADER_SIZE + CHUNK_HEADER_SIZE);
    assert_eq!(second, first + MIN_CHUNK_SIZE);
    assert_eq!(alloc.file_size(), HEADER_SIZE + 2 * MIN_CHUNK_SIZE);
}

#[test]
fn test_usable_size_is_chunk_minus_header() {
    let (_storage, file) = new_file();
    let mut alloc = Allocator::open(file.as_ref()).unwrap();

    let small = alloc.alloc(file.as_ref(), 10, false).unwrap();
    let large = alloc.alloc(file.as_ref(), 1000, false).unwrap();

    assert_eq!(
        alloc.usable_size(file.as_ref(), small).unwrap(),
        MIN_CHUNK_SIZE - CHUNK_HEADER_SIZE
    );
    assert_eq!(alloc.usable_size(file.as_ref(), large).unwrap(), 1024 - 8);
}

#[test]
fn test_free_then_alloc_reuses_chunk() {
    let (_storage, file) = new_file();
    let mut alloc = Allocator::open(file.as_ref()).unwrap();

    let offset = alloc.alloc(file.as_ref(), 100, false).unwrap();
    alloc.free(file.as_ref(), offset).unwrap();
    assert_eq!(alloc.approx_free_space(), MIN_CHUNK_SIZE);

    let again = alloc.alloc(file.as_ref(), 200, false).unwrap();

    assert_eq!(again, offset);
    assert_eq!(alloc.approx_free_space(), 0);
    assert_eq!(alloc.file_size(), HEADER_SIZE + MIN_CHUNK_SIZE);
}

#[test]
fn test_larger_free_chunk_is_split() {
    let (_storage, file) = new_file();
    let mut alloc = Allocator::open(file.as_ref()).unwrap();

    let big = alloc.alloc(file.as_ref(), 1000, false).unwrap();
    alloc.free(file.as_ref(), big).unwrap();

    let first = alloc.alloc(file.as_ref(), 100, false).unwrap();
    assert_eq!(first, big);
    assert_eq!(alloc.approx_free_space(), MIN_CHUNK_SIZE);

    let second = alloc.alloc(file.as_ref(), 100, false).unwrap();
    assert_eq!(second, big + MIN_CHUNK_SIZE);
    assert_eq!(alloc.approx_free_space(), 0);
    assert_eq!(alloc.file_size(), HEADER_SIZE + 2 * MIN_CHUNK_SIZE);
}

#[test]
fn test_approx_free_space_for_counts_fitting_classes() {
    let (_storage, file) = new_file();
    let mut alloc = Allocator::open(file.as_ref()).unwrap();

    let offset = alloc.alloc(file.as_ref(), 100, false).unwrap();
    alloc.free(file.as_ref(), offset).unwrap();

    assert_eq!(alloc.approx_free_space_for(100), MIN_CHUNK_SIZE);
    assert_eq!(alloc.approx_free_space_for(1000), 0);
}

#[test]
fn test_no_grow_fails_without_free_chunks() {
    let (_storage, file) = new_file();
    let mut alloc = Allocator::open(file.as_ref()).unwrap();

    let result = alloc.alloc(file.as_ref(), 100, true);

    assert!(matches!(result, Err(BlobError::InsertionFailed { size: 100 })));
    assert_eq!(alloc.file_size(), HEADER_SIZE);
}

#[test]
fn test_no_grow_still_uses_free_chunks() {
    let (_storage, file) = new_file();
    let mut alloc = Allocator::open(file.as_ref()).unwrap();

    let offset = alloc.alloc(file.as_ref(), 100, false).unwrap();
    alloc.free(file.as_ref(), offset).unwrap();

    assert_eq!(alloc.alloc(file.as_ref(), 100, true).unwrap(), offset);
}

#[test]
fn test_oversized_request_fails() {
    let (_storage, file) = new_file();
    let mut alloc = Allocator::open(file.as_ref()).unwrap();

    let result = alloc.alloc(file.as_ref(), MAX_CHUNK_SIZE, false);

    assert!(matches!(result, Err(BlobError::InsertionFailed { .. })));
}

#[test]
fn test_double_free_detected() {
    let (_storage, file) = new_file();
    let mut alloc = Allocator::open(file.as_ref()).unwrap();

    let offset = alloc.alloc(file.as_ref(), 100, false).unwrap();
    alloc.free(file.as_ref(), offset).unwrap();

    let result = alloc.free(file.as_ref(), offset);

    assert!(matches!(result, Err(BlobError::Storage(_))));
    assert_eq!(alloc.approx_free_space(), MIN_CHUNK_SIZE);
}

#[test]
fn test_free_out_of_range_detected() {
    let (_storage, file) = new_file();
    let mut alloc = Allocator::open(file.as_ref()).unwrap();
    alloc.alloc(file.as_ref(), 100, false).unwrap();

    assert!(matches!(
        alloc.free(file.as_ref(), 100),
        Err(BlobError::Storage(_))
    ));
    assert!(matches!(
        alloc.free(file.as_ref(), alloc.file_size() + 8),
        Err(BlobError::Storage(_))
    ));
}

// =============================================================================
// Persistence Tests
// =============================================================================

#[test]
fn test_reopen_restores_state() {
    let (_storage, file) = new_file();
    let mut alloc = Allocator::open(file.as_ref()).unwrap();

    let a = alloc.alloc(file.as_ref(), 100, false).unwrap();
    let _b = alloc.alloc(file.as_ref(), 3000, false).unwrap();
    let c = alloc.alloc(file.as_ref(), 100, false).unwrap();
    alloc.free(file.as_ref(), a).unwrap();
    alloc.free(file.as_ref(), c).unwrap();

    let reopened = Allocator::open(file.as_ref()).unwrap();

    assert_eq!(reopened, alloc);
    assert_eq!(reopened.approx_free_space(), 2 * MIN_CHUNK_SIZE);
}

#[test]
fn test_reopen_through_new_handle() {
    let storage = MemStorage::new();
    let offset = {
        let file = storage.open(7).unwrap();
        let mut alloc = Allocator::open(file.as_ref()).unwrap();
        alloc.alloc(file.as_ref(), 700, false).unwrap()
    };

    let file = storage.open(7).unwrap();
    let alloc = Allocator::open(file.as_ref()).unwrap();

    assert_eq!(alloc.usable_size(file.as_ref(), offset).unwrap(), 1024 - 8);
}

// =============================================================================
// Write Failure Tests
// =============================================================================

#[test]
fn test_failed_grow_leaves_state_unchanged() {
    let (_storage, inner) = new_file();
    let file = HeaderFailFile::new(inner);
    let mut alloc = Allocator::open(&file).unwrap();

    file.set_fail_header(true);
    assert!(matches!(alloc.alloc(&file, 100, false), Err(BlobError::Io(_))));
    assert_eq!(alloc.file_size(), HEADER_SIZE);

    file.set_fail_header(false);
    assert_eq!(
        alloc.alloc(&file, 100, false).unwrap(),
        HEADER_SIZE + CHUNK_HEADER_SIZE
    );
    assert_eq!(Allocator::open(&file).unwrap(), alloc);
}

#[test]
fn test_failed_split_keeps_free_chunk() {
    let (_storage, inner) = new_file();
    let file = HeaderFailFile::new(inner);
    let mut alloc = Allocator::open(&file).unwrap();

    let big = alloc.alloc(&file, 2 * MIN_CHUNK_SIZE - CHUNK_HEADER_SIZE, false).unwrap();
    alloc.free(&file, big).unwrap();
    let before = alloc.clone();

    file.set_fail_header(true);
    assert!(alloc.alloc(&file, 100, false).is_err());
    assert_eq!(alloc, before);
    assert_eq!(alloc.approx_free_space(), 2 * MIN_CHUNK_SIZE);

    file.set_fail_header(false);
    assert_eq!(alloc.alloc(&file, 100, false).unwrap(), big);
    assert_eq!(alloc.approx_free_space(), MIN_CHUNK_SIZE);
    assert_eq!(Allocator::open(&file).unwrap(), alloc);
}

#[test]
fn test_failed_free_keeps_chunk_allocated() {
    let (_storage, inner) = new_file();
    let file = HeaderFailFile::new(inner);
    let mut alloc = Allocator::open(&file).unwrap();
    let offset = alloc.alloc(&file, 100, false).unwrap();

    file.set_fail_header(true);
    assert!(alloc.free(&file, offset).is_err());
    assert_eq!(alloc.approx_free_space(), 0);
    assert_eq!(alloc.usable_size(&file, offset).unwrap(), MIN_CHUNK_SIZE - CHUNK_HEADER_SIZE);

    file.set_fail_header(false);
    alloc.free(&file, offset).unwrap();
    assert_eq!(alloc.approx_free_space(), MIN_CHUNK_SIZE);
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_bad_magic_rejected() {
    let (_storage, file) = new_file();
    Allocator::open(file.as_ref()).unwrap();
    file.write_at(b"NOTMAGIC", 0).unwrap();

    let result = Allocator::open(file.as_ref());

    assert!(matches!(result, Err(BlobError::Storage(_))));
}

#[test]
fn test_header_crc_mismatch_rejected() {
    let (_storage, file) = new_file();
    let mut alloc = Allocator::open(file.as_ref()).unwrap();
    alloc.alloc(file.as_ref(), 100, false).unwrap();

    // Flip a bit of the logical end
    let mut end = [0u8; 1];
    file.read_at(&mut end, 8).unwrap();
    file.write_at(&[end[0] ^ 0x01], 8).unwrap();

    let result = Allocator::open(file.as_ref());

    assert!(matches!(result, Err(BlobError::Storage(_))));
}

#[test]
fn test_truncated_header_rejected() {
    let (_storage, file) = new_file();
    file.write_at(b"BLKV", 0).unwrap();

    let result = Allocator::open(file.as_ref());

    assert!(matches!(result, Err(BlobError::Storage(_))));
}
