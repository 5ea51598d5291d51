//! Tests for ValueRecord encoding
//!
//! These tests verify:
//! - Both record kinds decode back to themselves
//! - Encodings have a fixed framing (variant tag, then fields)
//! - Truncated, padded or unknown records are storage errors

use blobkv::{BlobError, ValueRecord};

#[test]
fn test_inline_and_redirect_decode() {
    let inline = ValueRecord::Inline(b"small value".to_vec());
    let redirect = ValueRecord::Redirect {
        file: 42,
        offset: 520,
    };

    assert_eq!(ValueRecord::decode(&inline.encode().unwrap()).unwrap(), inline);
    assert_eq!(
        ValueRecord::decode(&redirect.encode().unwrap()).unwrap(),
        redirect
    );
    assert!(inline.is_inline());
    assert!(redirect.is_redirect());
}

#[test]
fn test_redirect_encoding_is_fixed_width() {
    let bytes = ValueRecord::Redirect {
        file: 1,
        offset: 2,
    }
    .encode()
    .unwrap();

    // Variant (4) + file (8) + offset (8)
    assert_eq!(bytes.len(), 20);
    assert_eq!(&bytes[0..4], &1u32.to_le_bytes());
    assert_eq!(&bytes[4..12], &1u64.to_le_bytes());
    assert_eq!(&bytes[12..20], &2u64.to_le_bytes());
}

#[test]
fn test_inline_encoding_carries_length() {
    let bytes = ValueRecord::Inline(vec![9; 10]).encode().unwrap();

    // Variant (4) + length (8) + payload
    assert_eq!(bytes.len(), 4 + 8 + 10);
    assert_eq!(&bytes[0..4], &0u32.to_le_bytes());
    assert_eq!(&bytes[4..12], &10u64.to_le_bytes());
}

#[test]
fn test_truncated_record_is_storage_error() {
    let bytes = ValueRecord::Redirect {
        file: 1,
        offset: 2,
    }
    .encode()
    .unwrap();

    let result = ValueRecord::decode(&bytes[..bytes.len() - 1]);

    assert!(matches!(result, Err(BlobError::Storage(_))));
}

#[test]
fn test_trailing_bytes_are_storage_error() {
    let mut bytes = ValueRecord::Inline(b"abc".to_vec()).encode().unwrap();
    bytes.push(0);

    assert!(matches!(
        ValueRecord::decode(&bytes),
        Err(BlobError::Storage(_))
    ));
}

#[test]
fn test_unknown_variant_is_storage_error() {
    let mut bytes = vec![0u8; 20];
    bytes[0] = 7;

    assert!(matches!(
        ValueRecord::decode(&bytes),
        Err(BlobError::Storage(_))
    ));
    assert!(matches!(ValueRecord::decode(&[]), Err(BlobError::Storage(_))));
}

#[test]
fn test_inline_length_past_payload_is_storage_error() {
    let mut bytes = ValueRecord::Inline(vec![1; 4]).encode().unwrap();
    bytes[4..12].copy_from_slice(&1000u64.to_le_bytes());

    assert!(matches!(
        ValueRecord::decode(&bytes),
        Err(BlobError::Storage(_))
    ));
}
