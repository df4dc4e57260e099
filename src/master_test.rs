// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Tests for master page encode/decode.

use super::*;

#[test]
fn test_empty_master_page_roundtrip() {
    let page = MasterPage::empty();
    let encoded = page.encode();
    let decoded = MasterPage::decode(&encoded, PAGE_SIZE as u64).unwrap();
    assert_eq!(decoded, page);
}

#[test]
fn test_nonempty_master_page_roundtrip() {
    let page = MasterPage {
        root: 3,
        flushed: 10,
        free_head: 7,
    };
    let encoded = page.encode();
    let decoded = MasterPage::decode(&encoded, 10 * PAGE_SIZE as u64).unwrap();
    assert_eq!(decoded, page);
}

#[test]
fn test_bad_signature_rejected() {
    let mut encoded = MasterPage::empty().encode();
    encoded[0] = b'X';
    assert!(MasterPage::decode(&encoded, PAGE_SIZE as u64).is_err());
}

#[test]
fn test_flushed_beyond_file_size_rejected() {
    let page = MasterPage {
        root: 0,
        flushed: 100,
        free_head: 0,
    };
    let encoded = page.encode();
    assert!(MasterPage::decode(&encoded, 5 * PAGE_SIZE as u64).is_err());
}

#[test]
fn test_root_not_less_than_flushed_rejected() {
    let page = MasterPage {
        root: 10,
        flushed: 10,
        free_head: 0,
    };
    let encoded = page.encode();
    assert!(MasterPage::decode(&encoded, 10 * PAGE_SIZE as u64).is_err());
}

#[test]
fn test_free_head_not_less_than_flushed_rejected() {
    let page = MasterPage {
        root: 1,
        flushed: 5,
        free_head: 5,
    };
    let encoded = page.encode();
    assert!(MasterPage::decode(&encoded, 5 * PAGE_SIZE as u64).is_err());
}

#[test]
fn test_truncated_data_rejected() {
    let encoded = [0u8; 10];
    assert!(MasterPage::decode(&encoded, PAGE_SIZE as u64).is_err());
}
