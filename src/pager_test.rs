// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Tests for the pager, backed by real temp files.

use std::io::Write;
use std::os::unix::fs::FileExt;

use tempfile::tempdir;

use super::*;
use crate::page::{KIND_LEAF, PAGE_SIZE};

fn leaf_page(key: &[u8], val: &[u8]) -> Node {
    let mut node = Node::scratch(PAGE_SIZE);
    node.set_header(KIND_LEAF, 2);
    node.append_kv(0, 0, &[], &[]);
    node.append_kv(1, 0, key, val);
    node
}

#[test]
fn test_open_fresh_file_has_empty_root_and_free_list() {
    let dir = tempdir().unwrap();
    let pager = Pager::open(dir.path().join("db"), EngineOptions::default()).unwrap();
    assert_eq!(pager.loaded_root(), 0);
    assert_eq!(pager.free_list().head, 0);
}

#[test]
fn test_alloc_and_commit_persists_root_across_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");

    let mut pager = Pager::open(&path, EngineOptions::default()).unwrap();
    let ptr = PageStore::new(&mut pager, leaf_page(b"k", b"v"));
    pager.commit(ptr).unwrap();
    drop(pager);

    let reopened = Pager::open(&path, EngineOptions::default()).unwrap();
    assert_eq!(reopened.loaded_root(), ptr);
    let node = PageStore::get(&reopened, ptr);
    assert_eq!(node.get_key(1), b"k");
    assert_eq!(node.get_val(1), b"v");
}

#[test]
fn test_deleted_page_is_reused_by_later_alloc() {
    // Reuse is only visible across transactions: the page freed by `del`
    // here isn't folded into the free list until this transaction's
    // commit, so it can only be handed back out by the *next* alloc.
    let dir = tempdir().unwrap();
    let mut pager = Pager::open(dir.path().join("db"), EngineOptions::default()).unwrap();

    let first = PageStore::new(&mut pager, leaf_page(b"a", b"1"));
    pager.commit(first).unwrap();

    PageStore::del(&mut pager, first);
    let interim = PageStore::new(&mut pager, leaf_page(b"b", b"2"));
    pager.commit(interim).unwrap();

    let second = PageStore::new(&mut pager, leaf_page(b"c", b"3"));
    pager.commit(second).unwrap();

    // The freed page id should have been handed back out rather than
    // appending a brand-new one.
    assert_eq!(second, first);
}

#[test]
fn test_mmap_window_grows_past_initial_capacity() {
    let dir = tempdir().unwrap();
    let options = EngineOptions {
        initial_mmap_bytes: PAGE_SIZE as u64 * 2,
        growth_factor: 2.0,
    };
    let mut pager = Pager::open(dir.path().join("db"), options).unwrap();

    let mut last = 0;
    for i in 0..50u8 {
        let ptr = PageStore::new(&mut pager, leaf_page(&[i], &[i]));
        pager.commit(ptr).unwrap();
        last = ptr;
    }

    let node = PageStore::get(&pager, last);
    assert_eq!(node.get_key(1), &[49u8]);
}

#[test]
fn test_reopen_rejects_bad_signature() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");
    {
        let mut pager = Pager::open(&path, EngineOptions::default()).unwrap();
        let ptr = PageStore::new(&mut pager, leaf_page(b"k", b"v"));
        pager.commit(ptr).unwrap();
    }

    let mut file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
    file.write_all(b"NOTAVALID").unwrap();
    drop(file);

    assert!(Pager::open(&path, EngineOptions::default()).is_err());
}

#[test]
fn test_stray_page_writes_past_flushed_without_master_commit_are_ignored_on_reopen() {
    // Simulates a crash between the data-page fsync and the master-page
    // write: bytes land on disk past `flushed`, but since the master
    // page was never rewritten to claim them, they must not affect what
    // a reopen observes.
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");

    let (committed_root, committed_flushed) = {
        let mut pager = Pager::open(&path, EngineOptions::default()).unwrap();
        let ptr = PageStore::new(&mut pager, leaf_page(b"k", b"v"));
        pager.commit(ptr).unwrap();
        (ptr, pager.flushed_for_test())
    };

    // Write a stray page's worth of non-zero bytes just past the
    // committed high-water mark, as if an interrupted commit had written
    // data pages but crashed before the master-page write. The file is
    // already pre-extended to the mmap window by `Pager::open`, so this
    // only overwrites previously-zeroed, unreachable space -- it must
    // not grow or shrink the file.
    {
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        let stray_offset = committed_flushed * PAGE_SIZE as u64;
        file.write_at(&[0xAAu8; PAGE_SIZE], stray_offset).unwrap();
        file.sync_all().unwrap();
    }

    let reopened = Pager::open(&path, EngineOptions::default()).unwrap();
    assert_eq!(reopened.loaded_root(), committed_root);
    assert_eq!(reopened.flushed_for_test(), committed_flushed);
    let node = PageStore::get(&reopened, committed_root);
    assert_eq!(node.get_key(1), b"k");
    assert_eq!(node.get_val(1), b"v");
}

#[test]
fn test_reopen_rejects_truncated_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");
    {
        let _pager = Pager::open(&path, EngineOptions::default()).unwrap();
    }
    // A file whose size isn't a multiple of PAGE_SIZE is corrupt.
    let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(PAGE_SIZE as u64 + 1).unwrap();
    drop(file);

    assert!(Pager::open(&path, EngineOptions::default()).is_err());
}
