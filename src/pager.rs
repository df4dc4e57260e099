// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! The pager: owns the database file, its memory-mapped window, and the
//! in-progress page overlay for a single open transaction. Implements
//! both [`crate::tree::PageStore`] and [`crate::freelist::FreeListStore`]
//! so the B+-tree and free list can be driven against the real file
//! without knowing anything about mmap or commit protocol.
//!
//! ## Commit protocol
//! A transaction (one [`crate::db::Database::set`]/`delete` call) stages
//! its work entirely in memory: new or rewritten pages in `updates`,
//! retired page ids in `freed`. Committing is two fsync-separated steps:
//! 1. grow the file/mmap if needed, write every staged page, `fsync`.
//! 2. overwrite the master page in place with the new root/flushed/
//!    free-list head, `fsync` again.
//!
//! Because the master page is untouched until step 2 completes, a crash
//! during step 1 leaves the previous master page (and therefore the
//! previous, fully consistent tree) as the durable state.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

use memmap2::{MmapMut, MmapOptions};
use tracing::{debug, info, instrument};

use crate::error::{StoreError, StoreResult};
use crate::freelist::{FreeList, FreeListStore};
use crate::master::{MasterPage, MASTER_PAGE_SIZE};
use crate::page::{Node, PAGE_SIZE};
use crate::tree::PageStore;

/// Tuning knobs for the pager's mmap window.
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    /// Initial mmap window, in bytes. Rounded up to a multiple of
    /// `PAGE_SIZE`. Default: 64 MiB, matching the teacher lineage's
    /// storage-engine defaults.
    pub initial_mmap_bytes: u64,
    /// Factor the window is multiplied by each time it must grow to fit
    /// more pages. Must be > 1.0.
    pub growth_factor: f64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            initial_mmap_bytes: 64 << 20,
            growth_factor: 2.0,
        }
    }
}

pub struct Pager {
    file: File,
    mmap: MmapMut,
    /// File capacity in pages (the file has been `set_len`'d to at
    /// least this many pages; not all are necessarily in use yet).
    capacity_pages: u64,
    /// Pages 0..flushed are durable and reachable from the master page.
    flushed: u64,
    /// New page ids appended (but not yet committed) this transaction;
    /// contiguous, starting at `flushed`.
    nappend: u64,
    /// Staged writes for this transaction, keyed by page id. Covers
    /// both brand-new appended pages and in-place free-list reuse.
    updates: HashMap<u64, Vec<u8>>,
    /// Page ids retired (via `PageStore::del`) this transaction, not yet
    /// folded into `free_list`.
    freed: Vec<u64>,
    /// Free-list entries consumed by `alloc` this transaction. Allocation
    /// only reads the list (`free.get(nfree)`); the list itself is not
    /// rewritten until `commit` folds `nfree` pops and `freed` pushes
    /// together in a single `FreeList::update` call (spec §4.4/§4.5).
    nfree: u64,
    free_list: FreeList,
    options: EngineOptions,
    /// The root loaded from the master page at open time. `Database`
    /// reads this once to seed its `BTree`; the pager itself never
    /// tracks the current root between transactions.
    loaded_root: u64,
}

impl Pager {
    #[instrument(skip(options), fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, options: EngineOptions) -> StoreResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path.as_ref())
            .map_err(|e| StoreError::Io {
                operation: "open".to_string(),
                reason: e.to_string(),
            })?;

        let file_len = file
            .metadata()
            .map_err(|e| StoreError::Io {
                operation: "stat".to_string(),
                reason: e.to_string(),
            })?
            .len();
        if file_len % PAGE_SIZE as u64 != 0 {
            return Err(StoreError::Corruption {
                reason: "file size is not a multiple of the page size".to_string(),
            });
        }

        let mut window_bytes = options.initial_mmap_bytes.max(PAGE_SIZE as u64);
        while window_bytes < file_len {
            window_bytes = (window_bytes as f64 * options.growth_factor) as u64;
        }
        if file_len < window_bytes {
            file.set_len(window_bytes).map_err(|e| StoreError::Io {
                operation: "set_len".to_string(),
                reason: e.to_string(),
            })?;
        }

        let mmap = unsafe {
            MmapOptions::new().map_mut(&file).map_err(|e| StoreError::Io {
                operation: "mmap".to_string(),
                reason: e.to_string(),
            })?
        };
        let capacity_pages = window_bytes / PAGE_SIZE as u64;

        let master = if file_len == 0 {
            info!("initializing new database file");
            MasterPage::empty()
        } else {
            MasterPage::decode(&mmap[..MASTER_PAGE_SIZE], file_len)?
        };

        debug!(
            root = master.root,
            flushed = master.flushed,
            free_head = master.free_head,
            "loaded master page"
        );

        Ok(Self {
            file,
            mmap,
            capacity_pages,
            flushed: master.flushed,
            nappend: 0,
            updates: HashMap::new(),
            freed: Vec::new(),
            nfree: 0,
            free_list: FreeList { head: master.free_head },
            options,
            loaded_root: master.root,
        })
    }

    /// The B+-tree root as of the last successful `commit` (or as
    /// loaded from the master page at open time, before any commit).
    pub fn loaded_root(&self) -> u64 {
        self.loaded_root
    }

    pub fn free_list(&self) -> FreeList {
        self.free_list
    }

    /// The current `flushed` high-water mark. Exposed only for crash-
    /// recovery tests that need to reason about page ids past the
    /// committed boundary.
    #[cfg(test)]
    pub(crate) fn flushed_for_test(&self) -> u64 {
        self.flushed
    }

    fn read_committed(&self, ptr: u64) -> Vec<u8> {
        let offset = (ptr * PAGE_SIZE as u64) as usize;
        self.mmap[offset..offset + PAGE_SIZE].to_vec()
    }

    /// Allocate a page id for `data` by reusing the next not-yet-consumed
    /// free-list entry if one exists, otherwise appending. Used for
    /// B+-tree node allocation.
    ///
    /// This only reads the free list (`free.get(nfree)`); it does not pop
    /// the entry out of the on-disk list, so a page handed out here is
    /// never at risk of also being recycled by `FreeList::update`'s own
    /// page-reuse bookkeeping before the transaction commits. The list is
    /// rewritten exactly once, in `commit`, which folds this
    /// transaction's `nfree` pops and `freed` pushes into one
    /// `FreeList::update` call.
    fn alloc(&mut self, data: Vec<u8>) -> u64 {
        let fl = self.free_list;
        if self.nfree < fl.total(self) {
            let ptr = fl.get(self, self.nfree).expect("nfree < total checked above");
            self.nfree += 1;
            self.updates.insert(ptr, data);
            return ptr;
        }
        self.append(data)
    }

    fn append(&mut self, data: Vec<u8>) -> u64 {
        let ptr = self.flushed + self.nappend;
        self.nappend += 1;
        self.updates.insert(ptr, data);
        ptr
    }

    fn ensure_capacity(&mut self, pages: u64) -> StoreResult<()> {
        if pages <= self.capacity_pages {
            return Ok(());
        }
        let mut new_capacity = self.capacity_pages.max(1);
        while new_capacity < pages {
            new_capacity = ((new_capacity as f64) * self.options.growth_factor).ceil() as u64;
        }
        let new_bytes = new_capacity * PAGE_SIZE as u64;

        debug!(from_pages = self.capacity_pages, to_pages = new_capacity, "extending mmap window");
        self.file.set_len(new_bytes).map_err(|e| StoreError::Io {
            operation: "set_len".to_string(),
            reason: e.to_string(),
        })?;
        self.mmap = unsafe {
            MmapOptions::new().map_mut(&self.file).map_err(|e| StoreError::Io {
                operation: "mmap".to_string(),
                reason: e.to_string(),
            })?
        };
        self.capacity_pages = new_capacity;
        Ok(())
    }

    /// Commit the current transaction: fold this transaction's `nfree`
    /// pops and `freed` pushes into the free list in one call, write
    /// every staged page, `fsync`, then overwrite and `fsync` the master
    /// page with the new `root`.
    #[instrument(skip(self))]
    pub fn commit(&mut self, root: u64) -> StoreResult<()> {
        let freed = std::mem::take(&mut self.freed);
        let nfree = std::mem::take(&mut self.nfree);
        if nfree > 0 || !freed.is_empty() || self.nappend > 0 || !self.updates.is_empty() {
            let mut fl = self.free_list;
            fl.update(self, nfree, freed)?;
            self.free_list = fl;
        }

        let required_pages = self.flushed + self.nappend;
        self.ensure_capacity(required_pages)?;

        for (ptr, data) in self.updates.drain() {
            let offset = (ptr * PAGE_SIZE as u64) as usize;
            self.mmap[offset..offset + data.len()].copy_from_slice(&data);
        }
        self.mmap.flush().map_err(|e| StoreError::Io {
            operation: "msync".to_string(),
            reason: e.to_string(),
        })?;
        self.file.sync_all().map_err(|e| StoreError::Io {
            operation: "fsync".to_string(),
            reason: e.to_string(),
        })?;

        self.flushed = required_pages;
        self.nappend = 0;

        let master = MasterPage {
            root,
            flushed: self.flushed,
            free_head: self.free_list.head,
        };
        self.file
            .write_at(&master.encode(), 0)
            .map_err(|e| StoreError::Io {
                operation: "write master page".to_string(),
                reason: e.to_string(),
            })?;
        self.file.sync_all().map_err(|e| StoreError::Io {
            operation: "fsync".to_string(),
            reason: e.to_string(),
        })?;

        self.loaded_root = root;
        debug!(root, flushed = self.flushed, free_head = self.free_list.head, "committed");
        Ok(())
    }
}

impl PageStore for Pager {
    fn get(&self, ptr: u64) -> Node {
        match self.updates.get(&ptr) {
            Some(data) => Node::from_bytes(data.clone()),
            None => Node::from_bytes(self.read_committed(ptr)),
        }
    }

    fn new(&mut self, node: Node) -> u64 {
        self.alloc(node.as_bytes().to_vec())
    }

    fn del(&mut self, ptr: u64) {
        self.updates.remove(&ptr);
        self.freed.push(ptr);
    }
}

impl FreeListStore for Pager {
    fn get(&self, ptr: u64) -> Vec<u8> {
        match self.updates.get(&ptr) {
            Some(data) => data.clone(),
            None => self.read_committed(ptr),
        }
    }

    fn new(&mut self, page: Vec<u8>) -> u64 {
        self.append(page)
    }

    fn reuse(&mut self, ptr: u64, page: Vec<u8>) {
        self.updates.insert(ptr, page);
    }
}

#[cfg(test)]
#[path = "pager_test.rs"]
mod pager_test;
