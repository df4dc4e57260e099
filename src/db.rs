// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! The public embedded database handle.

use std::path::Path;

use tracing::instrument;

use crate::error::StoreResult;
use crate::pager::{EngineOptions, Pager};
use crate::tree::BTree;

/// A single-writer, persistent key-value store.
///
/// Every [`Database::set`]/[`Database::delete`] call is its own
/// transaction: it mutates the copy-on-write tree in memory, then
/// commits with a two-phase `fsync` before returning. There is no
/// explicit transaction API and no concurrent-writer support; a
/// `Database` is meant to be owned by a single thread for its whole
/// lifetime (see the crate-level docs for the reasoning).
pub struct Database {
    pager: Pager,
    tree: BTree,
}

impl Database {
    /// Open (or create) the database file at `path` with default tuning.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::open_with_options(path, EngineOptions::default())
    }

    /// Alias for [`Database::open`], named to mirror the external
    /// interface's `open(path)`/`open_default(path)` pairing when a
    /// caller wants to be explicit that it is requesting default tuning.
    pub fn open_default(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::open(path)
    }

    /// Open (or create) the database file at `path` with explicit mmap
    /// tuning.
    #[instrument(skip(options))]
    pub fn open_with_options(path: impl AsRef<Path>, options: EngineOptions) -> StoreResult<Self> {
        let pager = Pager::open(path, options)?;
        let tree = BTree { root: pager.loaded_root() };
        Ok(Self { pager, tree })
    }

    /// Look up `key`. Returns `None` if absent.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.tree.lookup(&self.pager, key)
    }

    /// Insert or overwrite `key -> val`, committing before returning.
    #[instrument(skip(self, val), fields(key_len = key.len(), val_len = val.len()))]
    pub fn set(&mut self, key: &[u8], val: &[u8]) -> StoreResult<()> {
        self.tree.insert(&mut self.pager, key, val)?;
        self.pager.commit(self.tree.root)
    }

    /// Delete `key`. Returns `false` if it was absent, in which case
    /// nothing is committed (no-op writes don't pay for an `fsync`).
    #[instrument(skip(self), fields(key_len = key.len()))]
    pub fn delete(&mut self, key: &[u8]) -> StoreResult<bool> {
        let existed = self.tree.delete(&mut self.pager, key)?;
        if existed {
            self.pager.commit(self.tree.root)?;
        }
        Ok(existed)
    }

    /// Number of pages currently held by the free list. Exposed for
    /// tests and diagnostics, not part of the core KV contract.
    pub fn free_list_len(&self) -> u64 {
        self.pager.free_list().total(&self.pager)
    }

    /// Unmap and close the database. Every `set`/`delete` already commits
    /// before returning, so there is nothing left to flush here; this
    /// exists to give callers an explicit, named close point (mirroring
    /// `Drop`, which runs the same unmap/close when a `Database` simply
    /// goes out of scope).
    #[instrument(skip(self))]
    pub fn close(self) {
        tracing::debug!("database closed");
    }
}

#[cfg(test)]
#[path = "db_test.rs"]
mod db_test;
