// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! The master page: a fixed 40-byte record at offset 0 of the database
//! file naming the current B+-tree root, the number of pages flushed so
//! far, and the free list's head page.
//!
//! ## Layout
//! ```text
//! offset | size | field
//! -------|------|------
//! 0      | 16   | signature, zero-padded ASCII
//! 16     | 8    | btree root page id (0 = empty tree)
//! 24     | 8    | flushed: number of pages in the file, incl. the master page itself
//! 32     | 8    | free list head page id (0 = empty free list)
//! ```
//!
//! This page is never part of the copy-on-write page arena: it is
//! updated in place with a positional write, bracketed by `fsync` on
//! both sides, forming the commit point for every transaction (see
//! [`crate::pager`]).

use crate::error::{StoreError, StoreResult};
use crate::page::PAGE_SIZE;

pub const MASTER_PAGE_SIZE: usize = 40;

/// Database signature, identifying this file as belonging to this
/// engine (distinct from the teacher's own on-disk formats).
pub const SIGNATURE: &[u8] = b"FerroKV1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasterPage {
    pub root: u64,
    pub flushed: u64,
    pub free_head: u64,
}

impl MasterPage {
    /// The master page of a brand-new, empty database: page 0 is
    /// reserved for the master page itself, so the first real page is 1.
    pub fn empty() -> Self {
        Self {
            root: 0,
            flushed: 1,
            free_head: 0,
        }
    }

    pub fn encode(&self) -> [u8; MASTER_PAGE_SIZE] {
        let mut buf = [0u8; MASTER_PAGE_SIZE];
        buf[..SIGNATURE.len()].copy_from_slice(SIGNATURE);
        buf[16..24].copy_from_slice(&self.root.to_le_bytes());
        buf[24..32].copy_from_slice(&self.flushed.to_le_bytes());
        buf[32..40].copy_from_slice(&self.free_head.to_le_bytes());
        buf
    }

    /// Decode and validate a master page read from file offset 0.
    /// `file_size` is the on-disk file size in bytes, used to sanity
    /// check `flushed` and `root` against the pages that actually exist.
    pub fn decode(data: &[u8], file_size: u64) -> StoreResult<Self> {
        if data.len() < MASTER_PAGE_SIZE {
            return Err(StoreError::Corruption {
                reason: "file too small to hold a master page".to_string(),
            });
        }
        if &data[..SIGNATURE.len()] != SIGNATURE {
            return Err(StoreError::Corruption {
                reason: "bad signature".to_string(),
            });
        }

        let root = u64::from_le_bytes(data[16..24].try_into().unwrap());
        let flushed = u64::from_le_bytes(data[24..32].try_into().unwrap());
        let free_head = u64::from_le_bytes(data[32..40].try_into().unwrap());

        let total_pages = file_size / PAGE_SIZE as u64;
        if flushed < 1 || flushed > total_pages {
            return Err(StoreError::Corruption {
                reason: format!("flushed={flushed} out of range for a {total_pages}-page file"),
            });
        }
        if root != 0 && root >= flushed {
            return Err(StoreError::Corruption {
                reason: format!("root={root} is not less than flushed={flushed}"),
            });
        }
        if free_head != 0 && free_head >= flushed {
            return Err(StoreError::Corruption {
                reason: format!("free_head={free_head} is not less than flushed={flushed}"),
            });
        }

        Ok(Self {
            root,
            flushed,
            free_head,
        })
    }
}

#[cfg(test)]
#[path = "master_test.rs"]
mod master_test;
