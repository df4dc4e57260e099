// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! An embedded, single-writer, persistent key-value store built on a
//! copy-on-write B+-tree over a memory-mapped paged file.
//!
//! Every mutation ([`Database::set`]/[`Database::delete`]) builds a new
//! path of pages from the leaf up to a new root rather than mutating
//! pages in place, so a previous, fully-consistent root always remains
//! reachable until the new one is committed. Durability is provided by
//! a two-phase `fsync` commit of a single master page (see
//! [`pager`]/[`master`]), not by a write-ahead log.
//!
//! Out of scope: SQL, a relational table layer, a CLI, or any
//! concurrency beyond a single writer in a single process. See
//! `DESIGN.md` for the full list of things this crate deliberately does
//! not do.

pub mod db;
pub mod error;
pub mod freelist;
pub mod master;
pub mod page;
pub mod pager;
pub mod tree;

pub use db::Database;
pub use error::{StoreError, StoreResult};
pub use pager::EngineOptions;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
