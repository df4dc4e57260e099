// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Error types for the storage engine.

use std::fmt;

/// Standard `Result` type for all engine operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Error type for the storage engine.
///
/// `NotFound` is deliberately absent: `get`/`del` report absence through
/// `Ok(None)`/`Ok(false)`, not an error variant.
#[derive(Debug, Clone)]
pub enum StoreError {
    /// A syscall failed (open, stat, mmap, write, fsync, set_len, ...).
    Io { operation: String, reason: String },

    /// The master page is unreadable: bad signature, out-of-range
    /// root/used, or a file size that isn't page-aligned.
    Corruption { reason: String },

    /// An internal invariant was violated (bad pointer, node overflow
    /// after a mutation that should have produced page-sized nodes, ...).
    /// These indicate a programming error rather than bad input.
    InvariantViolation { reason: String },

    /// A key exceeded `MAX_KEY` bytes.
    KeyTooLarge { len: usize, max: usize },

    /// A value exceeded `MAX_VAL` bytes.
    ValueTooLarge { len: usize, max: usize },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { operation, reason } => {
                write!(f, "I/O error during '{}': {}", operation, reason)
            }
            Self::Corruption { reason } => {
                write!(f, "corrupt master page: {}", reason)
            }
            Self::InvariantViolation { reason } => {
                write!(f, "invariant violation: {}", reason)
            }
            Self::KeyTooLarge { len, max } => {
                write!(f, "key too large: {} bytes (max {})", len, max)
            }
            Self::ValueTooLarge { len, max } => {
                write!(f, "value too large: {} bytes (max {})", len, max)
            }
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            operation: "unknown".to_string(),
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
#[path = "error_test.rs"]
mod error_test;
