//! Register memory: the mapped window, its error types, and the
//! [`RegisterStore`] seam that sessions program against.
//!
//! Sessions only ever "read N bytes at offset" and "write these bytes at
//! offset".  [`MemoryWindow`] implements those over a live mapping;
//! [`InMemoryRegisters`] implements them over a plain vector for tests.

pub mod mock;
pub mod window;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::codec::{RegisterBytes, REGISTER_WIDTH};

pub use mock::InMemoryRegisters;
pub use window::{MemoryWindow, WindowOptions};

// ── Errors ────────────────────────────────────────────────────────────────────

/// The backing store could not be opened or mapped.
///
/// Fatal: the bridge cannot start without its window.
#[derive(Debug, Error)]
pub enum MappingError {
    /// The backing file could not be opened for read/write.
    #[error("failed to open backing file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A window of zero bytes was requested.
    #[error("window length must be greater than zero")]
    EmptyWindow,

    /// The requested region does not fit inside the backing file.
    #[error("region {base_offset:#x}+{length} exceeds backing file {path} ({file_len} bytes)")]
    RegionOutOfBounds {
        path: PathBuf,
        base_offset: u64,
        length: usize,
        file_len: u64,
    },

    /// The operating system refused the mapping (permission, busy device,
    /// invalid offset, ...).
    #[error("failed to map {length} bytes at {base_offset:#x} of {path}: {source}")]
    Map {
        path: PathBuf,
        base_offset: u64,
        length: usize,
        #[source]
        source: std::io::Error,
    },
}

/// An access of `size` bytes at `offset` does not fit inside the window.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("access of {size} bytes at offset {offset} exceeds window of {length} bytes")]
pub struct BoundsError {
    pub offset: usize,
    pub size: usize,
    pub length: usize,
}

impl BoundsError {
    /// Checks that `[offset, offset + size)` lies inside a window of `length` bytes.
    pub fn check(offset: usize, size: usize, length: usize) -> Result<(), BoundsError> {
        match offset.checked_add(size) {
            Some(end) if end <= length => Ok(()),
            _ => Err(BoundsError {
                offset,
                size,
                length,
            }),
        }
    }
}

/// Errors returned by [`RegisterStore::read_at`] and [`RegisterStore::write_at`].
#[derive(Debug, Error)]
pub enum AccessError {
    #[error(transparent)]
    Bounds(#[from] BoundsError),

    /// The window has been closed; no further access is possible.
    #[error("memory window is closed")]
    Closed,

    /// A synchronous write could not be flushed to the device.
    #[error("failed to flush register write: {0}")]
    Sync(#[source] std::io::Error),

    /// Injected failure from a test double.
    #[error("register store failure: {0}")]
    Store(String),
}

// ── Access policy ─────────────────────────────────────────────────────────────

/// How concurrent `read_at` / `write_at` calls from different sessions relate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessPolicy {
    /// Every access holds one window-wide mutex; accesses never interleave.
    #[default]
    Exclusive,
    /// No mutual exclusion between accesses.  Concurrent writers to the same
    /// offset may interleave at the byte level.
    Unsynchronized,
}

// ── Register offsets ──────────────────────────────────────────────────────────

/// The two fixed register locations inside the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterOffsets {
    /// Where the streamed value is read from.
    pub read_offset: usize,
    /// Where decoded client values are written to.
    pub write_offset: usize,
}

impl RegisterOffsets {
    pub fn new(read_offset: usize, write_offset: usize) -> Self {
        Self {
            read_offset,
            write_offset,
        }
    }

    /// Verifies that a full register access at both offsets fits inside a
    /// window of `window_len` bytes.
    ///
    /// # Errors
    ///
    /// Returns the [`BoundsError`] of the first offending offset.
    pub fn validate(&self, window_len: usize) -> Result<(), BoundsError> {
        BoundsError::check(self.read_offset, REGISTER_WIDTH, window_len)?;
        BoundsError::check(self.write_offset, REGISTER_WIDTH, window_len)
    }
}

// ── Store trait ───────────────────────────────────────────────────────────────

/// Byte-addressed access to the register window.
///
/// Implementations must be shareable across session tasks.
pub trait RegisterStore: Send + Sync {
    /// Returns `size` bytes starting at `offset`, as currently held by the device.
    fn read_at(&self, offset: usize, size: usize) -> Result<Vec<u8>, AccessError>;

    /// Writes `bytes` starting at `offset`.
    fn write_at(&self, offset: usize, bytes: &[u8]) -> Result<(), AccessError>;

    /// Length of the window in bytes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads one full register word at `offset`.
    fn read_word(&self, offset: usize) -> Result<RegisterBytes, AccessError> {
        let bytes = self.read_at(offset, REGISTER_WIDTH)?;
        let mut word = [0u8; REGISTER_WIDTH];
        word.copy_from_slice(&bytes);
        Ok(word)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
