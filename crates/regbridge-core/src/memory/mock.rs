//! In-memory register store for unit testing.
//!
//! The real [`MemoryWindow`](super::MemoryWindow) needs a backing file and a
//! live mapping.  `InMemoryRegisters` keeps the bytes in a `Mutex<Vec<u8>>`
//! instead and records every write, so tests can assert exactly what a
//! session stored and in what order.
//!
//! Set `should_fail = true` to make every access return
//! [`AccessError::Store`], which exercises the error paths of callers.

use std::sync::Mutex;

use super::{AccessError, BoundsError, RegisterStore};

/// A register store backed by a plain byte vector.
#[derive(Debug, Default)]
pub struct InMemoryRegisters {
    /// Current window contents.
    pub bytes: Mutex<Vec<u8>>,
    /// Records each `(offset, bytes)` pair passed to `write_at`.
    pub writes: Mutex<Vec<(usize, Vec<u8>)>>,
    /// When `true`, every access returns an error.
    pub should_fail: bool,
}

impl InMemoryRegisters {
    /// Creates a zero-filled store of `length` bytes.
    pub fn new(length: usize) -> Self {
        Self::from_bytes(vec![0; length])
    }

    /// Creates a store holding `bytes`.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Mutex::new(bytes),
            writes: Mutex::new(Vec::new()),
            should_fail: false,
        }
    }

    /// A store whose every access fails.
    pub fn failing(length: usize) -> Self {
        Self {
            should_fail: true,
            ..Self::new(length)
        }
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.lock().unwrap().clone()
    }
}

impl RegisterStore for InMemoryRegisters {
    fn read_at(&self, offset: usize, size: usize) -> Result<Vec<u8>, AccessError> {
        if self.should_fail {
            return Err(AccessError::Store("mock failure".into()));
        }
        let bytes = self.bytes.lock().unwrap();
        BoundsError::check(offset, size, bytes.len())?;
        Ok(bytes[offset..offset + size].to_vec())
    }

    fn write_at(&self, offset: usize, data: &[u8]) -> Result<(), AccessError> {
        if self.should_fail {
            return Err(AccessError::Store("mock failure".into()));
        }
        let mut bytes = self.bytes.lock().unwrap();
        BoundsError::check(offset, data.len(), bytes.len())?;
        bytes[offset..offset + data.len()].copy_from_slice(data);
        self.writes.lock().unwrap().push((offset, data.to_vec()));
        Ok(())
    }

    fn len(&self) -> usize {
        self.bytes.lock().unwrap().len()
    }
}
