//! The mapped register window.
//!
//! A [`MemoryWindow`] owns a shared mapping of `length` bytes of a
//! memory-backed file, starting at `base_offset`.  On a target board the file
//! is `/dev/mem` and the offset is a physical address; in tests it is an
//! ordinary temp file.
//!
//! # Volatile access
//!
//! The bytes behind the mapping can change at any time (the device writes
//! them), so every read goes through [`std::ptr::read_volatile`] and every
//! write through [`std::ptr::write_volatile`].  The compiler may not cache or
//! merge these accesses.
//!
//! A register-sized access at a 4-byte aligned address is a single 32-bit
//! load or store, so the device never observes (or produces) half a word.
//! Anything else falls back to byte accesses.
//!
//! # Locking
//!
//! The mapping itself sits behind a read/write lock: accesses take the read
//! side, [`MemoryWindow::close`] takes the write side.  Independently of that,
//! [`AccessPolicy::Exclusive`] serializes all accesses behind a mutex, while
//! [`AccessPolicy::Unsynchronized`] lets concurrent accesses interleave.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::ptr;

use memmap2::{MmapOptions, MmapRaw};
use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info};

use super::{AccessError, AccessPolicy, BoundsError, MappingError, RegisterStore};
use crate::protocol::codec::REGISTER_WIDTH;

/// Options controlling how a [`MemoryWindow`] is accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowOptions {
    /// Whether accesses are serialized.
    pub policy: AccessPolicy,
    /// Flush every write to the device before `write_at` returns.
    pub sync_writes: bool,
}

impl Default for WindowOptions {
    fn default() -> Self {
        Self {
            policy: AccessPolicy::Exclusive,
            sync_writes: true,
        }
    }
}

/// The live mapping plus the file handle it was created from.
struct Region {
    map: MmapRaw,
    _file: File,
}

/// A fixed-size, bounds-checked view of a memory-backed file.
pub struct MemoryWindow {
    path: PathBuf,
    base_offset: u64,
    length: usize,
    options: WindowOptions,
    region: RwLock<Option<Region>>,
    access: Mutex<()>,
}

impl MemoryWindow {
    /// Opens `path` read/write and maps `length` bytes starting at
    /// `base_offset`, with the default [`WindowOptions`].
    ///
    /// # Errors
    ///
    /// Returns [`MappingError`] if the file cannot be opened, the region does
    /// not fit inside a regular backing file, or the mapping fails.
    pub fn open(
        path: impl AsRef<Path>,
        length: usize,
        base_offset: u64,
    ) -> Result<Self, MappingError> {
        Self::open_with(path, length, base_offset, WindowOptions::default())
    }

    /// Like [`MemoryWindow::open`], with explicit options.
    ///
    /// # Errors
    ///
    /// See [`MemoryWindow::open`].
    pub fn open_with(
        path: impl AsRef<Path>,
        length: usize,
        base_offset: u64,
        options: WindowOptions,
    ) -> Result<Self, MappingError> {
        let path = path.as_ref().to_path_buf();

        if length == 0 {
            return Err(MappingError::EmptyWindow);
        }

        let file = open_backing_file(&path).map_err(|source| MappingError::Open {
            path: path.clone(),
            source,
        })?;

        // Touching a page past the end of a regular file raises SIGBUS, so the
        // region is checked up front.  Character devices report a length of
        // zero and are left to the kernel.
        let metadata = file.metadata().map_err(|source| MappingError::Open {
            path: path.clone(),
            source,
        })?;
        if metadata.is_file() {
            let end = base_offset.checked_add(length as u64);
            if end.map_or(true, |end| end > metadata.len()) {
                return Err(MappingError::RegionOutOfBounds {
                    path,
                    base_offset,
                    length,
                    file_len: metadata.len(),
                });
            }
        }

        let map = MmapOptions::new()
            .offset(base_offset)
            .len(length)
            .map_raw(&file)
            .map_err(|source| MappingError::Map {
                path: path.clone(),
                base_offset,
                length,
                source,
            })?;

        info!(
            "mapped {length} bytes of {} at {base_offset:#x} ({:?})",
            path.display(),
            options.policy
        );

        Ok(Self {
            path,
            base_offset,
            length,
            options,
            region: RwLock::new(Some(Region { map, _file: file })),
            access: Mutex::new(()),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Absolute offset in the backing file at which the window begins.
    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    pub fn options(&self) -> WindowOptions {
        self.options
    }

    /// Whether [`MemoryWindow::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.region.read().is_none()
    }

    /// Unmaps the window and releases the file handle.
    ///
    /// Calling `close` more than once is a no-op.
    pub fn close(&self) {
        if self.region.write().take().is_some() {
            info!("unmapped {}", self.path.display());
        } else {
            debug!("{} already closed", self.path.display());
        }
    }

    fn access_guard(&self) -> Option<MutexGuard<'_, ()>> {
        match self.options.policy {
            AccessPolicy::Exclusive => Some(self.access.lock()),
            AccessPolicy::Unsynchronized => None,
        }
    }
}

impl RegisterStore for MemoryWindow {
    fn read_at(&self, offset: usize, size: usize) -> Result<Vec<u8>, AccessError> {
        BoundsError::check(offset, size, self.length)?;

        let _guard = self.access_guard();
        let region = self.region.read();
        let region = region.as_ref().ok_or(AccessError::Closed)?;

        // SAFETY: offset + size <= length == map.len() (checked above), and
        // the read lock keeps the mapping alive while `start` is used.
        let start = unsafe { region.map.as_ptr().add(offset) };
        if is_word_access(start, size) {
            // SAFETY: in bounds as above; `is_word_access` checked alignment.
            let word = unsafe { ptr::read_volatile(start.cast::<u32>()) };
            return Ok(word.to_ne_bytes().to_vec());
        }

        let mut out = vec![0u8; size];
        for (i, byte) in out.iter_mut().enumerate() {
            // SAFETY: i < size, so start + i stays inside the mapping.
            *byte = unsafe { ptr::read_volatile(start.add(i)) };
        }
        Ok(out)
    }

    fn write_at(&self, offset: usize, bytes: &[u8]) -> Result<(), AccessError> {
        BoundsError::check(offset, bytes.len(), self.length)?;

        let _guard = self.access_guard();
        let region = self.region.read();
        let region = region.as_ref().ok_or(AccessError::Closed)?;

        // SAFETY: same bounds and lifetime argument as `read_at`.
        let start = unsafe { region.map.as_mut_ptr().add(offset) };
        match <[u8; REGISTER_WIDTH]>::try_from(bytes) {
            Ok(word) if is_word_access(start, REGISTER_WIDTH) => {
                // SAFETY: in bounds; `is_word_access` checked alignment.
                unsafe { ptr::write_volatile(start.cast::<u32>(), u32::from_ne_bytes(word)) };
            }
            _ => write_bytes(start, bytes),
        }

        if self.options.sync_writes {
            region
                .map
                .flush_range(offset, bytes.len())
                .map_err(AccessError::Sync)?;
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.length
    }
}

impl std::fmt::Debug for MemoryWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryWindow")
            .field("path", &self.path)
            .field("base_offset", &format_args!("{:#x}", self.base_offset))
            .field("length", &self.length)
            .field("options", &self.options)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Whether an access of `size` bytes at `ptr` can be one aligned 32-bit access.
fn is_word_access(ptr: *const u8, size: usize) -> bool {
    size == REGISTER_WIDTH && (ptr as usize) % std::mem::align_of::<u32>() == 0
}

/// Byte-wise volatile store of `bytes` at `start`.
///
/// The caller guarantees `start..start + bytes.len()` lies inside a live
/// mapping.
fn write_bytes(start: *mut u8, bytes: &[u8]) {
    for (i, byte) in bytes.iter().enumerate() {
        // SAFETY: guaranteed in bounds by the caller.
        unsafe { ptr::write_volatile(start.add(i), *byte) };
    }
}

#[cfg(unix)]
fn open_backing_file(path: &Path) -> std::io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;

    OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_SYNC)
        .open(path)
}

#[cfg(not(unix))]
fn open_backing_file(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().read(true).write(true).open(path)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
