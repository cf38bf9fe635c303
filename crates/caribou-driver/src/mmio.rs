//! Memory-mapped register window
//!
//! Maps a register block exposed through a character device (`/dev/gpiomem`)
//! into the process and gives volatile, bounds-checked 32-bit access to it.

// Register windows are page aligned and registers are naturally aligned
#![allow(clippy::cast_ptr_alignment)]

use crate::error::{Result, SmiError};
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsFd;
use std::path::Path;
use std::ptr::NonNull;

/// Mapped register window
pub struct MappedRegion {
    ptr: NonNull<u8>,
    size: usize,
    _file: File,
}

impl std::fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedRegion")
            .field("ptr", &format_args!("{:p}", self.ptr))
            .field("size", &self.size)
            .finish()
    }
}

// SAFETY: Send - MappedRegion owns the mapping exclusively; the mapping is
// process-wide so moving the owner between threads does not invalidate it.
unsafe impl Send for MappedRegion {}

// SAFETY: Sync - every access is a single volatile 32-bit load or store.
// Callers that need read-modify-write atomicity serialize above this layer.
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    /// Map `size` bytes of `path` starting at offset 0
    ///
    /// # Errors
    ///
    /// Returns an error if the device node cannot be opened or mapped.
    pub fn open(path: &Path, size: usize) -> Result<Self> {
        tracing::debug!("Mapping register window {} ({size:#x} bytes)", path.display());

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| SmiError::transport(format!("Cannot open {}: {e}", path.display())))?;

        // SAFETY: mmap necessary for MMIO - maps the register block.
        // Invariants: (1) fd valid, just opened; (2) size non-zero and within the
        // window the driver exports; (3) MAP_SHARED so stores reach the device;
        // (4) the file is kept alive in the struct for the mapping's lifetime.
        let addr = unsafe {
            mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                file.as_fd(),
                0,
            )
            .map_err(|e| SmiError::transport(format!("mmap of {} failed: {e}", path.display())))?
        };

        let ptr = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| SmiError::transport("mmap returned a null mapping"))?;

        tracing::info!("Mapped {} at {ptr:p}, size={size:#x}", path.display());

        Ok(Self {
            ptr,
            size,
            _file: file,
        })
    }

    /// Read a 32-bit register
    ///
    /// # Panics
    ///
    /// Panics if `offset + 4` exceeds the mapped region size.
    pub fn read32(&self, offset: usize) -> u32 {
        assert!(offset + 4 <= self.size, "Register offset out of bounds");
        // SAFETY: read_volatile necessary for MMIO - hardware can change value.
        // Invariants: (1) ptr from mmap, valid for self.size; (2) offset+4 <= size;
        // (3) u32 aligned.
        unsafe { std::ptr::read_volatile(self.ptr.as_ptr().add(offset).cast::<u32>()) }
    }

    /// Write a 32-bit register
    ///
    /// # Panics
    ///
    /// Panics if `offset + 4` exceeds the mapped region size.
    pub fn write32(&self, offset: usize, value: u32) {
        assert!(offset + 4 <= self.size, "Register offset out of bounds");
        // SAFETY: write_volatile necessary for MMIO - triggers hardware side effects.
        // Invariants: (1) ptr from mmap; (2) offset+4 <= size; (3) u32 aligned.
        unsafe {
            std::ptr::write_volatile(self.ptr.as_ptr().add(offset).cast::<u32>(), value);
        }
    }

    /// Get region size
    pub const fn size(&self) -> usize {
        self.size
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        // SAFETY: ptr/size are exactly what mmap returned; Drop runs once and
        // no borrows of the mapping outlive self.
        unsafe {
            let _ = munmap(self.ptr.as_ptr().cast(), self.size);
        }
        tracing::debug!("Unmapped register window ({:#x} bytes)", self.size);
    }
}
