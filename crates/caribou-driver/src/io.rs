//! Low-level I/O operations on device file descriptors
//!
//! Handles read/write, readiness waits and the few ioctls rustix does not
//! model (SMI stream control, spidev message transfer).

use crate::error::{Result, SmiError};
use rustix::event::{poll, PollFd, PollFlags};
use rustix::fd::BorrowedFd;
use rustix::io::{read, write};
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Readiness direction for [`IoHandle::poll_ready`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Data available to read
    Readable,
    /// Room available to write
    Writable,
}

/// I/O operations handler
///
/// Wraps a file descriptor for read/write operations.
/// Does not own the file descriptor - the caller retains ownership.
#[derive(Debug, Clone, Copy)]
pub struct IoHandle {
    fd: RawFd,
}

impl IoHandle {
    /// Create new I/O handler for a file descriptor
    #[must_use]
    pub const fn new(fd: RawFd) -> Self {
        Self { fd }
    }

    fn borrowed(&self) -> BorrowedFd<'_> {
        // SAFETY: fd is valid for the lifetime of this IoHandle (caller's responsibility)
        unsafe { BorrowedFd::borrow_raw(self.fd) }
    }

    /// Read data from device
    ///
    /// # Errors
    ///
    /// Returns error if read operation fails.
    pub fn read(&self, buffer: &mut [u8]) -> Result<usize> {
        read(self.borrowed(), buffer).map_err(|e| SmiError::transport(format!("Read failed: {e}")))
    }

    /// Write data to device
    ///
    /// # Errors
    ///
    /// Returns error if write operation fails.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        write(self.borrowed(), data).map_err(|e| SmiError::transport(format!("Write failed: {e}")))
    }

    /// Wait until the descriptor is ready in `direction`
    ///
    /// Returns `Ok(false)` when `timeout` elapses first. An interrupted wait
    /// counts as not ready.
    ///
    /// # Errors
    ///
    /// Returns error if the poll fails or the device reports an error or hangup.
    pub fn poll_ready(&self, direction: Readiness, timeout: Duration) -> Result<bool> {
        let wanted = match direction {
            Readiness::Readable => PollFlags::IN,
            Readiness::Writable => PollFlags::OUT,
        };
        let fd = self.borrowed();
        let mut fds = [PollFd::new(&fd, wanted)];
        let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);

        match poll(&mut fds, timeout_ms) {
            Ok(0) | Err(rustix::io::Errno::INTR) => Ok(false),
            Ok(_) => {
                let revents = fds[0].revents();
                if revents.intersects(PollFlags::ERR | PollFlags::HUP | PollFlags::NVAL) {
                    return Err(SmiError::transport(format!("Device reported {revents:?}")));
                }
                Ok(revents.intersects(wanted))
            }
            Err(e) => Err(SmiError::transport(format!("Poll failed: {e}"))),
        }
    }

    /// Issue an ioctl whose argument is a plain integer
    ///
    /// # Errors
    ///
    /// Returns error if the kernel rejects the request.
    pub fn ioctl_value(&self, request: u64, arg: libc::c_ulong) -> Result<libc::c_int> {
        // SAFETY: ioctl with an integer argument; the kernel does not
        // dereference it. fd validity is the caller's responsibility.
        #[allow(clippy::cast_possible_truncation, clippy::useless_conversion)]
        let ret = unsafe { libc::ioctl(self.fd, request as _, arg) };
        if ret < 0 {
            return Err(SmiError::transport(format!(
                "ioctl {request:#06x} failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(ret)
    }

    /// Issue an ioctl that reads or writes `*arg`
    ///
    /// # Errors
    ///
    /// Returns error if the kernel rejects the request.
    pub fn ioctl_ptr<T>(&self, request: u64, arg: &mut T) -> Result<libc::c_int> {
        // SAFETY: arg is a live, exclusively borrowed value of the type the
        // request expects; the kernel writes at most size_of::<T>() bytes.
        #[allow(clippy::cast_possible_truncation, clippy::useless_conversion)]
        let ret = unsafe { libc::ioctl(self.fd, request as _, std::ptr::from_mut(arg)) };
        if ret < 0 {
            return Err(SmiError::transport(format!(
                "ioctl {request:#06x} failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(ret)
    }
}
