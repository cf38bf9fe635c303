//! SMI stream port
//!
//! [`StreamPort`] is everything the streaming worker needs from the
//! hardware: the native block length, arming the kernel stream state, a
//! bounded readiness wait, and block transfer. [`SmiDevice`] implements it
//! over the `smi_stream_dev` character device; readiness is a
//! `rustix::event::poll` on the device descriptor.

use crate::error::{Result, SmiError};
use crate::io::{IoHandle, Readiness};
use caribou_chip::smi::{ioctl, StreamState, DMA_BOUNCE_BUFFER_SIZE};
use std::fs::{File, OpenOptions};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::StreamDirection;

/// Hardware side of a stream
pub trait StreamPort: Send + Sync + std::fmt::Debug {
    /// DMA block length the port delivers per readiness signal
    ///
    /// # Errors
    ///
    /// Returns error if the port cannot be queried.
    fn native_block_len(&self) -> Result<usize>;

    /// Select the kernel stream state (starts DMA for receive states)
    ///
    /// # Errors
    ///
    /// Returns error if the port rejects the state.
    fn arm(&self, state: StreamState) -> Result<()>;

    /// Stop DMA
    ///
    /// # Errors
    ///
    /// Returns error if the port rejects the request.
    fn disarm(&self) -> Result<()> {
        self.arm(StreamState::Idle)
    }

    /// Wait up to `timeout` for the next block to be ready in `direction`
    ///
    /// `Ok(false)` means the wait elapsed without a signal.
    ///
    /// # Errors
    ///
    /// Returns error on a transport failure.
    fn wait_ready(&self, direction: StreamDirection, timeout: Duration) -> Result<bool>;

    /// Copy one completed receive block into `block`
    ///
    /// # Errors
    ///
    /// Returns error on a transport failure or a short block.
    fn read_block(&self, block: &mut [u8]) -> Result<()>;

    /// Queue one transmit block
    ///
    /// # Errors
    ///
    /// Returns error on a transport failure or a short write.
    fn write_block(&self, block: &[u8]) -> Result<()>;
}

/// SMI stream character device
#[derive(Debug)]
pub struct SmiDevice {
    path: PathBuf,
    file: File,
    io: IoHandle,
}

impl SmiDevice {
    /// Open the SMI stream device
    ///
    /// # Errors
    ///
    /// Returns error if the node is missing or cannot be opened.
    pub fn open(path: &Path) -> Result<Self> {
        tracing::debug!("Opening SMI stream device {}", path.display());
        if !path.exists() {
            return Err(SmiError::transport(format!(
                "{} not found (is smi_stream_dev loaded?)",
                path.display()
            )));
        }

        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let io = IoHandle::new(file.as_raw_fd());

        tracing::info!("Opened SMI stream device {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            file,
            io,
        })
    }

    /// Device node path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get raw file descriptor (for advanced use)
    pub fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl StreamPort for SmiDevice {
    fn native_block_len(&self) -> Result<usize> {
        let mut len: libc::size_t = 0;
        match self.io.ioctl_ptr(ioctl::GET_NATIVE_BUF_SIZE, &mut len) {
            Ok(_) if len > 0 => Ok(len),
            Ok(_) => Ok(DMA_BOUNCE_BUFFER_SIZE),
            Err(e) => {
                tracing::warn!(
                    "Native block size query failed ({e}), using {DMA_BOUNCE_BUFFER_SIZE} bytes"
                );
                Ok(DMA_BOUNCE_BUFFER_SIZE)
            }
        }
    }

    fn arm(&self, state: StreamState) -> Result<()> {
        tracing::debug!("SMI stream state -> {state:?} (address {:#04x})", state.address());
        self.io
            .ioctl_value(ioctl::SET_STREAM_STATUS, libc::c_ulong::from(state as u32))
            .map(|_| ())
    }

    fn wait_ready(&self, direction: StreamDirection, timeout: Duration) -> Result<bool> {
        let readiness = match direction {
            StreamDirection::Rx => Readiness::Readable,
            StreamDirection::Tx => Readiness::Writable,
        };
        self.io.poll_ready(readiness, timeout)
    }

    fn read_block(&self, block: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < block.len() {
            let n = self.io.read(&mut block[filled..])?;
            if n == 0 {
                return Err(SmiError::transport(format!(
                    "SMI read returned EOF after {filled} of {} bytes",
                    block.len()
                )));
            }
            filled += n;
        }
        Ok(())
    }

    fn write_block(&self, block: &[u8]) -> Result<()> {
        let mut sent = 0;
        while sent < block.len() {
            let n = self.io.write(&block[sent..])?;
            if n == 0 {
                return Err(SmiError::transport(format!(
                    "SMI write stalled after {sent} of {} bytes",
                    block.len()
                )));
            }
            sent += n;
        }
        Ok(())
    }
}

impl Drop for SmiDevice {
    fn drop(&mut self) {
        if let Err(e) = self.disarm() {
            tracing::warn!("Leaving {} armed: {e}", self.path.display());
        }
        tracing::info!("Closing SMI stream device {}", self.path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_node_is_reported() {
        let err = SmiDevice::open(Path::new("/dev/smi-does-not-exist")).unwrap_err();
        assert!(err.is_transport());
    }

    #[test]
    #[ignore] // Requires CaribouLite hardware with smi_stream_dev
    fn native_block_len_from_driver() {
        let dev = SmiDevice::open(Path::new(caribou_chip::smi::DEVICE_PATH)).unwrap();
        let len = dev.native_block_len().unwrap();
        assert!(len > 0 && len % 4 == 0);
    }
}
