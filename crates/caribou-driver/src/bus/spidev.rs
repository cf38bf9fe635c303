//! Kernel spidev transport for interrupt and DMA endpoints

use crate::error::{Result, SmiError};
use crate::io::IoHandle;
use caribou_chip::spidev::{self, ioctl};
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::Path;

use super::{ChipSpec, TransferDiscipline};

/// `struct spi_ioc_transfer`
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
struct SpiIocTransfer {
    tx_buf: u64,
    rx_buf: u64,
    len: u32,
    speed_hz: u32,
    delay_usecs: u16,
    bits_per_word: u8,
    cs_change: u8,
    tx_nbits: u8,
    rx_nbits: u8,
    word_delay_usecs: u8,
    pad: u8,
}

const _: () = assert!(std::mem::size_of::<SpiIocTransfer>() == spidev::TRANSFER_DESCRIPTOR_SIZE);

/// Open spidev node bound to one endpoint
#[derive(Debug)]
pub(super) struct SpidevPort {
    file: File,
    speed_hz: u32,
    max_message: usize,
    chunked: bool,
}

impl SpidevPort {
    pub(super) fn open(path: &Path, spec: &ChipSpec) -> Result<Self> {
        tracing::debug!("Opening {} for {}", path.display(), spec.name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| SmiError::transport(format!("Cannot open {}: {e}", path.display())))?;

        let io = IoHandle::new(file.as_raw_fd());
        let mut mode = spec.mode.bits();
        io.ioctl_ptr(ioctl::WR_MODE, &mut mode)?;
        let mut bits: u8 = 8;
        io.ioctl_ptr(ioctl::WR_BITS_PER_WORD, &mut bits)?;
        let mut speed = spec.clock_hz;
        io.ioctl_ptr(ioctl::WR_MAX_SPEED_HZ, &mut speed)?;

        tracing::info!(
            "{} bound to {} ({} Hz, mode {})",
            spec.name,
            path.display(),
            spec.clock_hz,
            spec.mode.bits()
        );
        Ok(Self {
            file,
            speed_hz: spec.clock_hz,
            max_message: spidev::DEFAULT_BUFSIZ,
            chunked: spec.discipline == TransferDiscipline::Dma,
        })
    }

    fn message(&self, tx: Option<&[u8]>, rx: Option<&mut [u8]>, len: usize) -> Result<()> {
        let mut xfer = SpiIocTransfer {
            tx_buf: tx.map_or(0, |b| b.as_ptr() as u64),
            rx_buf: rx.map_or(0, |b| b.as_mut_ptr() as u64),
            len: u32::try_from(len)
                .map_err(|_| SmiError::invalid_argument("spidev message too long"))?,
            speed_hz: self.speed_hz,
            bits_per_word: 8,
            ..SpiIocTransfer::default()
        };
        IoHandle::new(self.file.as_raw_fd()).ioctl_ptr(spidev::message(1), &mut xfer)?;
        Ok(())
    }

    /// Exchange bytes; `tx` or `rx` may be empty for one-directional transfers
    pub(super) fn transfer(&self, tx: &[u8], rx: &mut [u8]) -> Result<()> {
        let len = tx.len().max(rx.len());
        if len > self.max_message && !self.chunked {
            return Err(SmiError::invalid_argument(format!(
                "{len} bytes exceeds the {} byte spidev message limit",
                self.max_message
            )));
        }

        let mut offset = 0;
        while offset < len {
            let end = (offset + self.max_message).min(len);
            let tx_part = tx.get(offset..end.min(tx.len())).filter(|p| !p.is_empty());
            let rx_end = end.min(rx.len());
            let rx_part = if offset < rx_end {
                Some(&mut rx[offset..rx_end])
            } else {
                None
            };

            // A short buffer would let the kernel walk past its end
            if tx_part.is_some_and(|p| p.len() < end - offset)
                || rx_part.as_ref().is_some_and(|p| p.len() < end - offset)
            {
                let mut tx_full = vec![0u8; end - offset];
                if let Some(p) = tx_part {
                    tx_full[..p.len()].copy_from_slice(p);
                }
                let mut rx_full = vec![0u8; end - offset];
                self.message(Some(&tx_full), Some(&mut rx_full), end - offset)?;
                if let Some(p) = rx_part {
                    let n = p.len();
                    p.copy_from_slice(&rx_full[..n]);
                }
            } else {
                self.message(tx_part, rx_part, end - offset)?;
            }
            offset = end;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::SpiMode;

    #[test]
    #[ignore] // Requires a Raspberry Pi with the SPI1 overlay
    fn modem_node_opens() {
        let spec = ChipSpec::new(17, 5_000_000, SpiMode::Mode0, TransferDiscipline::Interrupt)
            .with_kernel_device(1, 1);
        let port = SpidevPort::open(Path::new("/dev/spidev1.1"), &spec).unwrap();
        let mut rx = [0u8; 2];
        port.transfer(&[0x00, 0x00], &mut rx).unwrap();
    }

    #[test]
    fn descriptor_layout() {
        assert_eq!(std::mem::size_of::<SpiIocTransfer>(), 32);
    }
}
