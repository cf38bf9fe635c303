//! Linux `spidev` user-space interface (`linux/spi/spidev.h`).
//!
//! Only the requests the driver issues are listed. Encoding follows the
//! generic `_IOC` layout: `dir << 30 | size << 16 | type << 8 | nr`.

/// spidev ioctl magic (`'k'`).
pub const IOC_MAGIC: u8 = b'k';

const IOC_WRITE: u64 = 1;

/// `_IOW(type, nr, size)`.
#[must_use]
pub const fn iow(ty: u8, nr: u8, size: usize) -> u64 {
    (IOC_WRITE << 30) | ((size as u64) << 16) | ((ty as u64) << 8) | nr as u64
}

/// Size of `struct spi_ioc_transfer`.
pub const TRANSFER_DESCRIPTOR_SIZE: usize = 32;

/// Default `spidev.bufsiz`: the largest single message the kernel accepts.
pub const DEFAULT_BUFSIZ: usize = 4096;

/// `SPI_IOC_MESSAGE(n)` for `n` descriptors.
#[must_use]
pub const fn message(n: usize) -> u64 {
    iow(IOC_MAGIC, 0, TRANSFER_DESCRIPTOR_SIZE * n)
}

/// ioctl command numbers.
pub mod ioctl {
    use super::{iow, IOC_MAGIC};

    /// `SPI_IOC_WR_MODE` (u8).
    pub const WR_MODE: u64 = iow(IOC_MAGIC, 1, 1);
    /// `SPI_IOC_WR_BITS_PER_WORD` (u8).
    pub const WR_BITS_PER_WORD: u64 = iow(IOC_MAGIC, 3, 1);
    /// `SPI_IOC_WR_MAX_SPEED_HZ` (u32).
    pub const WR_MAX_SPEED_HZ: u64 = iow(IOC_MAGIC, 4, 4);
}

/// Mode flag bits (`SPI_CPHA`, `SPI_CPOL`).
pub mod mode {
    /// Clock phase.
    pub const CPHA: u8 = 0x01;
    /// Clock polarity.
    pub const CPOL: u8 = 0x02;
}
