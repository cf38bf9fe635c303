//! SMI stream character device (`smi_stream_dev`) interface.
//!
//! The kernel module extends the stock `bcm2835_smi` ioctl set. Every command
//! is encoded as a plain `_IO(type, nr)`, including the one that copies the
//! native buffer size back to user space.
//!
//! The SMI address bus is five bits wide (`SA[4:0]`). The module drives two of
//! those bits from the stream state: one for the direction and one for the
//! receive channel. Their positions are module parameters; the defaults below
//! are the values shipped in `modprobe.d`.

/// Character device node created by the module.
pub const DEVICE_PATH: &str = "/dev/smi";

/// `bcm2835_smi` ioctl magic.
pub const IOC_MAGIC: u8 = 0x1;
/// Highest stock `bcm2835_smi` ioctl number.
pub const IOC_MAX: u8 = 2;

/// `_IO(type, nr)` for the no-direction, no-size encoding.
#[must_use]
pub const fn io(ty: u8, nr: u8) -> u64 {
    ((ty as u64) << 8) | nr as u64
}

/// ioctl command numbers.
pub mod ioctl {
    use super::{io, IOC_MAGIC, IOC_MAX};

    /// Read the SMI timing settings.
    pub const GET_SETTINGS: u64 = io(IOC_MAGIC, 0);
    /// Write the SMI timing settings.
    pub const WRITE_SETTINGS: u64 = io(IOC_MAGIC, 1);
    /// Set the SMI address lines.
    pub const ADDRESS: u64 = io(IOC_MAGIC, 2);
    /// Copy the native DMA block length (`size_t`) to user space.
    pub const GET_NATIVE_BUF_SIZE: u64 = io(IOC_MAGIC, IOC_MAX + 1);
    /// Non-blocking read mode.
    pub const SET_NON_BLOCK_READ: u64 = io(IOC_MAGIC, IOC_MAX + 2);
    /// Non-blocking write mode.
    pub const SET_NON_BLOCK_WRITE: u64 = io(IOC_MAGIC, IOC_MAX + 3);
    /// Select the stream state (see [`super::StreamState`]).
    pub const SET_STREAM_STATUS: u64 = io(IOC_MAGIC, IOC_MAX + 4);
}

/// Size of one DMA bounce buffer in the kernel (bytes).
///
/// Used when the module does not answer `GET_NATIVE_BUF_SIZE`.
pub const DMA_BOUNCE_BUFFER_SIZE: usize = 32 * 1024;

/// Number of stream addresses (`SA[4:0]`).
pub const ADDRESS_COUNT: u8 = 32;

/// Default bit offset of the direction flag in the SMI address.
pub const ADDR_DIR_OFFSET: u8 = 2;
/// Default bit offset of the channel flag in the SMI address.
pub const ADDR_CH_OFFSET: u8 = 3;

/// Direction flag: host writes, device reads.
pub const DIR_SMI_TO_DEVICE: u8 = 0;
/// Direction flag: device writes, host reads.
pub const DIR_DEVICE_TO_SMI: u8 = 1;

/// Kernel stream state, the argument of [`ioctl::SET_STREAM_STATUS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum StreamState {
    /// No DMA in flight.
    Idle = 0,
    /// Receive from channel 0 (sub-GHz).
    RxChannel0 = 1,
    /// Receive from channel 1 (2.4 GHz).
    RxChannel1 = 2,
    /// Transmit.
    Tx = 3,
}

impl StreamState {
    /// SMI address the module drives for this state, using the default
    /// direction and channel offsets.
    #[must_use]
    pub const fn address(self) -> u8 {
        address_for(self, ADDR_DIR_OFFSET, ADDR_CH_OFFSET)
    }
}

/// SMI address for `state` with explicit bit offsets.
#[must_use]
pub const fn address_for(state: StreamState, dir_offset: u8, ch_offset: u8) -> u8 {
    match state {
        StreamState::Idle | StreamState::RxChannel0 => DIR_DEVICE_TO_SMI << dir_offset,
        StreamState::RxChannel1 => (DIR_DEVICE_TO_SMI << dir_offset) | (1 << ch_offset),
        StreamState::Tx => DIR_SMI_TO_DEVICE << dir_offset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_ioctls_extend_stock_set() {
        assert_eq!(ioctl::ADDRESS, 0x0102);
        assert_eq!(ioctl::GET_NATIVE_BUF_SIZE, 0x0103);
        assert_eq!(ioctl::SET_STREAM_STATUS, 0x0106);
    }

    #[test]
    fn addresses_fit_in_five_bits() {
        for state in [
            StreamState::Idle,
            StreamState::RxChannel0,
            StreamState::RxChannel1,
            StreamState::Tx,
        ] {
            assert!(state.address() < ADDRESS_COUNT);
        }
    }

    #[test]
    fn receive_channels_differ_only_in_channel_bit() {
        let a = StreamState::RxChannel0.address();
        let b = StreamState::RxChannel1.address();
        assert_eq!(a ^ b, 1 << ADDR_CH_OFFSET);
        assert_ne!(StreamState::Tx.address(), a);
    }
}
