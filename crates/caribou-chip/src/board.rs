//! Reference CaribouLite HAT wiring.
//!
//! All pin numbers are BCM GPIO numbers on the Raspberry Pi 40-pin header.
//! The HAT shares one SPI bus (SPI1 pins) between the FPGA, the modem and
//! the mixer; each chip has its own select line.
//!
//! ```text
//! Signal            GPIO   Notes
//! ───────────────── ────── ─────────────────────────────────────────
//! SPI MISO           19    shared
//! SPI MOSI           20    shared
//! SPI SCK            21    shared
//! FPGA SS            18    also the iCE40 SPI_SS during configuration
//! FPGA CDONE         27    input, high once configured
//! FPGA CRESET        26    active low
//! FPGA soft reset     4
//! Modem SS           17    spidev1.1
//! Modem IRQ          22
//! Modem reset        23
//! Mixer SS (ENX)     16    three-wire, bit-banged
//! Mixer reset         5
//! ```

/// Shared SPI bus pins.
pub mod spi {
    /// Kernel SPI controller index (`/dev/spidev1.*`).
    pub const KERNEL_BUS: u8 = 1;
    /// MISO.
    pub const MISO: u8 = 19;
    /// MOSI.
    pub const MOSI: u8 = 20;
    /// SCK.
    pub const SCK: u8 = 21;
    /// Alternate function routing the bus pins to the SPI1 controller.
    pub const ALT_FUNCTION: u8 = 4;
}

/// iCE40 FPGA pins.
pub mod fpga {
    /// Select line (SPI_SS), also the communication-port select.
    pub const SELECT: u8 = 18;
    /// CDONE, high when a bitstream has been accepted.
    pub const DONE: u8 = 27;
    /// CRESET_B, active low.
    pub const RESET: u8 = 26;
    /// Soft reset into the loaded design.
    pub const SOFT_RESET: u8 = 4;
    /// spidev chip select for the FPGA communication port.
    pub const KERNEL_CHIP_SELECT: u8 = 0;
    /// Clock used while loading a bitstream (Hz).
    pub const PROGRAM_CLOCK_HZ: u32 = 5_000_000;
    /// Clock used by the communication port once configured (Hz).
    pub const COMM_CLOCK_HZ: u32 = 2_000_000;
}

/// AT86RF215 modem pins.
pub mod modem {
    /// Select line.
    pub const SELECT: u8 = 17;
    /// Interrupt line.
    pub const IRQ: u8 = 22;
    /// Reset line.
    pub const RESET: u8 = 23;
    /// spidev chip select.
    pub const KERNEL_CHIP_SELECT: u8 = 1;
    /// Bus clock (Hz).
    pub const CLOCK_HZ: u32 = 5_000_000;
}

/// RFFC507x mixer pins.
pub mod mixer {
    /// ENX, the three-wire enable.
    pub const SELECT: u8 = 16;
    /// Reset line.
    pub const RESET: u8 = 5;
    /// Bus clock (Hz).
    pub const CLOCK_HZ: u32 = 5_000_000;
}

/// Every select line used on the reference HAT.
pub const ALL_SELECT_LINES: &[u8] = &[fpga::SELECT, modem::SELECT, mixer::SELECT];
