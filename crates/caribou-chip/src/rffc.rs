//! RFFC507x three-wire register framing.
//!
//! The mixer uses a single bidirectional data line (SDATA), a clock (SCLK)
//! and an active-low enable (ENX). A write is one 25-bit frame; a read is a
//! 9-bit command followed by one turnaround clock and 16 data bits clocked
//! back on the same line.
//!
//! ```text
//! write:  0 0 | A6..A0 | D15..D0                 25 bits, MSB first
//! read:   0 1 | A6..A0 | turnaround | D15..D0    9 bits out, 1 idle, 16 in
//! ```
//!
//! The device also needs two clocks with ENX high before a frame and one
//! after it. That is not in the datasheet but it does not latch without them.

/// Register address width.
pub const ADDRESS_BITS: u32 = 7;
/// Register address mask.
pub const ADDRESS_MASK: u8 = 0x7F;
/// Bits in a write frame.
pub const WRITE_FRAME_BITS: u32 = 25;
/// Bits in a read command.
pub const READ_COMMAND_BITS: u32 = 9;
/// Data bits returned by a read.
pub const READ_DATA_BITS: u32 = 16;
/// Read flag in the command.
pub const READ_FLAG: u32 = 0x80;
/// Idle clocks with ENX high before a frame.
pub const LEAD_CLOCKS: u32 = 2;
/// Idle clocks with ENX high after a frame.
pub const TRAIL_CLOCKS: u32 = 1;

/// Encode a register write as a right-aligned frame of [`WRITE_FRAME_BITS`].
#[must_use]
pub const fn write_frame(register: u8, value: u16) -> u32 {
    (((register & ADDRESS_MASK) as u32) << 16) | value as u32
}

/// Encode a register read command as a right-aligned frame of
/// [`READ_COMMAND_BITS`].
#[must_use]
pub const fn read_command(register: u8) -> u32 {
    READ_FLAG | (register & ADDRESS_MASK) as u32
}
