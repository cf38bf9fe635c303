//! Lattice iCE40 slave-SPI configuration timing.
//!
//! Values follow the iCE40 programming and configuration guide (TN1248),
//! with the margins the CaribouLite loader has always used on top of them.
//!
//! ```text
//! CRESET_B  ‾‾‾‾\______________/‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾
//! SPI_SS    ‾‾‾‾\____________________________/‾‾‾‾‾\_________/‾‾‾‾‾‾‾‾‾
//!                  >= 200 µs       >= 1200 µs   8 clk  image   >= 49 clk
//! CDONE     ‾‾‾‾‾‾‾\_____________________________________________/‾‾‾‾‾‾
//! ```

use core::time::Duration;

/// Minimum width of the CRESET_B low pulse.
pub const RESET_PULSE_MIN: Duration = Duration::from_micros(200);

/// Housekeeping delay after releasing CRESET_B before the first clock.
pub const HOUSEKEEPING_DELAY: Duration = Duration::from_micros(1200);

/// Settle time used around each reset-pin edge by an out-of-band reset.
pub const HARD_RESET_SETTLE: Duration = Duration::from_millis(1);

/// Dummy bytes clocked with SPI_SS high before the image (8 clocks).
pub const LEADING_DUMMY_BYTES: usize = 1;

/// Dummy bytes clocked after the image (64 clocks, at least 49 required).
pub const TRAILING_DUMMY_BYTES: usize = 8;

/// Minimum trailing clocks the device needs to enter user mode.
pub const TRAILING_CLOCKS_MIN: usize = 49;

/// Image bytes sent per bus transfer.
pub const CHUNK_LEN: usize = 512;

/// Bound on polls of CDONE while waiting for it to fall under reset.
pub const DONE_LOW_POLLS: u32 = 200;

/// Default bound on the wait for CDONE to rise after the image.
pub const DONE_TIMEOUT: Duration = Duration::from_millis(100);
