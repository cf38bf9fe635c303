//! BCM2835/BCM2711 GPIO register window.
//!
//! The window is exposed unprivileged through `/dev/gpiomem`, which maps the
//! GPIO block at offset 0. Offsets below are byte offsets into that window.
//!
//! ```text
//! 0x00-0x14  GPFSEL0..5   3 bits per pin, 10 pins per register
//! 0x1c-0x20  GPSET0..1    write 1 to drive high
//! 0x28-0x2c  GPCLR0..1    write 1 to drive low
//! 0x34-0x38  GPLEV0..1    current pin level
//! 0x94       GPPUD        pull control (legacy sequence)
//! 0x98-0x9c  GPPUDCLK0..1 pull clock
//! ```

/// Size of the mapping requested from `/dev/gpiomem`.
pub const WINDOW_SIZE: usize = 4096;

/// Number of GPIO lines addressed by the register layout.
pub const PIN_COUNT: u8 = 54;

/// First function-select register.
pub const GPFSEL0: usize = 0x00;
/// First output-set register.
pub const GPSET0: usize = 0x1C;
/// First output-clear register.
pub const GPCLR0: usize = 0x28;
/// First pin-level register.
pub const GPLEV0: usize = 0x34;
/// Pull-up/down enable.
pub const GPPUD: usize = 0x94;
/// First pull-up/down clock register.
pub const GPPUDCLK0: usize = 0x98;

/// Function-select codes (3 bits per pin).
pub mod function {
    /// Input.
    pub const INPUT: u32 = 0b000;
    /// Output.
    pub const OUTPUT: u32 = 0b001;
    /// Alternate function 0.
    pub const ALT0: u32 = 0b100;
    /// Alternate function 1.
    pub const ALT1: u32 = 0b101;
    /// Alternate function 2.
    pub const ALT2: u32 = 0b110;
    /// Alternate function 3.
    pub const ALT3: u32 = 0b111;
    /// Alternate function 4 (SPI1 on pins 19-21).
    pub const ALT4: u32 = 0b011;
    /// Alternate function 5.
    pub const ALT5: u32 = 0b010;

    /// Code for alternate function `n` (0..=5).
    #[must_use]
    pub const fn alt(n: u8) -> Option<u32> {
        match n {
            0 => Some(ALT0),
            1 => Some(ALT1),
            2 => Some(ALT2),
            3 => Some(ALT3),
            4 => Some(ALT4),
            5 => Some(ALT5),
            _ => None,
        }
    }
}

/// `GPPUD` values.
pub mod pull {
    /// No pull.
    pub const OFF: u32 = 0;
    /// Pull down.
    pub const DOWN: u32 = 1;
    /// Pull up.
    pub const UP: u32 = 2;
    /// Cycles to hold the pull clock, per the legacy programming sequence.
    pub const SETTLE_CYCLES: u32 = 150;
}

/// Byte offset of the function-select register and bit shift for `pin`.
#[must_use]
pub const fn fsel_location(pin: u8) -> (usize, u32) {
    let reg = GPFSEL0 + (pin as usize / 10) * 4;
    let shift = (pin as u32 % 10) * 3;
    (reg, shift)
}

/// Byte offset of the 32-pin bank register for `pin` relative to `base`
/// (one of [`GPSET0`], [`GPCLR0`], [`GPLEV0`], [`GPPUDCLK0`]) and the pin mask.
#[must_use]
pub const fn bank_location(base: usize, pin: u8) -> (usize, u32) {
    (base + (pin as usize / 32) * 4, 1 << (pin % 32))
}
