//! GPIO access
//!
//! [`GpioPort`] is the seam between the bus/configurator logic and the pins.
//! [`MappedGpio`] drives the BCM2835 register window through `/dev/gpiomem`;
//! [`crate::backends::software::SoftGpio`] is the in-process stand-in.

use crate::error::{Result, SmiError};
use crate::mmio::MappedRegion;
use caribou_chip::gpio::{
    bank_location, fsel_location, function, pull, GPCLR0, GPLEV0, GPPUD, GPPUDCLK0,
    GPSET0, PIN_COUNT, WINDOW_SIZE,
};
use std::path::Path;
use std::sync::Mutex;

/// Pin function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PinMode {
    /// Input (also the released state)
    Input,
    /// Push-pull output
    Output,
    /// Alternate function 0..=5
    Alt(u8),
}

/// Pull resistor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Pull {
    /// No pull
    #[default]
    Off,
    /// Pull down
    Down,
    /// Pull up
    Up,
}

/// Pin-level access used by the bus and the configurator
pub trait GpioPort: Send + Sync + std::fmt::Debug {
    /// Set the pin function
    ///
    /// # Errors
    ///
    /// Returns error for an invalid pin or alternate function.
    fn set_mode(&self, pin: u8, mode: PinMode) -> Result<()>;

    /// Set the pull resistor
    ///
    /// # Errors
    ///
    /// Returns error for an invalid pin.
    fn set_pull(&self, pin: u8, pull: Pull) -> Result<()>;

    /// Drive an output pin
    ///
    /// # Errors
    ///
    /// Returns error for an invalid pin.
    fn write(&self, pin: u8, high: bool) -> Result<()>;

    /// Sample a pin
    ///
    /// # Errors
    ///
    /// Returns error for an invalid pin.
    fn read(&self, pin: u8) -> Result<bool>;
}

pub(crate) fn check_pin(pin: u8) -> Result<()> {
    if pin < PIN_COUNT {
        Ok(())
    } else {
        Err(SmiError::invalid_argument(format!(
            "GPIO{pin} out of range (0..{PIN_COUNT})"
        )))
    }
}

/// BCM2835 GPIO block mapped from `/dev/gpiomem`
#[derive(Debug)]
pub struct MappedGpio {
    regs: MappedRegion,
    // Function-select and pull updates are read-modify-write
    rmw: Mutex<()>,
}

impl MappedGpio {
    /// Map the GPIO register window
    ///
    /// # Errors
    ///
    /// Returns error if the node cannot be opened or mapped.
    pub fn open(path: &Path) -> Result<Self> {
        let regs = MappedRegion::open(path, WINDOW_SIZE)?;
        tracing::info!("GPIO window mapped from {}", path.display());
        Ok(Self {
            regs,
            rmw: Mutex::new(()),
        })
    }

    fn settle() {
        for _ in 0..pull::SETTLE_CYCLES {
            std::hint::spin_loop();
        }
    }
}

impl GpioPort for MappedGpio {
    fn set_mode(&self, pin: u8, mode: PinMode) -> Result<()> {
        check_pin(pin)?;
        let code = match mode {
            PinMode::Input => function::INPUT,
            PinMode::Output => function::OUTPUT,
            PinMode::Alt(n) => function::alt(n)
                .ok_or_else(|| SmiError::invalid_argument(format!("ALT{n} does not exist")))?,
        };
        let (offset, shift) = fsel_location(pin);

        let _guard = self.rmw.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let value = self.regs.read32(offset);
        self.regs
            .write32(offset, (value & !(0b111 << shift)) | (code << shift));
        Ok(())
    }

    fn set_pull(&self, pin: u8, resistor: Pull) -> Result<()> {
        check_pin(pin)?;
        let code = match resistor {
            Pull::Off => pull::OFF,
            Pull::Down => pull::DOWN,
            Pull::Up => pull::UP,
        };
        let (clk_offset, mask) = bank_location(GPPUDCLK0, pin);

        let _guard = self.rmw.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        self.regs.write32(GPPUD, code);
        Self::settle();
        self.regs.write32(clk_offset, mask);
        Self::settle();
        self.regs.write32(GPPUD, 0);
        self.regs.write32(clk_offset, 0);
        Ok(())
    }

    fn write(&self, pin: u8, high: bool) -> Result<()> {
        check_pin(pin)?;
        let base = if high { GPSET0 } else { GPCLR0 };
        let (offset, mask) = bank_location(base, pin);
        self.regs.write32(offset, mask);
        Ok(())
    }

    fn read(&self, pin: u8) -> Result<bool> {
        check_pin(pin)?;
        let (offset, mask) = bank_location(GPLEV0, pin);
        Ok(self.regs.read32(offset) & mask != 0)
    }
}
