//! Backend implementations
//!
//! Hardware backends live next to the component they serve
//! ([`crate::gpio::MappedGpio`], [`crate::bus::PinTransport`],
//! [`crate::stream::SmiDevice`]). This module holds the in-process software
//! backends and [`open_board`], which wires the hardware ones together.

pub mod software;

pub use software::{FillPattern, SoftGpio, SoftTransport, VirtualSmi};

use crate::bus::{ChipBus, PinTransport};
use crate::config::DriverConfig;
use crate::error::Result;
use crate::gpio::{GpioPort, MappedGpio};
use crate::stream::{SmiDevice, StreamPort};
use std::sync::Arc;

/// Hardware handles for one HAT
#[derive(Debug)]
pub struct Board {
    /// GPIO register window
    pub gpio: Arc<dyn GpioPort>,
    /// Shared chip bus (not yet initialized)
    pub bus: Arc<ChipBus>,
    /// SMI stream device
    pub smi: Arc<dyn StreamPort>,
}

/// Open the GPIO window, build the chip bus and open the SMI device
///
/// # Errors
///
/// Returns error if any device node cannot be opened.
pub fn open_board(config: &DriverConfig) -> Result<Board> {
    let gpio: Arc<dyn GpioPort> = Arc::new(MappedGpio::open(&config.gpiomem)?);
    let transport = PinTransport::new(Arc::clone(&gpio), config.bus, &config.spidev_root);
    let bus = Arc::new(ChipBus::new(transport));
    let smi: Arc<dyn StreamPort> = Arc::new(SmiDevice::open(&config.smi_device)?);
    tracing::info!("Board opened");
    Ok(Board { gpio, bus, smi })
}
