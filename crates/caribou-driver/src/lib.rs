//! Pure Rust data-path driver for the CaribouLite SDR HAT.
//!
//! Four components, leaves first:
//!
//! | Component | Type | Role |
//! |-----------|------|------|
//! | Chip register bus | [`ChipBus`] | one mutex-serialized serial bus shared by the FPGA, modem and mixer |
//! | Logic-device configurator | [`LogicConfigurator`] | iCE40 bitstream load over the bus + CRESET_B/CDONE |
//! | Streaming buffer engine | [`SmiStream`] | per-direction worker moving ping/pong blocks between SMI DMA and callbacks |
//! | Bounded concurrent queue | [`BlockQueue`] | thread-safe double-ended handoff of owned blocks |
//!
//! # Backends
//!
//! ```text
//! Hardware (Raspberry Pi + HAT):
//!   MappedGpio    — /dev/gpiomem register window
//!   PinTransport  — GPIO bit-bang + /dev/spidevB.C
//!   SmiDevice     — /dev/smi (smi_stream_dev)
//!
//! Software (CI, no board):
//!   SoftGpio, SoftTransport, VirtualSmi
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use caribou_driver::prelude::*;
//! use std::sync::Arc;
//!
//! # fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! let config = DriverConfig::from_env();
//! let board = open_board(&config)?;
//! board.bus.init()?;
//!
//! let fpga = LogicConfigurator::new(
//!     Arc::clone(&board.bus),
//!     Arc::clone(&board.gpio),
//!     config.configurator,
//!     config.timing,
//! );
//! fpga.init()?;
//! fpga.configure_from_reader(std::fs::File::open("top.bin")?)?;
//!
//! let address = StreamAddress::for_channel(StreamDirection::Rx, 0)?;
//! let mut rx = SmiStream::init(
//!     Arc::clone(&board.smi),
//!     address,
//!     StreamDirection::Rx,
//!     &config.stream,
//!     |block| println!("block {} on slot {}", block.sequence, block.slot),
//!     |_, event| println!("{event:?}"),
//! )?;
//! rx.set_state(true)?;
//! std::thread::sleep(std::time::Duration::from_secs(1));
//! rx.set_state(false)?;
//! rx.release()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

pub mod backends;
pub mod bus;
pub mod config;
mod error;
pub mod fpga;
pub mod gpio;
mod io;
pub mod mmio;
pub mod queue;
pub mod stream;

pub use backends::{open_board, Board};
pub use bus::{
    BitFraming, BusTransport, ChipBus, ChipHandle, ChipSpec, PinTransport, SelectControl,
    SpiMode, SpidevId, TransferDirection, TransferDiscipline, MAX_CHIPS,
};
pub use config::{BusPins, ConfigureTiming, ConfiguratorPins, DriverConfig, StreamConfig};
pub use error::{Result, SmiError};
pub use fpga::{ConfigState, LogicConfigurator, ResetLevel};
pub use gpio::{GpioPort, MappedGpio, PinMode, Pull};
pub use queue::BlockQueue;
pub use stream::{
    SmiDevice, SmiStream, StreamAddress, StreamBlock, StreamDirection, StreamEvent, StreamFault,
    StreamPort, StreamStats,
};

/// Board wiring and silicon constants (re-exported from caribou-chip).
pub mod chip {
    pub use caribou_chip::{board, gpio, ice40, rffc, smi, spidev};
}

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        open_board, BlockQueue, ChipBus, ChipSpec, ConfigState, DriverConfig, LogicConfigurator,
        ResetLevel, Result, SmiError, SmiStream, SpiMode, StreamAddress, StreamBlock,
        StreamDirection, StreamEvent, TransferDiscipline,
    };
}
