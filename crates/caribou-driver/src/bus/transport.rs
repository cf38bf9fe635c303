//! Hardware bus transport
//!
//! Routes the shared pins either to the SPI1 controller (alternate function)
//! or to plain GPIO for bit-banging, depending on which endpoint owns the bus.

use crate::config::BusPins;
use crate::error::{Result, SmiError};
use crate::gpio::{GpioPort, PinMode};
use caribou_chip::board;
use std::path::PathBuf;
use std::sync::Arc;

use super::bitbang::BitBang;
use super::spidev::SpidevPort;
use super::{BitFraming, BusTransport, ChipSpec, TransferDirection, TransferDiscipline, MAX_CHIPS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PinMux {
    Released,
    Gpio,
    Controller,
}

/// GPIO + spidev transport for the reference HAT
#[derive(Debug)]
pub struct PinTransport {
    gpio: Arc<dyn GpioPort>,
    pins: BusPins,
    spidev_root: PathBuf,
    kernel: [Option<SpidevPort>; MAX_CHIPS],
    mux: PinMux,
}

impl PinTransport {
    /// Transport over `gpio` with spidev nodes under `spidev_root`
    pub fn new(gpio: Arc<dyn GpioPort>, pins: BusPins, spidev_root: impl Into<PathBuf>) -> Self {
        Self {
            gpio,
            pins,
            spidev_root: spidev_root.into(),
            kernel: std::array::from_fn(|_| None),
            mux: PinMux::Released,
        }
    }

    fn route(&mut self, wanted: PinMux) -> Result<()> {
        if self.mux == wanted {
            return Ok(());
        }
        let BusPins { miso, mosi, sck } = self.pins;
        match wanted {
            PinMux::Controller => {
                let alt = PinMode::Alt(board::spi::ALT_FUNCTION);
                for pin in [miso, mosi, sck] {
                    self.gpio.set_mode(pin, alt)?;
                }
            }
            PinMux::Gpio => {
                // Direction of the data lines is set per transfer by the bit-bang engine
                self.gpio.set_mode(sck, PinMode::Output)?;
            }
            PinMux::Released => {
                for pin in [miso, mosi, sck] {
                    self.gpio.set_mode(pin, PinMode::Input)?;
                }
            }
        }
        tracing::debug!("Bus pins routed {:?} -> {wanted:?}", self.mux);
        self.mux = wanted;
        Ok(())
    }

    fn bitbang_transfer(
        &mut self,
        spec: &ChipSpec,
        tx: &[u8],
        rx: &mut [u8],
        direction: TransferDirection,
    ) -> Result<()> {
        self.route(PinMux::Gpio)?;
        let bb = BitBang::new(
            self.gpio.as_ref(),
            self.pins.sck,
            self.pins.mosi,
            self.pins.miso,
            spec,
        );
        bb.claim()?;

        match (spec.framing, direction) {
            (BitFraming::Standard, TransferDirection::Write) => bb.exchange(tx, &mut []),
            (BitFraming::Standard, TransferDirection::Read) => {
                let mut scratch = vec![0u8; rx.len()];
                let n = tx.len().min(scratch.len());
                scratch[..n].copy_from_slice(&tx[..n]);
                bb.exchange(&scratch, rx)
            }
            (BitFraming::Standard, TransferDirection::Exchange) => bb.exchange(tx, rx),
            (BitFraming::ThreeWireRegister, TransferDirection::Write) => match tx {
                [register, hi, lo] => bb.three_wire_write(*register, u16::from_be_bytes([*hi, *lo])),
                _ => Err(SmiError::invalid_argument(
                    "three-wire write takes [register, value_hi, value_lo]",
                )),
            },
            (BitFraming::ThreeWireRegister, TransferDirection::Read) => match (tx, rx) {
                ([register], [hi, lo]) => {
                    let [h, l] = bb.three_wire_read(*register)?.to_be_bytes();
                    *hi = h;
                    *lo = l;
                    Ok(())
                }
                _ => Err(SmiError::invalid_argument(
                    "three-wire read takes [register] and a two byte buffer",
                )),
            },
            (BitFraming::ThreeWireRegister, TransferDirection::Exchange) => Err(
                SmiError::invalid_argument("three-wire endpoints are half duplex"),
            ),
        }
    }
}

impl BusTransport for PinTransport {
    fn open(&mut self) -> Result<()> {
        self.route(PinMux::Released)?;
        tracing::info!(
            "Bus pins MISO=GPIO{} MOSI=GPIO{} SCK=GPIO{}",
            self.pins.miso,
            self.pins.mosi,
            self.pins.sck
        );
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        for port in &mut self.kernel {
            port.take();
        }
        self.route(PinMux::Released)
    }

    fn attach(&mut self, slot: usize, spec: &ChipSpec) -> Result<()> {
        if spec.discipline != TransferDiscipline::Poll {
            let id = spec.kernel_device.ok_or_else(|| {
                SmiError::invalid_argument(format!("{} has no kernel device", spec.name))
            })?;
            let path = self
                .spidev_root
                .join(format!("spidev{}.{}", id.bus, id.chip_select));
            self.kernel[slot] = Some(SpidevPort::open(&path, spec)?);
        }

        // Select lines are active low
        self.gpio.set_mode(spec.select_line, PinMode::Output)?;
        self.gpio.write(spec.select_line, true)
    }

    fn detach(&mut self, slot: usize, spec: &ChipSpec) -> Result<()> {
        self.kernel[slot] = None;
        self.gpio.set_mode(spec.select_line, PinMode::Input)
    }

    fn set_select(&mut self, spec: &ChipSpec, asserted: bool) -> Result<()> {
        self.gpio.write(spec.select_line, !asserted)
    }

    fn transfer(
        &mut self,
        slot: usize,
        spec: &ChipSpec,
        tx: &[u8],
        rx: &mut [u8],
        direction: TransferDirection,
    ) -> Result<()> {
        match spec.discipline {
            TransferDiscipline::Poll => self.bitbang_transfer(spec, tx, rx, direction),
            TransferDiscipline::Interrupt | TransferDiscipline::Dma => {
                self.route(PinMux::Controller)?;
                let port = self.kernel[slot]
                    .as_ref()
                    .ok_or_else(|| SmiError::transport(format!("{} is not attached", spec.name)))?;
                match direction {
                    TransferDirection::Write => port.transfer(tx, &mut []),
                    TransferDirection::Read | TransferDirection::Exchange => port.transfer(tx, rx),
                }
            }
        }
    }

    fn suspend(&mut self, suspended: bool) -> Result<()> {
        if suspended {
            self.route(PinMux::Released)
        } else {
            // Routed again lazily by the next transfer
            Ok(())
        }
    }
}
