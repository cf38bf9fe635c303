//! GPIO bit-bang engine for polled endpoints

use crate::error::Result;
use crate::gpio::{GpioPort, PinMode};
use caribou_chip::rffc;
use std::time::{Duration, Instant};

use super::{ChipSpec, SpiMode};

/// One bit-banged exchange context, built per transfer
pub(super) struct BitBang<'a> {
    gpio: &'a dyn GpioPort,
    sck: u8,
    mosi: u8,
    miso: u8,
    half_period: Duration,
    mode: SpiMode,
}

fn spin_for(duration: Duration) {
    let start = Instant::now();
    while start.elapsed() < duration {
        std::hint::spin_loop();
    }
}

impl<'a> BitBang<'a> {
    pub(super) fn new(gpio: &'a dyn GpioPort, sck: u8, mosi: u8, miso: u8, spec: &ChipSpec) -> Self {
        let (mosi, miso) = if spec.swap_data_lines {
            (miso, mosi)
        } else {
            (mosi, miso)
        };
        let half_period_ns = 500_000_000 / u64::from(spec.clock_hz.max(1));
        Self {
            gpio,
            sck,
            mosi,
            miso,
            half_period: Duration::from_nanos(half_period_ns.max(1)),
            mode: spec.mode,
        }
    }

    /// Drive the pins to their idle levels
    pub(super) fn claim(&self) -> Result<()> {
        self.gpio.set_mode(self.sck, PinMode::Output)?;
        self.gpio.set_mode(self.mosi, PinMode::Output)?;
        self.gpio.set_mode(self.miso, PinMode::Input)?;
        self.gpio.write(self.sck, self.mode.cpol())?;
        self.gpio.write(self.mosi, false)
    }

    fn clock(&self, active: bool) -> Result<()> {
        // Active level is the opposite of the idle polarity
        self.gpio.write(self.sck, active != self.mode.cpol())
    }

    fn exchange_bit(&self, out: bool, sample_pin: u8) -> Result<bool> {
        let bit;
        if self.mode.cpha() {
            self.clock(true)?;
            self.gpio.write(self.mosi, out)?;
            spin_for(self.half_period);
            self.clock(false)?;
            bit = self.gpio.read(sample_pin)?;
            spin_for(self.half_period);
        } else {
            self.gpio.write(self.mosi, out)?;
            spin_for(self.half_period);
            self.clock(true)?;
            bit = self.gpio.read(sample_pin)?;
            spin_for(self.half_period);
            self.clock(false)?;
        }
        Ok(bit)
    }

    fn exchange_byte(&self, out: u8) -> Result<u8> {
        let mut value = 0u8;
        for i in (0..8).rev() {
            let bit = self.exchange_bit(out & (1 << i) != 0, self.miso)?;
            value = (value << 1) | u8::from(bit);
        }
        Ok(value)
    }

    /// Full-duplex byte exchange; `rx` may be shorter than `tx` or empty
    pub(super) fn exchange(&self, tx: &[u8], rx: &mut [u8]) -> Result<()> {
        let len = tx.len().max(rx.len());
        for i in 0..len {
            let out = tx.get(i).copied().unwrap_or(0);
            let value = self.exchange_byte(out)?;
            if let Some(slot) = rx.get_mut(i) {
                *slot = value;
            }
        }
        Ok(())
    }

    /// Free-running clocks with the data line low
    pub(super) fn idle_clocks(&self, count: u32) -> Result<()> {
        self.gpio.write(self.mosi, false)?;
        for _ in 0..count {
            spin_for(self.half_period);
            self.clock(true)?;
            spin_for(self.half_period);
            self.clock(false)?;
        }
        Ok(())
    }

    fn shift_out(&self, value: u32, bits: u32) -> Result<()> {
        for i in (0..bits).rev() {
            self.exchange_bit(value & (1 << i) != 0, self.mosi)?;
        }
        Ok(())
    }

    fn shift_in(&self, bits: u32) -> Result<u32> {
        let mut value = 0u32;
        for _ in 0..bits {
            spin_for(self.half_period);
            self.clock(true)?;
            let bit = self.gpio.read(self.mosi)?;
            spin_for(self.half_period);
            self.clock(false)?;
            value = (value << 1) | u32::from(bit);
        }
        Ok(value)
    }

    /// RFFC507x register write
    pub(super) fn three_wire_write(&self, register: u8, value: u16) -> Result<()> {
        self.idle_clocks(rffc::LEAD_CLOCKS)?;
        self.shift_out(rffc::write_frame(register, value), rffc::WRITE_FRAME_BITS)?;
        self.idle_clocks(rffc::TRAIL_CLOCKS)
    }

    /// RFFC507x register read; the data line turns around after the command
    pub(super) fn three_wire_read(&self, register: u8) -> Result<u16> {
        self.idle_clocks(rffc::LEAD_CLOCKS)?;
        self.shift_out(rffc::read_command(register), rffc::READ_COMMAND_BITS)?;

        self.gpio.set_mode(self.mosi, PinMode::Input)?;
        let value = self
            .idle_clocks_input(1)
            .and_then(|()| self.shift_in(rffc::READ_DATA_BITS));
        let restored = self.gpio.set_mode(self.mosi, PinMode::Output);
        let value = value?;
        restored?;

        self.idle_clocks(rffc::TRAIL_CLOCKS)?;
        #[allow(clippy::cast_possible_truncation)]
        Ok(value as u16)
    }

    fn idle_clocks_input(&self, count: u32) -> Result<()> {
        for _ in 0..count {
            spin_for(self.half_period);
            self.clock(true)?;
            spin_for(self.half_period);
            self.clock(false)?;
        }
        Ok(())
    }
}
