//! Driver configuration
//!
//! Defaults describe the reference CaribouLite HAT. Device paths may be
//! overridden from the environment:
//!
//! | Variable | Default |
//! |----------|---------|
//! | `CARIBOU_SMI_DEVICE` | `/dev/smi` |
//! | `CARIBOU_GPIOMEM` | `/dev/gpiomem` |
//! | `CARIBOU_SPIDEV_ROOT` | `/dev` |

use caribou_chip::{board, ice40, smi};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable overriding the SMI stream device node
pub const ENV_SMI_DEVICE: &str = "CARIBOU_SMI_DEVICE";
/// Environment variable overriding the GPIO register window node
pub const ENV_GPIOMEM: &str = "CARIBOU_GPIOMEM";
/// Environment variable overriding the directory holding `spidevB.C` nodes
pub const ENV_SPIDEV_ROOT: &str = "CARIBOU_SPIDEV_ROOT";

/// Shared serial bus pins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusPins {
    /// Controller-in line
    pub miso: u8,
    /// Controller-out line
    pub mosi: u8,
    /// Clock line
    pub sck: u8,
}

impl Default for BusPins {
    fn default() -> Self {
        Self {
            miso: board::spi::MISO,
            mosi: board::spi::MOSI,
            sck: board::spi::SCK,
        }
    }
}

/// iCE40 configuration pins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfiguratorPins {
    /// Slave-SPI select line (driven manually during configuration)
    pub select: u8,
    /// CRESET_B
    pub reset: u8,
    /// CDONE
    pub done: u8,
}

impl Default for ConfiguratorPins {
    fn default() -> Self {
        Self {
            select: board::fpga::SELECT,
            reset: board::fpga::RESET,
            done: board::fpga::DONE,
        }
    }
}

/// iCE40 configuration timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigureTiming {
    /// Width of the reset pulse; clamped up to the device minimum
    pub reset_pulse: Duration,
    /// Delay after releasing reset before the image may be sent
    pub housekeeping: Duration,
    /// Bound on the wait for the done line
    pub done_timeout: Duration,
    /// Programming clock rate
    pub clock_hz: u32,
}

impl Default for ConfigureTiming {
    fn default() -> Self {
        Self {
            reset_pulse: ice40::RESET_PULSE_MIN,
            housekeeping: ice40::HOUSEKEEPING_DELAY,
            done_timeout: ice40::DONE_TIMEOUT,
            clock_hz: board::fpga::PROGRAM_CLOCK_HZ,
        }
    }
}

impl ConfigureTiming {
    /// Set the done-line timeout
    #[must_use]
    pub const fn with_done_timeout(mut self, timeout: Duration) -> Self {
        self.done_timeout = timeout;
        self
    }

    /// Set the reset pulse width
    #[must_use]
    pub const fn with_reset_pulse(mut self, pulse: Duration) -> Self {
        self.reset_pulse = pulse;
        self
    }

    /// Set the housekeeping delay
    #[must_use]
    pub const fn with_housekeeping(mut self, delay: Duration) -> Self {
        self.housekeeping = delay;
        self
    }

    /// Reset pulse actually applied
    pub fn effective_reset_pulse(&self) -> Duration {
        self.reset_pulse.max(ice40::RESET_PULSE_MIN)
    }
}

/// Streaming engine tuning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamConfig {
    /// Block length override; `None` asks the port for its native length
    pub block_len: Option<usize>,
    /// Longest single readiness wait before the worker re-checks its control channel
    pub wait_slice: Duration,
    /// Weight of the newest sample in the bitrate average (0, 1]
    pub bitrate_smoothing: f64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            block_len: None,
            wait_slice: Duration::from_millis(10),
            bitrate_smoothing: 0.1,
        }
    }
}

impl StreamConfig {
    /// Force a block length
    #[must_use]
    pub const fn with_block_len(mut self, len: usize) -> Self {
        self.block_len = Some(len);
        self
    }

    /// Set the readiness wait slice
    #[must_use]
    pub const fn with_wait_slice(mut self, slice: Duration) -> Self {
        self.wait_slice = slice;
        self
    }

    /// Set the bitrate smoothing factor
    #[must_use]
    pub fn with_bitrate_smoothing(mut self, alpha: f64) -> Self {
        self.bitrate_smoothing = alpha.clamp(f64::EPSILON, 1.0);
        self
    }
}

/// Top-level driver configuration
#[derive(Debug, Clone, PartialEq)]
pub struct DriverConfig {
    /// SMI stream character device
    pub smi_device: PathBuf,
    /// GPIO register window
    pub gpiomem: PathBuf,
    /// Directory holding the spidev nodes
    pub spidev_root: PathBuf,
    /// Shared bus pins
    pub bus: BusPins,
    /// Configurator pins
    pub configurator: ConfiguratorPins,
    /// Configurator timing
    pub timing: ConfigureTiming,
    /// Streaming tuning
    pub stream: StreamConfig,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            smi_device: PathBuf::from(smi::DEVICE_PATH),
            gpiomem: PathBuf::from("/dev/gpiomem"),
            spidev_root: PathBuf::from("/dev"),
            bus: BusPins::default(),
            configurator: ConfiguratorPins::default(),
            timing: ConfigureTiming::default(),
            stream: StreamConfig::default(),
        }
    }
}

impl DriverConfig {
    /// Defaults with environment overrides applied
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(path) = std::env::var_os(ENV_SMI_DEVICE) {
            config.smi_device = path.into();
        }
        if let Some(path) = std::env::var_os(ENV_GPIOMEM) {
            config.gpiomem = path.into();
        }
        if let Some(path) = std::env::var_os(ENV_SPIDEV_ROOT) {
            config.spidev_root = path.into();
        }
        tracing::debug!(
            "Driver config: smi={} gpiomem={} spidev_root={}",
            config.smi_device.display(),
            config.gpiomem.display(),
            config.spidev_root.display()
        );
        config
    }

    /// Set the SMI device node
    #[must_use]
    pub fn with_smi_device(mut self, path: impl Into<PathBuf>) -> Self {
        self.smi_device = path.into();
        self
    }

    /// Set the GPIO register window node
    #[must_use]
    pub fn with_gpiomem(mut self, path: impl Into<PathBuf>) -> Self {
        self.gpiomem = path.into();
        self
    }

    /// Set the spidev directory
    #[must_use]
    pub fn with_spidev_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.spidev_root = path.into();
        self
    }

    /// Set the configurator timing
    #[must_use]
    pub fn with_timing(mut self, timing: ConfigureTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Set the streaming tuning
    #[must_use]
    pub fn with_stream(mut self, stream: StreamConfig) -> Self {
        self.stream = stream;
        self
    }

    /// spidev node for `(bus, chip_select)`
    pub fn spidev_path(&self, bus: u8, chip_select: u8) -> PathBuf {
        self.spidev_root.join(format!("spidev{bus}.{chip_select}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_board() {
        let config = DriverConfig::default();
        assert_eq!(config.smi_device, PathBuf::from("/dev/smi"));
        assert_eq!(config.bus.sck, 21);
        assert_eq!(config.configurator.done, 27);
        assert_eq!(config.spidev_path(1, 0), PathBuf::from("/dev/spidev1.0"));
    }

    #[test]
    fn reset_pulse_never_below_minimum() {
        let timing = ConfigureTiming::default().with_reset_pulse(Duration::from_micros(10));
        assert_eq!(timing.effective_reset_pulse(), ice40::RESET_PULSE_MIN);

        let timing = timing.with_reset_pulse(Duration::from_millis(1));
        assert_eq!(timing.effective_reset_pulse(), Duration::from_millis(1));
    }

    #[test]
    fn smoothing_is_clamped() {
        assert!((StreamConfig::default().with_bitrate_smoothing(5.0).bitrate_smoothing - 1.0).abs() < f64::EPSILON);
        assert!(StreamConfig::default().with_bitrate_smoothing(0.0).bitrate_smoothing > 0.0);
    }
}
