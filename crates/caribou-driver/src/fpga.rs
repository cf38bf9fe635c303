// SPDX-License-Identifier: AGPL-3.0-only

//! iCE40 logic-device configurator
//!
//! Loads a bitstream through the iCE40 slave-SPI configuration port. The
//! image travels over the shared chip bus on a polled endpoint whose select
//! line the configurator drives itself; CRESET_B and CDONE are plain GPIO.
//!
//! ```text
//!  Idle ─► AssertingReset ─► LoadingBitstream ─► AwaitingReady ─► Configured
//!    ▲            └──────────────────┴───────────────────┴──► Failed
//!    └──────────────── hard_reset ─────────────────────────────────┘
//! ```
//!
//! | Step | Lines | Duration |
//! |------|-------|----------|
//! | Reset | SS low, CRESET_B low | ≥ 200 µs, then CDONE must read low |
//! | Housekeeping | CRESET_B high | ≥ 1200 µs |
//! | Lead-in | SS high | 8 dummy clocks |
//! | Image | SS low | 512 byte chunks |
//! | Tail | SS high | ≥ 49 dummy clocks, then clocks until CDONE high |

use crate::bus::{ChipBus, ChipHandle, ChipSpec, SelectControl, SpiMode, TransferDiscipline};
use crate::config::{ConfigureTiming, ConfiguratorPins};
use crate::error::{Result, SmiError};
use crate::gpio::{GpioPort, PinMode};
use caribou_chip::ice40;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Configurator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigState {
    /// Ready for `configure`
    Idle,
    /// Reset pulse in progress
    AssertingReset,
    /// Image being clocked in
    LoadingBitstream,
    /// Waiting for CDONE
    AwaitingReady,
    /// CDONE observed high
    Configured,
    /// Last attempt failed; `hard_reset` returns to `Idle`
    Failed,
}

/// Argument of [`LogicConfigurator::hard_reset`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResetLevel {
    /// Low, settle, high, settle (`-1`)
    Pulse,
    /// Hold in reset (`0`)
    Low,
    /// Release reset (`1`)
    High,
}

impl TryFrom<i32> for ResetLevel {
    type Error = SmiError;

    fn try_from(level: i32) -> Result<Self> {
        match level {
            -1 => Ok(Self::Pulse),
            0 => Ok(Self::Low),
            1 => Ok(Self::High),
            other => Err(SmiError::invalid_argument(format!(
                "reset level {other} (expected -1, 0 or 1)"
            ))),
        }
    }
}

/// Clears the busy flag when the guarded operation ends
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool, operation: &'static str) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| Self(flag))
            .map_err(|_| SmiError::busy(operation))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// iCE40 configuration session
#[derive(Debug)]
pub struct LogicConfigurator {
    bus: Arc<ChipBus>,
    gpio: Arc<dyn GpioPort>,
    pins: ConfiguratorPins,
    timing: ConfigureTiming,
    endpoint: Mutex<Option<ChipHandle>>,
    state: Mutex<ConfigState>,
    busy: AtomicBool,
}

impl LogicConfigurator {
    /// Configurator on `bus` (which must already be initialized)
    pub fn new(
        bus: Arc<ChipBus>,
        gpio: Arc<dyn GpioPort>,
        pins: ConfiguratorPins,
        timing: ConfigureTiming,
    ) -> Self {
        Self {
            bus,
            gpio,
            pins,
            timing,
            endpoint: Mutex::new(None),
            state: Mutex::new(ConfigState::Idle),
            busy: AtomicBool::new(false),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ConfigState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: ConfigState) {
        let mut state = self.lock_state();
        if *state != next {
            tracing::debug!("iCE40 {:?} -> {next:?}", *state);
            *state = next;
        }
    }

    fn handle(&self) -> Result<ChipHandle> {
        self.endpoint
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .ok_or_else(|| SmiError::not_initialized("FPGA configurator"))
    }

    /// Endpoint used for programming
    pub fn endpoint_spec(&self) -> ChipSpec {
        ChipSpec::new(
            self.pins.select,
            self.timing.clock_hz,
            SpiMode::Mode0,
            TransferDiscipline::Poll,
        )
        .with_name("ice40-prog")
        .with_select_control(SelectControl::Manual)
    }

    /// Claim the reset and done pins and register the programming endpoint
    ///
    /// # Errors
    ///
    /// Returns `AlreadyInitialized` on a second call, or the bus/GPIO error.
    pub fn init(&self) -> Result<()> {
        let mut endpoint = self.endpoint.lock().unwrap_or_else(PoisonError::into_inner);
        if endpoint.is_some() {
            return Err(SmiError::AlreadyInitialized {
                what: "FPGA configurator",
            });
        }

        self.gpio.set_mode(self.pins.done, PinMode::Input)?;
        self.gpio.set_mode(self.pins.reset, PinMode::Output)?;
        self.gpio.write(self.pins.reset, true)?;
        *endpoint = Some(self.bus.add_chip(self.endpoint_spec())?);

        tracing::info!(
            "iCE40 configurator on SS=GPIO{} CRESET=GPIO{} CDONE=GPIO{}",
            self.pins.select,
            self.pins.reset,
            self.pins.done
        );
        Ok(())
    }

    /// Unregister the endpoint and release the pins
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` before `init`, or `Busy` during `configure`.
    pub fn release(&self) -> Result<()> {
        let _busy = BusyGuard::acquire(&self.busy, "configure")?;
        let handle = self
            .endpoint
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| SmiError::not_initialized("FPGA configurator"))?;

        if let Err(e) = self.bus.remove_chip(handle) {
            tracing::warn!("Removing iCE40 endpoint failed: {e}");
        }
        self.gpio.set_mode(self.pins.reset, PinMode::Input)?;
        tracing::info!("iCE40 configurator released");
        Ok(())
    }

    /// Current state
    pub fn state(&self) -> ConfigState {
        *self.lock_state()
    }

    /// Whether CDONE reads high
    ///
    /// # Errors
    ///
    /// Returns the GPIO error.
    pub fn is_configured(&self) -> Result<bool> {
        self.gpio.read(self.pins.done)
    }

    /// Load `blob` into the device
    ///
    /// Allowed from `Idle` and `Configured`. Any failure leaves the state
    /// machine in `Failed`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidBlob` for an empty image, `NotInitialized` before
    /// `init`, `Busy` if another configure or reset is running,
    /// `InvalidState` from `Failed`, `Timeout` if CDONE never rises, or
    /// `Transport` on a bus failure.
    pub fn configure(&self, blob: &[u8]) -> Result<()> {
        if blob.is_empty() {
            return Err(SmiError::invalid_blob("bitstream is empty"));
        }
        let _busy = BusyGuard::acquire(&self.busy, "configure")?;
        let handle = self.handle()?;

        let state = self.state();
        if !matches!(state, ConfigState::Idle | ConfigState::Configured) {
            return Err(SmiError::invalid_state(format!(
                "configure from {state:?} (hard_reset first)"
            )));
        }

        tracing::info!("Configuring iCE40 with {} byte bitstream", blob.len());
        let started = Instant::now();
        match self.run(handle, blob) {
            Ok(()) => {
                self.set_state(ConfigState::Configured);
                tracing::info!("iCE40 configured in {:?}", started.elapsed());
                Ok(())
            }
            Err(e) => {
                self.set_state(ConfigState::Failed);
                if let Err(release) = self.bus.set_select(handle, false) {
                    tracing::warn!("Releasing iCE40 select after failure: {release}");
                }
                tracing::error!("iCE40 configuration failed: {e}");
                Err(e)
            }
        }
    }

    /// Read a complete image from `source` and load it
    ///
    /// # Errors
    ///
    /// Returns `Io` if reading fails, otherwise as [`configure`](Self::configure).
    pub fn configure_from_reader(&self, mut source: impl Read) -> Result<()> {
        let mut blob = Vec::new();
        source.read_to_end(&mut blob)?;
        self.configure(&blob)
    }

    fn run(&self, handle: ChipHandle, blob: &[u8]) -> Result<()> {
        let ConfiguratorPins { reset, done, .. } = self.pins;

        self.set_state(ConfigState::AssertingReset);
        self.bus.set_select(handle, true)?;
        self.gpio.write(reset, false)?;
        std::thread::sleep(self.timing.effective_reset_pulse());
        self.wait_done_low()?;
        self.gpio.write(reset, true)?;
        std::thread::sleep(self.timing.housekeeping);

        self.set_state(ConfigState::LoadingBitstream);
        self.bus.set_select(handle, false)?;
        self.bus.write(handle, &[0u8; ice40::LEADING_DUMMY_BYTES])?;
        self.bus.set_select(handle, true)?;

        let chunks = blob.len().div_ceil(ice40::CHUNK_LEN);
        for (i, chunk) in blob.chunks(ice40::CHUNK_LEN).enumerate() {
            self.bus.write(handle, chunk)?;
            tracing::debug!("iCE40 image chunk {}/{chunks}", i + 1);
        }

        self.bus.set_select(handle, false)?;
        self.bus.write(handle, &[0u8; ice40::TRAILING_DUMMY_BYTES])?;

        self.set_state(ConfigState::AwaitingReady);
        let timeout = self.timing.done_timeout;
        let deadline = Instant::now() + timeout;
        loop {
            if self.gpio.read(done)? {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!("CDONE still low after {timeout:?}");
                return Err(SmiError::timeout(timeout));
            }
            // CDONE rises only while the configuration clock runs
            self.bus.write(handle, &[0u8])?;
            std::thread::sleep((deadline - now).min(Duration::from_micros(100)));
        }
    }

    fn wait_done_low(&self) -> Result<()> {
        for _ in 0..ice40::DONE_LOW_POLLS {
            if !self.gpio.read(self.pins.done)? {
                return Ok(());
            }
            std::thread::sleep(Duration::from_micros(10));
        }
        Err(SmiError::transport("CDONE stayed high while CRESET_B was low"))
    }

    /// Drive CRESET_B out of band
    ///
    /// `Pulse` and `Low` leave the device unconfigured, so the state machine
    /// returns to `Idle`.
    ///
    /// # Errors
    ///
    /// Returns `Busy` while `configure` runs, or the GPIO error.
    pub fn hard_reset(&self, level: ResetLevel) -> Result<()> {
        let _busy = BusyGuard::acquire(&self.busy, "configure")?;
        let reset = self.pins.reset;
        self.gpio.set_mode(reset, PinMode::Output)?;

        match level {
            ResetLevel::Pulse => {
                self.gpio.write(reset, false)?;
                std::thread::sleep(ice40::HARD_RESET_SETTLE);
                self.gpio.write(reset, true)?;
                std::thread::sleep(ice40::HARD_RESET_SETTLE);
                self.set_state(ConfigState::Idle);
            }
            ResetLevel::Low => {
                self.gpio.write(reset, false)?;
                self.set_state(ConfigState::Idle);
            }
            ResetLevel::High => self.gpio.write(reset, true)?,
        }
        tracing::info!("iCE40 hard reset {level:?}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::software::{SoftGpio, SoftTransport};
    use caribou_chip::board::fpga;

    struct Rig {
        gpio: Arc<SoftGpio>,
        transport: SoftTransport,
        configurator: LogicConfigurator,
    }

    fn rig(timing: ConfigureTiming) -> Rig {
        let gpio = Arc::new(SoftGpio::new());
        let transport = SoftTransport::new();
        let bus = Arc::new(ChipBus::new(transport.clone()));
        bus.init().unwrap();
        let configurator =
            LogicConfigurator::new(bus, gpio.clone(), ConfiguratorPins::default(), timing);
        configurator.init().unwrap();
        Rig {
            gpio,
            transport,
            configurator,
        }
    }

    fn fast() -> ConfigureTiming {
        ConfigureTiming::default()
            .with_housekeeping(Duration::from_micros(10))
            .with_done_timeout(Duration::from_millis(20))
    }

    #[test]
    fn reset_levels_from_integers() {
        assert_eq!(ResetLevel::try_from(-1).unwrap(), ResetLevel::Pulse);
        assert_eq!(ResetLevel::try_from(0).unwrap(), ResetLevel::Low);
        assert_eq!(ResetLevel::try_from(1).unwrap(), ResetLevel::High);
        assert!(ResetLevel::try_from(2).is_err());
    }

    #[test]
    fn empty_blob_is_rejected_without_traffic() {
        let rig = rig(fast());
        assert!(matches!(
            rig.configurator.configure(&[]),
            Err(SmiError::InvalidBlob { .. })
        ));
        assert_eq!(rig.configurator.state(), ConfigState::Idle);
        assert!(rig.transport.transfers().is_empty());
    }

    #[test]
    fn configure_before_init() {
        let bus = Arc::new(ChipBus::new(SoftTransport::new()));
        bus.init().unwrap();
        let configurator = LogicConfigurator::new(
            bus,
            Arc::new(SoftGpio::new()),
            ConfiguratorPins::default(),
            fast(),
        );
        assert!(matches!(
            configurator.configure(&[1]),
            Err(SmiError::NotInitialized { .. })
        ));
    }

    #[test]
    fn successful_configuration_streams_whole_image() {
        let rig = rig(fast());
        // CDONE follows CRESET_B: low in reset, high once released and clocked
        rig.gpio
            .set_responder(fpga::DONE, |levels| levels[usize::from(fpga::RESET)]);

        let blob: Vec<u8> = (0..1300u32).map(|i| (i % 251) as u8).collect();
        rig.configurator.configure(&blob).unwrap();
        assert_eq!(rig.configurator.state(), ConfigState::Configured);
        assert!(rig.configurator.is_configured().unwrap());

        let transfers = rig.transport.transfers();
        let image: Vec<u8> = transfers
            .iter()
            .filter(|t| t.selected)
            .flat_map(|t| t.tx.iter().copied())
            .collect();
        assert_eq!(image, blob);
        assert_eq!(transfers.iter().filter(|t| t.selected).count(), 3);
        assert_eq!(
            transfers.last().map(|t| (t.selected, t.tx.len())),
            Some((false, ice40::TRAILING_DUMMY_BYTES))
        );
    }

    #[test]
    fn reset_pulse_meets_minimum_width() {
        let rig = rig(fast());
        rig.gpio
            .set_responder(fpga::DONE, |levels| levels[usize::from(fpga::RESET)]);
        rig.configurator.configure(&[0xFF; 16]).unwrap();

        let resets: Vec<_> = rig
            .gpio
            .write_log()
            .into_iter()
            .filter(|w| w.pin == fpga::RESET)
            .collect();
        let low = resets.iter().rev().find(|w| !w.high).unwrap();
        let high = resets.iter().find(|w| w.high && w.at > low.at).unwrap();
        assert!(high.at - low.at >= ice40::RESET_PULSE_MIN);
    }

    #[test]
    fn done_never_rising_times_out_into_failed() {
        let timeout = Duration::from_millis(30);
        let rig = rig(fast().with_done_timeout(timeout));
        rig.gpio.set_responder(fpga::DONE, |_| false);

        let started = Instant::now();
        let err = rig.configurator.configure(&[0xAA; 64]).unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, SmiError::Timeout { .. }));
        assert!(elapsed < timeout + Duration::from_millis(250));
        assert_eq!(rig.configurator.state(), ConfigState::Failed);
        assert!(!rig.configurator.is_configured().unwrap());
    }

    #[test]
    fn failed_needs_hard_reset() {
        let rig = rig(fast());
        rig.gpio.set_responder(fpga::DONE, |_| false);
        assert!(rig.configurator.configure(&[1; 8]).is_err());
        assert!(matches!(
            rig.configurator.configure(&[1; 8]),
            Err(SmiError::InvalidState { .. })
        ));

        rig.configurator.hard_reset(ResetLevel::Pulse).unwrap();
        assert_eq!(rig.configurator.state(), ConfigState::Idle);
        rig.gpio
            .set_responder(fpga::DONE, |levels| levels[usize::from(fpga::RESET)]);
        rig.configurator.configure(&[1; 8]).unwrap();
    }

    #[test]
    fn bus_fault_leaves_failed() {
        let rig = rig(fast());
        rig.gpio
            .set_responder(fpga::DONE, |levels| levels[usize::from(fpga::RESET)]);
        rig.transport.fail_after(1);
        let err = rig.configurator.configure(&[0; 2048]).unwrap_err();
        assert!(err.is_transport());
        assert_eq!(rig.configurator.state(), ConfigState::Failed);
    }

    #[test]
    fn concurrent_configure_is_busy() {
        let rig = Arc::new(rig(fast().with_done_timeout(Duration::from_millis(300))));
        rig.gpio.set_responder(fpga::DONE, |_| false);

        let worker = {
            let rig = Arc::clone(&rig);
            std::thread::spawn(move || rig.configurator.configure(&[0; 32]))
        };
        while rig.configurator.state() != ConfigState::AwaitingReady {
            std::thread::yield_now();
        }
        assert!(matches!(
            rig.configurator.configure(&[0; 32]),
            Err(SmiError::Busy { .. })
        ));
        assert!(matches!(
            rig.configurator.hard_reset(ResetLevel::High),
            Err(SmiError::Busy { .. })
        ));
        assert!(worker.join().unwrap().is_err());
    }

    #[test]
    fn reader_source_is_accepted() {
        let rig = rig(fast());
        rig.gpio
            .set_responder(fpga::DONE, |levels| levels[usize::from(fpga::RESET)]);
        rig.configurator
            .configure_from_reader(std::io::Cursor::new(vec![0x7E; 700]))
            .unwrap();
        assert_eq!(rig.transport.bytes_to(fpga::SELECT), 700 + 1 + 8);
    }

    #[test]
    fn release_racing_configure_never_fails_the_device() {
        let rig = Arc::new(rig(fast()));
        rig.gpio
            .set_responder(fpga::DONE, |levels| levels[usize::from(fpga::RESET)]);

        for _ in 0..200 {
            let barrier = Arc::new(std::sync::Barrier::new(2));
            let loader = {
                let rig = Arc::clone(&rig);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    rig.configurator.configure(&[0xA5; 4])
                })
            };
            barrier.wait();
            let released = rig.configurator.release();
            let configured = loader.join().unwrap();

            match &configured {
                Ok(()) | Err(SmiError::NotInitialized { .. } | SmiError::Busy { .. }) => {}
                Err(e) => panic!("configure during release: {e}"),
            }
            assert!(matches!(
                released,
                Ok(()) | Err(SmiError::Busy { .. })
            ));
            assert_ne!(rig.configurator.state(), ConfigState::Failed);

            if released.is_err() {
                rig.configurator.release().unwrap();
            }
            rig.configurator.init().unwrap();
        }
    }

    #[test]
    fn release_frees_the_endpoint() {
        let rig = rig(fast());
        assert_eq!(rig.transport.attached(), 1);
        rig.configurator.release().unwrap();
        assert_eq!(rig.transport.attached(), 0);
        assert!(matches!(
            rig.configurator.release(),
            Err(SmiError::NotInitialized { .. })
        ));
    }
}
