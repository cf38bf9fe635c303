// SPDX-License-Identifier: AGPL-3.0-only

//! Chip register bus
//!
//! The HAT has one physical serial bus (clock, two data lines) shared by the
//! FPGA, the modem and the mixer. [`ChipBus`] is the session object that owns
//! the endpoint table and the transport behind a single mutex, so at most one
//! transfer is ever on the wires.
//!
//! ```text
//!  caller ─┐
//!  caller ─┼─► ChipBus ── Mutex<BusState> ──► BusTransport ──► pins / spidev
//!  caller ─┘              ├ endpoints[MAX_CHIPS]
//!                         └ current (pin mux owner)
//! ```
//!
//! Handles carry a per-slot generation, so a handle kept across
//! `remove_chip` (or `close`) is rejected with `NotFound` rather than
//! silently addressing whichever chip reused the slot.

mod bitbang;
mod spidev;
mod transport;

pub use transport::PinTransport;

use crate::error::{Result, SmiError};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Maximum number of simultaneously registered endpoints
pub const MAX_CHIPS: usize = 10;

/// How the transport moves bytes for an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferDiscipline {
    /// Blocking, CPU-clocked (bit-bang)
    Poll,
    /// Kernel controller, interrupt driven
    Interrupt,
    /// Kernel controller, DMA backed
    Dma,
}

/// Clock polarity and phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SpiMode {
    /// CPOL=0, CPHA=0
    #[default]
    Mode0,
    /// CPOL=0, CPHA=1
    Mode1,
    /// CPOL=1, CPHA=0
    Mode2,
    /// CPOL=1, CPHA=1
    Mode3,
}

impl SpiMode {
    /// Idle clock level
    pub const fn cpol(self) -> bool {
        matches!(self, Self::Mode2 | Self::Mode3)
    }

    /// Data sampled on the trailing edge
    pub const fn cpha(self) -> bool {
        matches!(self, Self::Mode1 | Self::Mode3)
    }

    /// spidev mode bits
    pub const fn bits(self) -> u8 {
        use caribou_chip::spidev::mode::{CPHA, CPOL};
        match self {
            Self::Mode0 => 0,
            Self::Mode1 => CPHA,
            Self::Mode2 => CPOL,
            Self::Mode3 => CPOL | CPHA,
        }
    }
}

/// Frame layout on the wires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BitFraming {
    /// Full duplex, byte oriented, MSB first
    #[default]
    Standard,
    /// RFFC507x three-wire register access on a shared data line
    ///
    /// Write: `tx = [register, value_hi, value_lo]`, `rx` empty.
    /// Read: `tx = [register]`, `rx` holds two bytes.
    ThreeWireRegister,
}

/// Who drives the select line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SelectControl {
    /// Asserted and released around every transfer
    #[default]
    Auto,
    /// Driven by the caller through [`ChipBus::set_select`]
    Manual,
}

/// Kernel spidev node `spidev<bus>.<chip_select>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpidevId {
    /// Controller index
    pub bus: u8,
    /// Controller chip-select
    pub chip_select: u8,
}

/// Endpoint description passed to [`ChipBus::add_chip`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipSpec {
    /// Label used in logs
    pub name: &'static str,
    /// Select GPIO (active low)
    pub select_line: u8,
    /// Clock rate in Hz
    pub clock_hz: u32,
    /// Clock polarity and phase
    pub mode: SpiMode,
    /// Exchange the roles of the two data lines
    pub swap_data_lines: bool,
    /// Transfer discipline
    pub discipline: TransferDiscipline,
    /// Frame layout
    pub framing: BitFraming,
    /// Select handling
    pub select_control: SelectControl,
    /// Kernel node for `Interrupt` and `Dma`
    pub kernel_device: Option<SpidevId>,
}

impl ChipSpec {
    /// Endpoint with standard framing and automatic select
    pub const fn new(
        select_line: u8,
        clock_hz: u32,
        mode: SpiMode,
        discipline: TransferDiscipline,
    ) -> Self {
        Self {
            name: "chip",
            select_line,
            clock_hz,
            mode,
            swap_data_lines: false,
            discipline,
            framing: BitFraming::Standard,
            select_control: SelectControl::Auto,
            kernel_device: None,
        }
    }

    /// Set the log label
    #[must_use]
    pub const fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Set the frame layout
    #[must_use]
    pub const fn with_framing(mut self, framing: BitFraming) -> Self {
        self.framing = framing;
        self
    }

    /// Set select handling
    #[must_use]
    pub const fn with_select_control(mut self, control: SelectControl) -> Self {
        self.select_control = control;
        self
    }

    /// Swap the data lines
    #[must_use]
    pub const fn with_swapped_data_lines(mut self, swap: bool) -> Self {
        self.swap_data_lines = swap;
        self
    }

    /// Bind to a kernel spidev node
    #[must_use]
    pub const fn with_kernel_device(mut self, bus: u8, chip_select: u8) -> Self {
        self.kernel_device = Some(SpidevId { bus, chip_select });
        self
    }

    fn validate(&self) -> Result<()> {
        if self.clock_hz == 0 {
            return Err(SmiError::invalid_argument(format!(
                "{}: clock rate must be non-zero",
                self.name
            )));
        }
        if self.discipline != TransferDiscipline::Poll && self.kernel_device.is_none() {
            return Err(SmiError::invalid_argument(format!(
                "{}: {:?} transfers need a kernel device",
                self.name, self.discipline
            )));
        }
        if self.framing == BitFraming::ThreeWireRegister
            && self.discipline != TransferDiscipline::Poll
        {
            return Err(SmiError::invalid_argument(format!(
                "{}: three-wire framing is only available on the polled transport",
                self.name
            )));
        }
        Ok(())
    }
}

/// Direction of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferDirection {
    /// Clock `tx` out, discard what comes back
    Write,
    /// Clock idle bytes out, fill `rx`
    Read,
    /// Full duplex, `tx.len() == rx.len()`
    Exchange,
}

/// Opaque endpoint reference returned by [`ChipBus::add_chip`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChipHandle {
    slot: u8,
    generation: u32,
}

impl ChipHandle {
    /// Table slot
    pub const fn slot(self) -> usize {
        self.slot as usize
    }
}

impl std::fmt::Display for ChipHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "chip#{}.{}", self.slot, self.generation)
    }
}

/// Physical exchange behind the bus
///
/// Every method is called with the bus mutex held, so implementations never
/// see two calls at once.
pub trait BusTransport: Send + std::fmt::Debug {
    /// Claim the shared pins
    ///
    /// # Errors
    ///
    /// Returns error if the pins cannot be configured.
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    /// Release the shared pins
    ///
    /// # Errors
    ///
    /// Returns error if the pins cannot be released.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// Prepare an endpoint (select line, kernel node)
    ///
    /// # Errors
    ///
    /// Returns error if the endpoint's resources cannot be claimed.
    fn attach(&mut self, slot: usize, spec: &ChipSpec) -> Result<()>;

    /// Release an endpoint
    ///
    /// # Errors
    ///
    /// Returns error if the endpoint's resources cannot be released.
    fn detach(&mut self, slot: usize, spec: &ChipSpec) -> Result<()>;

    /// Drive the endpoint's select line
    ///
    /// # Errors
    ///
    /// Returns error on a pin failure.
    fn set_select(&mut self, spec: &ChipSpec, asserted: bool) -> Result<()>;

    /// Move bytes for one endpoint
    ///
    /// # Errors
    ///
    /// Returns error on a hardware I/O failure.
    fn transfer(
        &mut self,
        slot: usize,
        spec: &ChipSpec,
        tx: &[u8],
        rx: &mut [u8],
        direction: TransferDirection,
    ) -> Result<()>;

    /// Release (`true`) or reclaim (`false`) the bus pins between transfers
    ///
    /// # Errors
    ///
    /// Returns error if the pins cannot be reconfigured.
    fn suspend(&mut self, suspended: bool) -> Result<()> {
        let _ = suspended;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Endpoint {
    spec: ChipSpec,
    generation: u32,
}

#[derive(Debug)]
struct BusState {
    initialized: bool,
    suspended: bool,
    transport: Box<dyn BusTransport>,
    endpoints: [Option<Endpoint>; MAX_CHIPS],
    generations: [u32; MAX_CHIPS],
    current: Option<usize>,
}

impl BusState {
    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(SmiError::not_initialized("chip bus"))
        }
    }

    fn resolve(&self, handle: ChipHandle) -> Result<Endpoint> {
        self.endpoints
            .get(handle.slot())
            .copied()
            .flatten()
            .filter(|ep| ep.generation == handle.generation)
            .ok_or_else(|| SmiError::not_found(handle))
    }

    fn count(&self) -> usize {
        self.endpoints.iter().filter(|ep| ep.is_some()).count()
    }
}

/// Shared serial bus session
#[derive(Debug)]
pub struct ChipBus {
    state: Mutex<BusState>,
}

impl ChipBus {
    /// Create an uninitialized bus over `transport`
    pub fn new(transport: impl BusTransport + 'static) -> Self {
        Self::with_boxed(Box::new(transport))
    }

    /// Create an uninitialized bus over a boxed transport
    pub fn with_boxed(transport: Box<dyn BusTransport>) -> Self {
        Self {
            state: Mutex::new(BusState {
                initialized: false,
                suspended: false,
                transport,
                endpoints: [None; MAX_CHIPS],
                generations: [0; MAX_CHIPS],
                current: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the bus with an empty endpoint table
    ///
    /// # Errors
    ///
    /// Returns `AlreadyInitialized` if called twice without [`close`](Self::close),
    /// or the transport's error if the pins cannot be claimed.
    pub fn init(&self) -> Result<()> {
        let mut state = self.lock();
        if state.initialized {
            return Err(SmiError::AlreadyInitialized { what: "chip bus" });
        }
        state.transport.open()?;
        state.endpoints = [None; MAX_CHIPS];
        state.current = None;
        state.suspended = false;
        state.initialized = true;
        tracing::info!("Chip bus initialized ({MAX_CHIPS} endpoint slots)");
        Ok(())
    }

    /// Register an endpoint
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` before `init`, `DuplicateSelect` if the select
    /// line is taken, `CapacityExceeded` if the table is full,
    /// `InvalidArgument` for an inconsistent spec, or the transport's error.
    pub fn add_chip(&self, spec: ChipSpec) -> Result<ChipHandle> {
        let mut state = self.lock();
        state.ensure_initialized()?;
        spec.validate()?;

        if state
            .endpoints
            .iter()
            .flatten()
            .any(|ep| ep.spec.select_line == spec.select_line)
        {
            return Err(SmiError::DuplicateSelect {
                line: spec.select_line,
            });
        }

        let slot = state
            .endpoints
            .iter()
            .position(Option::is_none)
            .ok_or(SmiError::CapacityExceeded { max: MAX_CHIPS })?;

        state.transport.attach(slot, &spec)?;

        let generation = state.generations[slot];
        state.endpoints[slot] = Some(Endpoint { spec, generation });

        #[allow(clippy::cast_possible_truncation)]
        let handle = ChipHandle {
            slot: slot as u8,
            generation,
        };
        tracing::info!(
            "Added {} as {handle}: GPIO{} {} Hz {:?} {:?}",
            spec.name,
            spec.select_line,
            spec.clock_hz,
            spec.mode,
            spec.discipline
        );
        Ok(handle)
    }

    /// Unregister an endpoint
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a stale handle.
    pub fn remove_chip(&self, handle: ChipHandle) -> Result<()> {
        let mut state = self.lock();
        state.ensure_initialized()?;
        let endpoint = state.resolve(handle)?;
        let slot = handle.slot();

        state.endpoints[slot] = None;
        state.generations[slot] = state.generations[slot].wrapping_add(1);
        if state.current == Some(slot) {
            state.current = None;
        }

        if let Err(e) = state.transport.detach(slot, &endpoint.spec) {
            tracing::warn!("Detaching {} ({handle}) failed: {e}", endpoint.spec.name);
        }
        tracing::info!("Removed {} ({handle})", endpoint.spec.name);
        Ok(())
    }

    /// Move bytes to and/or from one endpoint
    ///
    /// The bus mutex is held for the whole exchange, select assertion
    /// included, so transfers to different endpoints never overlap.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` before `init`, `NotFound` for a stale handle,
    /// `InvalidState` while suspended, `InvalidArgument` for mismatched
    /// buffers, or `Transport` on a hardware failure.
    pub fn transfer(
        &self,
        handle: ChipHandle,
        tx: &[u8],
        rx: &mut [u8],
        direction: TransferDirection,
    ) -> Result<()> {
        let mut state = self.lock();
        state.ensure_initialized()?;
        if state.suspended {
            return Err(SmiError::invalid_state("chip bus suspended"));
        }
        let endpoint = state.resolve(handle)?;
        let spec = endpoint.spec;

        if direction == TransferDirection::Exchange && tx.len() != rx.len() {
            return Err(SmiError::invalid_argument(format!(
                "exchange needs equal buffers (tx={}, rx={})",
                tx.len(),
                rx.len()
            )));
        }

        let slot = handle.slot();
        if state.current != Some(slot) {
            tracing::debug!("Bus now owned by {} ({handle})", spec.name);
            state.current = Some(slot);
        }

        let auto = spec.select_control == SelectControl::Auto;
        if auto {
            state.transport.set_select(&spec, true)?;
        }
        let result = state.transport.transfer(slot, &spec, tx, rx, direction);
        if auto {
            let released = state.transport.set_select(&spec, false);
            result.and(released)?;
        } else {
            result?;
        }

        tracing::trace!(
            "{} {direction:?} tx={} rx={}",
            spec.name,
            tx.len(),
            rx.len()
        );
        Ok(())
    }

    /// Write `tx` to an endpoint
    ///
    /// # Errors
    ///
    /// See [`transfer`](Self::transfer).
    pub fn write(&self, handle: ChipHandle, tx: &[u8]) -> Result<()> {
        self.transfer(handle, tx, &mut [], TransferDirection::Write)
    }

    /// Read `rx.len()` bytes from an endpoint
    ///
    /// # Errors
    ///
    /// See [`transfer`](Self::transfer).
    pub fn read(&self, handle: ChipHandle, tx: &[u8], rx: &mut [u8]) -> Result<()> {
        self.transfer(handle, tx, rx, TransferDirection::Read)
    }

    /// Full-duplex exchange
    ///
    /// # Errors
    ///
    /// See [`transfer`](Self::transfer).
    pub fn exchange(&self, handle: ChipHandle, tx: &[u8], rx: &mut [u8]) -> Result<()> {
        self.transfer(handle, tx, rx, TransferDirection::Exchange)
    }

    /// Drive a manually controlled select line
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a stale handle, `InvalidState` if the endpoint
    /// uses automatic select, or the transport's error.
    pub fn set_select(&self, handle: ChipHandle, asserted: bool) -> Result<()> {
        let mut state = self.lock();
        state.ensure_initialized()?;
        let endpoint = state.resolve(handle)?;
        if endpoint.spec.select_control != SelectControl::Manual {
            return Err(SmiError::invalid_state(format!(
                "{} uses automatic select",
                endpoint.spec.name
            )));
        }
        state.transport.set_select(&endpoint.spec, asserted)
    }

    /// Release (`true`) or reclaim (`false`) the bus pins
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` before `init`, or the transport's error.
    pub fn suspend(&self, suspended: bool) -> Result<()> {
        let mut state = self.lock();
        state.ensure_initialized()?;
        if state.suspended == suspended {
            return Ok(());
        }
        state.transport.suspend(suspended)?;
        state.suspended = suspended;
        state.current = None;
        tracing::info!("Chip bus {}", if suspended { "suspended" } else { "resumed" });
        Ok(())
    }

    /// Close the bus
    ///
    /// Waits for the in-flight transfer (if any), detaches every endpoint and
    /// marks the bus uninitialized. Existing handles become stale.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` if the bus is not open, or the transport's
    /// error when releasing the pins.
    pub fn close(&self) -> Result<()> {
        let mut state = self.lock();
        state.ensure_initialized()?;

        for slot in 0..MAX_CHIPS {
            if let Some(endpoint) = state.endpoints[slot].take() {
                state.generations[slot] = state.generations[slot].wrapping_add(1);
                if let Err(e) = state.transport.detach(slot, &endpoint.spec) {
                    tracing::warn!("Detaching {} failed: {e}", endpoint.spec.name);
                }
            }
        }
        state.current = None;
        state.initialized = false;
        state.transport.close()?;
        tracing::info!("Chip bus closed");
        Ok(())
    }

    /// Whether `init` has been called without a matching `close`
    pub fn is_initialized(&self) -> bool {
        self.lock().initialized
    }

    /// Number of live endpoints
    pub fn chip_count(&self) -> usize {
        self.lock().count()
    }

    /// Spec of a live endpoint
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a stale handle.
    pub fn spec(&self, handle: ChipHandle) -> Result<ChipSpec> {
        self.lock().resolve(handle).map(|ep| ep.spec)
    }
}
