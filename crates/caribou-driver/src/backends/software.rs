// SPDX-License-Identifier: AGPL-3.0-only

//! Software (virtual board) backends
//!
//! In-process stand-ins for the three hardware seams, so the bus, the
//! configurator and the streaming engine run in CI without a HAT:
//!
//! | Seam | Hardware | Software |
//! |------|----------|----------|
//! | [`GpioPort`] | `MappedGpio` | [`SoftGpio`]: pin levels, modes, input responders, write log |
//! | [`BusTransport`] | `PinTransport` | [`SoftTransport`]: transfer log, scripted replies, fault injection |
//! | [`StreamPort`] | `SmiDevice` | [`VirtualSmi`]: synthetic DMA-ready signals, fill patterns, tx capture |
//!
//! Each software backend hands out cheap clones of its shared state, so a
//! test can keep a probe while the driver owns the backend.

use crate::bus::{BusTransport, ChipSpec, TransferDirection};
use crate::error::{Result, SmiError};
use crate::gpio::{check_pin, GpioPort, PinMode, Pull};
use crate::stream::{StreamDirection, StreamPort};
use bytes::Bytes;
use caribou_chip::gpio::PIN_COUNT;
use caribou_chip::smi::StreamState;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── GPIO ───────────────────────────────────────────────────────────────────

/// Input level as a function of all driven levels
pub type Responder = Arc<dyn Fn(&[bool]) -> bool + Send + Sync>;

/// One recorded `write`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinWrite {
    /// Pin
    pub pin: u8,
    /// Level written
    pub high: bool,
    /// When it was written
    pub at: Instant,
}

struct PinBank {
    levels: Vec<bool>,
    modes: Vec<PinMode>,
    pulls: Vec<Pull>,
    writes: Vec<PinWrite>,
    responders: HashMap<u8, Responder>,
}

/// In-process GPIO bank
///
/// Reads of a pin with a responder return the responder's answer; other
/// reads return the last driven level (or the pull level for an input).
#[derive(Clone)]
pub struct SoftGpio {
    bank: Arc<Mutex<PinBank>>,
}

impl std::fmt::Debug for SoftGpio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bank = lock(&self.bank);
        f.debug_struct("SoftGpio")
            .field("writes", &bank.writes.len())
            .field("responders", &bank.responders.len())
            .finish()
    }
}

impl Default for SoftGpio {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftGpio {
    /// All pins low inputs
    pub fn new() -> Self {
        let pins = usize::from(PIN_COUNT);
        Self {
            bank: Arc::new(Mutex::new(PinBank {
                levels: vec![false; pins],
                modes: vec![PinMode::Input; pins],
                pulls: vec![Pull::Off; pins],
                writes: Vec::new(),
                responders: HashMap::new(),
            })),
        }
    }

    /// Compute reads of `pin` from the current levels
    pub fn set_responder(&self, pin: u8, responder: impl Fn(&[bool]) -> bool + Send + Sync + 'static) {
        lock(&self.bank).responders.insert(pin, Arc::new(responder));
    }

    /// Drop the responder of `pin`
    pub fn clear_responder(&self, pin: u8) {
        lock(&self.bank).responders.remove(&pin);
    }

    /// Force the level of an input pin
    pub fn drive_input(&self, pin: u8, high: bool) {
        if let Some(level) = lock(&self.bank).levels.get_mut(usize::from(pin)) {
            *level = high;
        }
    }

    /// Current driven level
    pub fn level(&self, pin: u8) -> bool {
        lock(&self.bank)
            .levels
            .get(usize::from(pin))
            .copied()
            .unwrap_or(false)
    }

    /// Current function
    pub fn mode(&self, pin: u8) -> PinMode {
        lock(&self.bank)
            .modes
            .get(usize::from(pin))
            .copied()
            .unwrap_or(PinMode::Input)
    }

    /// Current pull
    pub fn pull(&self, pin: u8) -> Pull {
        lock(&self.bank)
            .pulls
            .get(usize::from(pin))
            .copied()
            .unwrap_or_default()
    }

    /// Number of writes to `pin` so far
    pub fn writes_to(&self, pin: u8) -> usize {
        lock(&self.bank).writes.iter().filter(|w| w.pin == pin).count()
    }

    /// Every write so far, oldest first
    pub fn write_log(&self) -> Vec<PinWrite> {
        lock(&self.bank).writes.clone()
    }
}

impl GpioPort for SoftGpio {
    fn set_mode(&self, pin: u8, mode: PinMode) -> Result<()> {
        check_pin(pin)?;
        if let PinMode::Alt(n) = mode {
            if n > 5 {
                return Err(SmiError::invalid_argument(format!("ALT{n} does not exist")));
            }
        }
        lock(&self.bank).modes[usize::from(pin)] = mode;
        Ok(())
    }

    fn set_pull(&self, pin: u8, resistor: Pull) -> Result<()> {
        check_pin(pin)?;
        let mut bank = lock(&self.bank);
        bank.pulls[usize::from(pin)] = resistor;
        if bank.modes[usize::from(pin)] == PinMode::Input {
            match resistor {
                Pull::Up => bank.levels[usize::from(pin)] = true,
                Pull::Down => bank.levels[usize::from(pin)] = false,
                Pull::Off => {}
            }
        }
        Ok(())
    }

    fn write(&self, pin: u8, high: bool) -> Result<()> {
        check_pin(pin)?;
        let mut bank = lock(&self.bank);
        bank.levels[usize::from(pin)] = high;
        bank.writes.push(PinWrite {
            pin,
            high,
            at: Instant::now(),
        });
        Ok(())
    }

    fn read(&self, pin: u8) -> Result<bool> {
        check_pin(pin)?;
        let (responder, levels) = {
            let bank = lock(&self.bank);
            (bank.responders.get(&pin).cloned(), bank.levels.clone())
        };
        // Responders run unlocked so they may consult other state freely
        Ok(match responder {
            Some(responder) => responder(&levels),
            None => levels[usize::from(pin)],
        })
    }
}

// ── Bus transport ──────────────────────────────────────────────────────────

/// One recorded transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    /// Endpoint label
    pub name: &'static str,
    /// Select line of the endpoint
    pub select_line: u8,
    /// Direction
    pub direction: TransferDirection,
    /// Bytes clocked out
    pub tx: Vec<u8>,
    /// Bytes returned
    pub rx_len: usize,
    /// Whether the select line was asserted at the time
    pub selected: bool,
}

#[derive(Debug, Default)]
struct TransportLog {
    transfers: Vec<TransferRecord>,
    selected: HashMap<u8, bool>,
    replies: HashMap<u8, Vec<u8>>,
    fail_after: Option<usize>,
    attached: usize,
}

/// Recording transport
///
/// `Exchange` echoes `tx` into `rx`; `Read` fills `rx` from the scripted
/// reply for the endpoint's select line (zeros when none).
#[derive(Debug, Clone, Default)]
pub struct SoftTransport {
    log: Arc<Mutex<TransportLog>>,
}

impl SoftTransport {
    /// Empty log, no faults
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply returned by `Read` transfers on `select_line`
    pub fn set_reply(&self, select_line: u8, reply: impl Into<Vec<u8>>) {
        lock(&self.log).replies.insert(select_line, reply.into());
    }

    /// Fail every transfer after `count` successful ones
    pub fn fail_after(&self, count: usize) {
        lock(&self.log).fail_after = Some(count);
    }

    /// Every transfer so far
    pub fn transfers(&self) -> Vec<TransferRecord> {
        lock(&self.log).transfers.clone()
    }

    /// Total bytes written to `select_line`
    pub fn bytes_to(&self, select_line: u8) -> usize {
        lock(&self.log)
            .transfers
            .iter()
            .filter(|t| t.select_line == select_line)
            .map(|t| t.tx.len())
            .sum()
    }

    /// Endpoints currently attached
    pub fn attached(&self) -> usize {
        lock(&self.log).attached
    }
}

impl BusTransport for SoftTransport {
    fn attach(&mut self, _slot: usize, spec: &ChipSpec) -> Result<()> {
        let mut log = lock(&self.log);
        log.attached += 1;
        log.selected.insert(spec.select_line, false);
        Ok(())
    }

    fn detach(&mut self, _slot: usize, spec: &ChipSpec) -> Result<()> {
        let mut log = lock(&self.log);
        log.attached = log.attached.saturating_sub(1);
        log.selected.remove(&spec.select_line);
        Ok(())
    }

    fn set_select(&mut self, spec: &ChipSpec, asserted: bool) -> Result<()> {
        lock(&self.log).selected.insert(spec.select_line, asserted);
        Ok(())
    }

    fn transfer(
        &mut self,
        _slot: usize,
        spec: &ChipSpec,
        tx: &[u8],
        rx: &mut [u8],
        direction: TransferDirection,
    ) -> Result<()> {
        let mut log = lock(&self.log);
        if log.fail_after.is_some_and(|n| log.transfers.len() >= n) {
            return Err(SmiError::transport(format!("{}: injected bus fault", spec.name)));
        }

        match direction {
            TransferDirection::Write => {}
            TransferDirection::Exchange => rx.copy_from_slice(tx),
            TransferDirection::Read => {
                let reply = log.replies.get(&spec.select_line);
                for (i, byte) in rx.iter_mut().enumerate() {
                    *byte = reply.and_then(|r| r.get(i)).copied().unwrap_or(0);
                }
            }
        }

        let selected = log.selected.get(&spec.select_line).copied().unwrap_or(false);
        log.transfers.push(TransferRecord {
            name: spec.name,
            select_line: spec.select_line,
            direction,
            tx: tx.to_vec(),
            rx_len: rx.len(),
            selected,
        });
        Ok(())
    }
}

// ── SMI stream port ────────────────────────────────────────────────────────

/// Contents of synthetic receive blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillPattern {
    /// All zero
    #[default]
    Zero,
    /// Every byte is the low byte of the block number
    BlockIndex,
    /// Every byte is the given value
    Constant(u8),
}

#[derive(Debug, Default)]
struct SmiState {
    armed: Option<StreamState>,
    rx_ready: usize,
    tx_ready: usize,
    rx_blocks: u64,
    fill: FillPattern,
    fault: Option<String>,
    captured: Vec<Bytes>,
    arm_log: Vec<StreamState>,
}

#[derive(Debug, Default)]
struct SmiShared {
    state: Mutex<SmiState>,
    ready: Condvar,
}

/// Virtual SMI stream device
///
/// Nothing is ready until a test calls [`signal_ready`](Self::signal_ready);
/// each signal releases exactly one block in that direction.
#[derive(Debug, Clone)]
pub struct VirtualSmi {
    block_len: usize,
    shared: Arc<SmiShared>,
}

impl VirtualSmi {
    /// Port with `block_len` byte blocks
    pub fn new(block_len: usize) -> Self {
        Self {
            block_len,
            shared: Arc::new(SmiShared::default()),
        }
    }

    /// Signal `count` completed DMA blocks in `direction`
    pub fn signal_ready(&self, direction: StreamDirection, count: usize) {
        let mut state = lock(&self.shared.state);
        match direction {
            StreamDirection::Rx => state.rx_ready += count,
            StreamDirection::Tx => state.tx_ready += count,
        }
        self.shared.ready.notify_all();
    }

    /// Content of subsequent receive blocks
    pub fn set_fill(&self, fill: FillPattern) {
        lock(&self.shared.state).fill = fill;
    }

    /// Make every subsequent wait fail with a transport error
    pub fn inject_fault(&self, reason: impl Into<String>) {
        lock(&self.shared.state).fault = Some(reason.into());
        self.shared.ready.notify_all();
    }

    /// Clear an injected fault
    pub fn clear_fault(&self) {
        lock(&self.shared.state).fault = None;
    }

    /// Transmitted blocks, oldest first
    pub fn captured_tx(&self) -> Vec<Bytes> {
        lock(&self.shared.state).captured.clone()
    }

    /// Currently armed kernel state (`None` before the first arm)
    pub fn armed(&self) -> Option<StreamState> {
        lock(&self.shared.state).armed
    }

    /// Every state armed so far
    pub fn arm_log(&self) -> Vec<StreamState> {
        lock(&self.shared.state).arm_log.clone()
    }
}

impl StreamPort for VirtualSmi {
    fn native_block_len(&self) -> Result<usize> {
        Ok(self.block_len)
    }

    fn arm(&self, state: StreamState) -> Result<()> {
        let mut s = lock(&self.shared.state);
        s.armed = Some(state);
        s.arm_log.push(state);
        debug!("Virtual SMI armed {state:?}");
        Ok(())
    }

    fn wait_ready(&self, direction: StreamDirection, timeout: Duration) -> Result<bool> {
        let state = lock(&self.shared.state);
        let (mut state, _) = self
            .shared
            .ready
            .wait_timeout_while(state, timeout, |s| {
                s.fault.is_none()
                    && match direction {
                        StreamDirection::Rx => s.rx_ready == 0,
                        StreamDirection::Tx => s.tx_ready == 0,
                    }
            })
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(reason) = &state.fault {
            return Err(SmiError::transport(reason.clone()));
        }
        let pending = match direction {
            StreamDirection::Rx => &mut state.rx_ready,
            StreamDirection::Tx => &mut state.tx_ready,
        };
        if *pending == 0 {
            return Ok(false);
        }
        *pending -= 1;
        Ok(true)
    }

    fn read_block(&self, block: &mut [u8]) -> Result<()> {
        let mut state = lock(&self.shared.state);
        if block.len() != self.block_len {
            return Err(SmiError::transport(format!(
                "read of {} bytes from a {} byte port",
                block.len(),
                self.block_len
            )));
        }
        #[allow(clippy::cast_possible_truncation)]
        let value = match state.fill {
            FillPattern::Zero => 0,
            FillPattern::BlockIndex => state.rx_blocks as u8,
            FillPattern::Constant(v) => v,
        };
        block.fill(value);
        state.rx_blocks += 1;
        Ok(())
    }

    fn write_block(&self, block: &[u8]) -> Result<()> {
        lock(&self.shared.state)
            .captured
            .push(Bytes::copy_from_slice(block));
        Ok(())
    }
}
