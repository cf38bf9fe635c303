// SPDX-License-Identifier: AGPL-3.0-only

//! Streaming buffer engine
//!
//! One [`SmiStream`] per direction. Each stream owns a worker thread and a
//! ping/pong block arena; the worker waits on the port's readiness signal,
//! hands the completed block to the application and immediately gives the
//! other block back to the DMA side.
//!
//! ```text
//!            ┌──────────── worker thread ─────────────┐
//!  port ──►  │ wait_ready ─► read/write dma slot      │
//!            │      ▲              │ swap (fetch_xor) │ ──► on_data(block)
//!            │      └── control ◄──┘                  │ ──► on_event(event)
//!            └────────────────────────────────────────┘
//!                         ▲ Run / Stop / Shutdown
//!                  set_state / release
//! ```
//!
//! # Events
//!
//! | Event | When |
//! |-------|------|
//! | `Initialized` | once, first thing the worker does |
//! | `Start` | each time streaming begins, before any data callback of that run |
//! | `End` | exactly once per run: after a stop, a shutdown or a fault |
//! | `Error` | a port failure; followed by `End`, then the worker exits |
//! | `Released` | once, from [`SmiStream::release`] after the worker has been joined |
//!
//! Data callbacks of one stream run on its worker thread in block order and
//! never concurrently. Receive and transmit streams are independent.

mod buffers;
mod port;
mod worker;

pub use port::{SmiDevice, StreamPort};

use crate::config::StreamConfig;
use crate::error::{Result, SmiError};
use buffers::PingPong;
use caribou_chip::smi::{self, StreamState};
use crossbeam_channel::Sender;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use worker::{Control, Worker};

/// Number of blocks in a stream's arena
pub const BUFFER_COUNT: usize = 2;

/// Stream direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamDirection {
    /// Device to host
    Rx,
    /// Host to device
    Tx,
}

impl fmt::Display for StreamDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Rx => "rx",
            Self::Tx => "tx",
        })
    }
}

/// Five-bit SMI bus address a stream is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamAddress(u8);

impl StreamAddress {
    /// Validate a raw address
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` above 31.
    pub fn new(raw: u8) -> Result<Self> {
        if raw < smi::ADDRESS_COUNT {
            Ok(Self(raw))
        } else {
            Err(SmiError::invalid_argument(format!(
                "stream address {raw} exceeds {}",
                smi::ADDRESS_COUNT - 1
            )))
        }
    }

    /// Address the kernel drives for a direction and receive channel
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a receive channel other than 0 or 1.
    pub fn for_channel(direction: StreamDirection, channel: u8) -> Result<Self> {
        let state = match (direction, channel) {
            (StreamDirection::Rx, 0) => StreamState::RxChannel0,
            (StreamDirection::Rx, 1) => StreamState::RxChannel1,
            (StreamDirection::Tx, _) => StreamState::Tx,
            (StreamDirection::Rx, other) => {
                return Err(SmiError::invalid_argument(format!(
                    "receive channel {other} does not exist"
                )))
            }
        };
        Ok(Self(state.address()))
    }

    /// Raw address bits
    pub const fn raw(self) -> u8 {
        self.0
    }

    /// Kernel stream state that streams this address in `direction`
    pub const fn kernel_state(self, direction: StreamDirection) -> StreamState {
        match direction {
            StreamDirection::Tx => StreamState::Tx,
            StreamDirection::Rx if self.0 & (1 << smi::ADDR_CH_OFFSET) != 0 => {
                StreamState::RxChannel1
            }
            StreamDirection::Rx => StreamState::RxChannel0,
        }
    }
}

impl fmt::Display for StreamAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

/// Metadata of a worker-side failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFault {
    /// Error text
    pub reason: String,
    /// Blocks completed before the failure
    pub blocks_completed: u64,
}

/// Lifecycle notification delivered to the event callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Worker is up
    Initialized,
    /// Streaming began
    Start,
    /// Streaming ended
    End,
    /// Worker joined and buffers freed
    Released,
    /// Port failure; the worker exits after the following `End`
    Error(StreamFault),
}

/// Running counters of a stream
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StreamStats {
    /// Blocks delivered to the data callback
    pub blocks: u64,
    /// Bytes moved
    pub bytes: u64,
    /// Smoothed bitrate in bits per second
    pub bitrate_bps: f64,
}

/// Block handed to the data callback
///
/// Receive: the samples just read. Transmit: the block to fill for the next
/// send.
#[derive(Debug)]
pub struct StreamBlock<'a> {
    /// Stream address
    pub address: StreamAddress,
    /// Stream direction
    pub direction: StreamDirection,
    /// Arena slot (0 or 1)
    pub slot: usize,
    /// Block number within the stream, from 0
    pub sequence: u64,
    data: &'a mut [u8],
}

impl StreamBlock<'_> {
    /// Block bytes
    pub fn data(&self) -> &[u8] {
        &*self.data
    }

    /// Mutable block bytes
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut *self.data
    }

    /// Block length in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the block is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Block as native-endian 32-bit IQ words
    pub fn iq_words(&self) -> &[u32] {
        bytemuck::try_cast_slice(&*self.data).unwrap_or_default()
    }

    /// Mutable block as native-endian 32-bit IQ words
    pub fn iq_words_mut(&mut self) -> &mut [u32] {
        bytemuck::try_cast_slice_mut(&mut *self.data).unwrap_or_default()
    }
}

/// Data callback: runs on the worker thread once per completed block
pub type DataCallback = Box<dyn FnMut(&mut StreamBlock<'_>) + Send>;

/// Event callback: runs on the worker thread, `Released` on the releasing thread
pub type EventCallback = Box<dyn FnMut(StreamAddress, &StreamEvent) + Send>;

#[derive(Debug, Default)]
pub(crate) struct Shared {
    active: AtomicBool,
    faulted: AtomicBool,
    stats: Mutex<StreamStats>,
}

impl Shared {
    fn stats(&self) -> StreamStats {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One direction of the streaming engine
#[derive(Debug)]
pub struct SmiStream {
    address: StreamAddress,
    direction: StreamDirection,
    block_len: usize,
    control: Sender<Control>,
    // Held across the `active` flip and its command so both land in one order
    transitions: Mutex<()>,
    worker: Option<JoinHandle<EventCallback>>,
    shared: Arc<Shared>,
}

impl SmiStream {
    /// Allocate the arena and spawn the worker
    ///
    /// The worker emits `Initialized` and then idles until
    /// [`set_state(true)`](Self::set_state).
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a block length that is zero or not a
    /// multiple of 4, `OutOfMemory` if the arena cannot be allocated, or an
    /// I/O error if the thread cannot be spawned.
    pub fn init<D, E>(
        port: Arc<dyn StreamPort>,
        address: StreamAddress,
        direction: StreamDirection,
        config: &StreamConfig,
        on_data: D,
        on_event: E,
    ) -> Result<Self>
    where
        D: FnMut(&mut StreamBlock<'_>) + Send + 'static,
        E: FnMut(StreamAddress, &StreamEvent) + Send + 'static,
    {
        let block_len = match config.block_len {
            Some(len) => len,
            None => port.native_block_len()?,
        };
        let buffers = PingPong::new(block_len)?;
        let shared = Arc::new(Shared::default());
        let (control, commands) = crossbeam_channel::unbounded();

        let worker = Worker::new(
            port,
            address,
            direction,
            buffers,
            commands,
            Arc::clone(&shared),
            Box::new(on_data),
            Box::new(on_event),
            config,
        );
        let handle = std::thread::Builder::new()
            .name(format!("smi-{direction}-{}", address.raw()))
            .spawn(move || worker.run())?;

        tracing::info!("Stream {direction} {address} initialized ({block_len} byte blocks)");
        Ok(Self {
            address,
            direction,
            block_len,
            control,
            transitions: Mutex::new(()),
            worker: Some(handle),
            shared,
        })
    }

    fn ensure_live(&self) -> Result<()> {
        if self.worker.is_some() {
            Ok(())
        } else {
            Err(SmiError::not_initialized("stream"))
        }
    }

    /// Start (`true`) or stop (`false`) streaming
    ///
    /// Starting an active stream and stopping an idle one are no-ops. A stop
    /// is cooperative: the call returns at once and the worker finishes the
    /// block in flight before emitting `End`.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` after `release`, or `InvalidState` when
    /// starting a stream whose worker exited after a fault.
    pub fn set_state(&self, run: bool) -> Result<()> {
        self.ensure_live()?;
        let _transition = self.transitions.lock().unwrap_or_else(PoisonError::into_inner);
        if run {
            if self.shared.faulted.load(Ordering::Acquire) {
                return Err(SmiError::invalid_state(format!(
                    "stream {} {} faulted; release and init again",
                    self.direction, self.address
                )));
            }
            if self.shared.active.swap(true, Ordering::AcqRel) {
                return Ok(());
            }
            if self.control.send(Control::Run).is_err() {
                self.shared.active.store(false, Ordering::Release);
                return Err(SmiError::invalid_state("stream worker has exited"));
            }
            tracing::info!("Stream {} {} start requested", self.direction, self.address);
        } else {
            if !self.shared.active.swap(false, Ordering::AcqRel) {
                return Ok(());
            }
            // A worker that already exited has emitted its End
            let _ = self.control.send(Control::Stop);
            tracing::info!("Stream {} {} stop requested", self.direction, self.address);
        }
        Ok(())
    }

    /// Stop, join the worker, free the arena and emit `Released`
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` if already released, or `Transport` if the
    /// worker panicked (its callbacks are lost, so no `Released` is emitted).
    pub fn release(&mut self) -> Result<()> {
        let handle = self
            .worker
            .take()
            .ok_or_else(|| SmiError::not_initialized("stream"))?;
        self.shared.active.store(false, Ordering::Release);
        let _ = self.control.send(Control::Shutdown);

        match handle.join() {
            Ok(mut on_event) => {
                on_event(self.address, &StreamEvent::Released);
                tracing::info!("Stream {} {} released", self.direction, self.address);
                Ok(())
            }
            Err(_) => {
                tracing::error!("Stream {} {} worker panicked", self.direction, self.address);
                Err(SmiError::transport("stream worker panicked"))
            }
        }
    }

    /// `(block length, number of blocks)`
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` after `release`.
    pub fn read_buffer_info(&self) -> Result<(usize, usize)> {
        self.ensure_live()?;
        Ok((self.block_len, BUFFER_COUNT))
    }

    /// Snapshot of the running counters
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` after `release`.
    pub fn stats(&self) -> Result<StreamStats> {
        self.ensure_live()?;
        Ok(self.shared.stats())
    }

    /// Whether streaming has been requested and not stopped or faulted
    pub fn is_active(&self) -> bool {
        self.worker.is_some() && self.shared.active.load(Ordering::Acquire)
    }

    /// Whether the worker exited on a port failure
    pub fn is_faulted(&self) -> bool {
        self.shared.faulted.load(Ordering::Acquire)
    }

    /// Bus address
    pub const fn address(&self) -> StreamAddress {
        self.address
    }

    /// Direction
    pub const fn direction(&self) -> StreamDirection {
        self.direction
    }
}

impl Drop for SmiStream {
    fn drop(&mut self) {
        if self.worker.is_some() {
            if let Err(e) = self.release() {
                tracing::warn!("Releasing stream on drop failed: {e}");
            }
        }
    }
}
