//! Stream worker thread

use crate::config::StreamConfig;
use crate::error::{Result, SmiError};
use crossbeam_channel::{Receiver, TryRecvError};
use std::sync::atomic::Ordering;
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};

use super::buffers::PingPong;
use super::port::StreamPort;
use super::{
    DataCallback, EventCallback, Shared, StreamAddress, StreamBlock, StreamDirection,
    StreamEvent, StreamFault,
};

/// Requests from the owning [`super::SmiStream`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Control {
    Run,
    Stop,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Stopped,
    Shutdown,
    Faulted,
}

pub(super) struct Worker {
    port: Arc<dyn StreamPort>,
    address: StreamAddress,
    direction: StreamDirection,
    buffers: PingPong,
    commands: Receiver<Control>,
    shared: Arc<Shared>,
    on_data: DataCallback,
    on_event: EventCallback,
    wait_slice: Duration,
    smoothing: f64,
    sequence: u64,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        port: Arc<dyn StreamPort>,
        address: StreamAddress,
        direction: StreamDirection,
        buffers: PingPong,
        commands: Receiver<Control>,
        shared: Arc<Shared>,
        on_data: DataCallback,
        on_event: EventCallback,
        config: &StreamConfig,
    ) -> Self {
        Self {
            port,
            address,
            direction,
            buffers,
            commands,
            shared,
            on_data,
            on_event,
            wait_slice: config.wait_slice,
            smoothing: config.bitrate_smoothing,
            sequence: 0,
        }
    }

    fn emit(&mut self, event: &StreamEvent) {
        tracing::debug!("Stream {} {}: {event:?}", self.direction, self.address);
        (self.on_event)(self.address, event);
    }

    /// Thread body; hands the event callback back for the `Released` event
    pub(super) fn run(mut self) -> EventCallback {
        self.emit(&StreamEvent::Initialized);

        loop {
            match self.commands.recv() {
                Ok(Control::Run) => match self.stream() {
                    Exit::Stopped => {}
                    Exit::Shutdown | Exit::Faulted => break,
                },
                Ok(Control::Stop) => {}
                Ok(Control::Shutdown) | Err(_) => break,
            }
        }

        tracing::debug!("Stream {} {} worker exiting", self.direction, self.address);
        self.on_event
    }

    /// One run: `Start`, blocks until stopped, `End`
    fn stream(&mut self) -> Exit {
        self.emit(&StreamEvent::Start);
        tracing::info!("Stream {} {} running", self.direction, self.address);

        let exit = match self.port.arm(self.address.kernel_state(self.direction)) {
            Ok(()) => self.pump(),
            Err(e) => self.fault(&e),
        };

        if let Err(e) = self.port.disarm() {
            tracing::warn!("Stream {} {}: disarm failed: {e}", self.direction, self.address);
        }
        self.emit(&StreamEvent::End);
        tracing::info!("Stream {} {} ended ({exit:?})", self.direction, self.address);
        exit
    }

    fn pump(&mut self) -> Exit {
        let mut last = Instant::now();
        loop {
            // Control is observed at the suspension point, between bounded waits
            match self.commands.try_recv() {
                Ok(Control::Stop) => return Exit::Stopped,
                Ok(Control::Shutdown) | Err(TryRecvError::Disconnected) => return Exit::Shutdown,
                Ok(Control::Run) | Err(TryRecvError::Empty) => {}
            }

            match self.port.wait_ready(self.direction, self.wait_slice) {
                Ok(false) => continue,
                Ok(true) => {}
                Err(e) => return self.fault(&e),
            }

            if let Err(e) = self.cycle() {
                return self.fault(&e);
            }

            let now = Instant::now();
            self.record(now.duration_since(last));
            last = now;
        }
    }

    /// Move one block and hand the application its slot
    fn cycle(&mut self) -> Result<()> {
        let app_slot = match self.direction {
            StreamDirection::Rx => {
                let roles = self.buffers.roles();
                self.port.read_block(roles.dma)?;
                self.buffers.swap()
            }
            StreamDirection::Tx => {
                // The block filled during the previous callback goes out
                let app_slot = self.buffers.swap();
                let roles = self.buffers.roles();
                self.port.write_block(roles.dma)?;
                app_slot
            }
        };

        let roles = self.buffers.roles();
        debug_assert_eq!(roles.app_slot, app_slot);
        debug_assert_ne!(roles.dma_slot, app_slot);
        let mut block = StreamBlock {
            address: self.address,
            direction: self.direction,
            slot: app_slot,
            sequence: self.sequence,
            data: roles.app,
        };
        (self.on_data)(&mut block);
        self.sequence += 1;
        Ok(())
    }

    #[allow(clippy::cast_precision_loss)]
    fn record(&self, elapsed: Duration) {
        let block_len = self.buffers.block_len() as u64;
        let mut stats = self
            .shared
            .stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        stats.blocks += 1;
        stats.bytes += block_len;

        let secs = elapsed.as_secs_f64();
        if secs > 0.0 {
            let rate = (block_len * 8) as f64 / secs;
            stats.bitrate_bps = if stats.blocks == 1 {
                rate
            } else {
                self.smoothing.mul_add(rate, (1.0 - self.smoothing) * stats.bitrate_bps)
            };
        }
        tracing::trace!(
            "Stream {} {} block {} ({:.0} bit/s)",
            self.direction,
            self.address,
            stats.blocks,
            stats.bitrate_bps
        );
    }

    fn fault(&mut self, error: &SmiError) -> Exit {
        tracing::error!("Stream {} {} failed: {error}", self.direction, self.address);
        self.shared.faulted.store(true, Ordering::Release);
        self.shared.active.store(false, Ordering::Release);
        let blocks_completed = self.sequence;
        self.emit(&StreamEvent::Error(StreamFault {
            reason: error.to_string(),
            blocks_completed,
        }));
        Exit::Faulted
    }
}
