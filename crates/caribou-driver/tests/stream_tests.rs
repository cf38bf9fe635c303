//! Streaming engine validation tests
//!
//! Event ordering, ping/pong alternation and fault handling against the
//! virtual SMI port. Hardware-backed variants are ignored by default.

use bytes::Bytes;
use caribou_driver::backends::{FillPattern, VirtualSmi};
use caribou_driver::chip::smi::StreamState;
use caribou_driver::{
    BlockQueue, SmiError, SmiStream, StreamAddress, StreamConfig, StreamDirection, StreamEvent,
};
use std::sync::{Arc, Barrier, Mutex};
use std::time::{Duration, Instant};

const BLOCK_LEN: usize = 16;

/// Everything a stream reported, in arrival order
#[derive(Debug, Clone, PartialEq)]
enum Seen {
    Data { slot: usize, sequence: u64, first: u8 },
    Event(StreamEvent),
}

#[derive(Debug, Clone, Default)]
struct Recorder(Arc<Mutex<Vec<Seen>>>);

impl Recorder {
    fn push(&self, seen: Seen) {
        self.0.lock().unwrap().push(seen);
    }

    fn snapshot(&self) -> Vec<Seen> {
        self.0.lock().unwrap().clone()
    }

    fn events(&self) -> Vec<StreamEvent> {
        self.snapshot()
            .into_iter()
            .filter_map(|s| match s {
                Seen::Event(e) => Some(e),
                Seen::Data { .. } => None,
            })
            .collect()
    }

    fn slots(&self) -> Vec<usize> {
        self.snapshot()
            .into_iter()
            .filter_map(|s| match s {
                Seen::Data { slot, .. } => Some(slot),
                Seen::Event(_) => None,
            })
            .collect()
    }

    fn firsts(&self) -> Vec<u8> {
        self.snapshot()
            .into_iter()
            .filter_map(|s| match s {
                Seen::Data { first, .. } => Some(first),
                Seen::Event(_) => None,
            })
            .collect()
    }

    fn count(&self, event: &StreamEvent) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }

    fn wait_until(&self, timeout: Duration, condition: impl Fn(&[Seen]) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition(&self.snapshot()) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        condition(&self.snapshot())
    }
}

fn config() -> StreamConfig {
    StreamConfig::default()
        .with_block_len(BLOCK_LEN)
        .with_wait_slice(Duration::from_millis(2))
}

fn open(port: &VirtualSmi, direction: StreamDirection, recorder: &Recorder) -> SmiStream {
    let channel = 0;
    let address = StreamAddress::for_channel(direction, channel).unwrap();
    let data = recorder.clone();
    let events = recorder.clone();
    SmiStream::init(
        Arc::new(port.clone()),
        address,
        direction,
        &config(),
        move |block| {
            let first = block.data()[0];
            data.push(Seen::Data {
                slot: block.slot,
                sequence: block.sequence,
                first,
            });
        },
        move |_, event| events.push(Seen::Event(event.clone())),
    )
    .unwrap()
}

fn data_count(seen: &[Seen]) -> usize {
    seen.iter().filter(|s| matches!(s, Seen::Data { .. })).count()
}

fn has_event(seen: &[Seen], event: &StreamEvent) -> bool {
    seen.iter().any(|s| *s == Seen::Event(event.clone()))
}

#[test]
fn three_blocks_alternate_slots_and_events_are_ordered() {
    let port = VirtualSmi::new(BLOCK_LEN);
    port.set_fill(FillPattern::BlockIndex);
    let recorder = Recorder::default();
    let mut rx = open(&port, StreamDirection::Rx, &recorder);

    rx.set_state(true).unwrap();
    port.signal_ready(StreamDirection::Rx, 3);
    assert!(recorder.wait_until(Duration::from_secs(2), |s| data_count(s) == 3));

    rx.set_state(false).unwrap();
    assert!(recorder.wait_until(Duration::from_secs(2), |s| has_event(s, &StreamEvent::End)));
    rx.release().unwrap();

    assert_eq!(recorder.slots(), [0, 1, 0]);
    assert_eq!(recorder.firsts(), [0, 1, 2]);
    assert_eq!(
        recorder.events(),
        [
            StreamEvent::Initialized,
            StreamEvent::Start,
            StreamEvent::End,
            StreamEvent::Released
        ]
    );

    // Nothing is delivered after release
    port.signal_ready(StreamDirection::Rx, 2);
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(recorder.slots().len(), 3);
}

#[test]
fn no_data_after_end() {
    let port = VirtualSmi::new(BLOCK_LEN);
    let recorder = Recorder::default();
    let mut rx = open(&port, StreamDirection::Rx, &recorder);

    rx.set_state(true).unwrap();
    port.signal_ready(StreamDirection::Rx, 10_000);
    assert!(recorder.wait_until(Duration::from_secs(2), |s| data_count(s) >= 5));
    rx.set_state(false).unwrap();
    rx.release().unwrap();

    let seen = recorder.snapshot();
    let end = seen
        .iter()
        .position(|s| *s == Seen::Event(StreamEvent::End))
        .unwrap();
    assert!(seen[end..].iter().all(|s| !matches!(s, Seen::Data { .. })));
    assert_eq!(recorder.count(&StreamEvent::End), 1);
    assert_eq!(recorder.events().last(), Some(&StreamEvent::Released));
}

#[test]
fn release_while_running_ends_once() {
    let port = VirtualSmi::new(BLOCK_LEN);
    let recorder = Recorder::default();
    let mut rx = open(&port, StreamDirection::Rx, &recorder);

    rx.set_state(true).unwrap();
    port.signal_ready(StreamDirection::Rx, 2);
    assert!(recorder.wait_until(Duration::from_secs(2), |s| data_count(s) == 2));
    rx.release().unwrap();

    assert_eq!(recorder.count(&StreamEvent::Start), 1);
    assert_eq!(recorder.count(&StreamEvent::End), 1);
    assert_eq!(recorder.events().last(), Some(&StreamEvent::Released));
}

#[test]
fn restart_runs_again() {
    let port = VirtualSmi::new(BLOCK_LEN);
    let recorder = Recorder::default();
    let mut rx = open(&port, StreamDirection::Rx, &recorder);

    for run in 1..=2 {
        rx.set_state(true).unwrap();
        port.signal_ready(StreamDirection::Rx, 1);
        assert!(recorder.wait_until(Duration::from_secs(2), |s| data_count(s) == run));
        rx.set_state(false).unwrap();
        assert!(recorder.wait_until(Duration::from_secs(2), |_| {
            recorder.count(&StreamEvent::End) == run
        }));
    }
    rx.release().unwrap();

    assert_eq!(
        recorder.events(),
        [
            StreamEvent::Initialized,
            StreamEvent::Start,
            StreamEvent::End,
            StreamEvent::Start,
            StreamEvent::End,
            StreamEvent::Released
        ]
    );
}

#[test]
fn concurrent_start_stop_settles_on_last_request() {
    let port = VirtualSmi::new(BLOCK_LEN);
    let recorder = Recorder::default();
    let rx = Arc::new(open(&port, StreamDirection::Rx, &recorder));
    port.signal_ready(StreamDirection::Rx, 1_000_000);

    let barrier = Arc::new(Barrier::new(4));
    let togglers: Vec<_> = (0..4)
        .map(|i| {
            let rx = Arc::clone(&rx);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                for n in 0..200 {
                    rx.set_state((n + i) % 2 == 0).unwrap();
                }
            })
        })
        .collect();
    for toggler in togglers {
        toggler.join().unwrap();
    }

    rx.set_state(false).unwrap();
    assert!(!rx.is_active());

    // Queued commands drain; the worker ends idle although blocks are pending
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut previous = recorder.snapshot().len();
    loop {
        std::thread::sleep(Duration::from_millis(30));
        let seen = recorder.snapshot();
        let balanced = recorder.count(&StreamEvent::Start) == recorder.count(&StreamEvent::End);
        if balanced && seen.len() == previous {
            break;
        }
        assert!(Instant::now() < deadline, "stream never settled");
        previous = seen.len();
    }
    assert!(matches!(
        recorder.snapshot().last(),
        Some(Seen::Event(StreamEvent::End)) | Some(Seen::Event(StreamEvent::Initialized))
    ));

    let mut rx = Arc::try_unwrap(rx).unwrap();
    rx.release().unwrap();
    assert_eq!(recorder.events().last(), Some(&StreamEvent::Released));
}

#[test]
fn port_fault_reports_error_then_end() {
    let port = VirtualSmi::new(BLOCK_LEN);
    let recorder = Recorder::default();
    let mut rx = open(&port, StreamDirection::Rx, &recorder);

    rx.set_state(true).unwrap();
    port.signal_ready(StreamDirection::Rx, 1);
    assert!(recorder.wait_until(Duration::from_secs(2), |s| data_count(s) == 1));
    port.inject_fault("dma aborted");
    assert!(recorder.wait_until(Duration::from_secs(2), |s| has_event(s, &StreamEvent::End)));

    let events = recorder.events();
    let StreamEvent::Error(fault) = &events[2] else {
        panic!("expected Error, got {events:?}");
    };
    assert!(fault.reason.contains("dma aborted"));
    assert_eq!(fault.blocks_completed, 1);
    assert_eq!(events[3], StreamEvent::End);

    assert!(rx.is_faulted());
    assert!(!rx.is_active());
    assert!(matches!(rx.set_state(true), Err(SmiError::InvalidState { .. })));

    rx.release().unwrap();
    assert_eq!(recorder.events().last(), Some(&StreamEvent::Released));
}

#[test]
fn released_stream_refuses_operations() {
    let port = VirtualSmi::new(BLOCK_LEN);
    let recorder = Recorder::default();
    let mut rx = open(&port, StreamDirection::Rx, &recorder);
    rx.release().unwrap();

    assert!(matches!(rx.set_state(true), Err(SmiError::NotInitialized { .. })));
    assert!(matches!(rx.read_buffer_info(), Err(SmiError::NotInitialized { .. })));
    assert!(matches!(rx.stats(), Err(SmiError::NotInitialized { .. })));
    assert!(matches!(rx.release(), Err(SmiError::NotInitialized { .. })));
    assert_eq!(recorder.count(&StreamEvent::Released), 1);
}

#[test]
fn receive_channel_is_armed_then_idled() {
    let port = VirtualSmi::new(BLOCK_LEN);
    let address = StreamAddress::for_channel(StreamDirection::Rx, 1).unwrap();
    let ended = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&ended);
    let mut rx = SmiStream::init(
        Arc::new(port.clone()),
        address,
        StreamDirection::Rx,
        &config(),
        |_| {},
        move |_, event| {
            if *event == StreamEvent::End {
                *flag.lock().unwrap() = true;
            }
        },
    )
    .unwrap();

    rx.set_state(true).unwrap();
    let deadline = Instant::now() + Duration::from_secs(2);
    while port.armed().is_none() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(port.armed(), Some(StreamState::RxChannel1));

    rx.set_state(false).unwrap();
    while !*ended.lock().unwrap() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    rx.release().unwrap();
    assert_eq!(port.arm_log(), [StreamState::RxChannel1, StreamState::Idle]);
}

#[test]
fn transmit_sends_previously_filled_block() {
    let port = VirtualSmi::new(BLOCK_LEN);
    let address = StreamAddress::for_channel(StreamDirection::Tx, 0).unwrap();
    let filled = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&filled);
    let mut tx = SmiStream::init(
        Arc::new(port.clone()),
        address,
        StreamDirection::Tx,
        &config(),
        move |block| {
            #[allow(clippy::cast_possible_truncation)]
            let value = (block.sequence + 1) as u8;
            block.data_mut().fill(value);
            log.lock().unwrap().push(block.slot);
        },
        |_, _| {},
    )
    .unwrap();

    tx.set_state(true).unwrap();
    port.signal_ready(StreamDirection::Tx, 3);
    let deadline = Instant::now() + Duration::from_secs(2);
    while port.captured_tx().len() < 3 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    tx.release().unwrap();

    let sent = port.captured_tx();
    assert_eq!(sent.len(), 3);
    for (i, block) in sent.iter().enumerate() {
        assert_eq!(block.len(), BLOCK_LEN);
        assert!(block.iter().all(|&b| usize::from(b) == i), "block {i}: {block:?}");
    }
    assert_eq!(*filled.lock().unwrap(), [0, 1, 0]);
}

#[test]
fn stats_follow_delivered_blocks() {
    let port = VirtualSmi::new(BLOCK_LEN);
    let recorder = Recorder::default();
    let mut rx = open(&port, StreamDirection::Rx, &recorder);
    assert_eq!(rx.read_buffer_info().unwrap(), (BLOCK_LEN, 2));

    rx.set_state(true).unwrap();
    port.signal_ready(StreamDirection::Rx, 4);
    assert!(recorder.wait_until(Duration::from_secs(2), |s| data_count(s) == 4));
    rx.set_state(false).unwrap();
    assert!(recorder.wait_until(Duration::from_secs(2), |s| has_event(s, &StreamEvent::End)));

    let stats = rx.stats().unwrap();
    assert_eq!(stats.blocks, 4);
    assert_eq!(stats.bytes, 4 * BLOCK_LEN as u64);
    assert!(stats.bitrate_bps > 0.0);
    rx.release().unwrap();
}

#[test]
fn blocks_hand_off_through_queue_in_order() {
    let port = VirtualSmi::new(BLOCK_LEN);
    port.set_fill(FillPattern::BlockIndex);
    let queue: Arc<BlockQueue> = Arc::new(BlockQueue::bounded(64));
    let producer = Arc::clone(&queue);

    let address = StreamAddress::for_channel(StreamDirection::Rx, 0).unwrap();
    let mut rx = SmiStream::init(
        Arc::new(port.clone()),
        address,
        StreamDirection::Rx,
        &config(),
        move |block| {
            producer
                .push_head(Bytes::copy_from_slice(block.data()))
                .unwrap();
        },
        |_, _| {},
    )
    .unwrap();

    rx.set_state(true).unwrap();
    port.signal_ready(StreamDirection::Rx, 8);

    let mut received = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(2);
    while received.len() < 8 && Instant::now() < deadline {
        match queue.pop_tail() {
            Ok(block) => received.push(block),
            Err(SmiError::Empty) => std::thread::sleep(Duration::from_millis(1)),
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    rx.release().unwrap();

    assert_eq!(received.len(), 8);
    for (i, block) in received.iter().enumerate() {
        assert!(block.iter().all(|&b| usize::from(b) == i));
    }
    assert_eq!(queue.dropped(), 0);
}

#[test]
#[ignore] // Requires hardware
fn hardware_receive_one_second() {
    use caribou_driver::{SmiDevice, StreamPort};

    let device = SmiDevice::open(std::path::Path::new(caribou_driver::chip::smi::DEVICE_PATH)).expect("smi device");
    let port: Arc<dyn StreamPort> = Arc::new(device);
    let address = StreamAddress::for_channel(StreamDirection::Rx, 0).unwrap();
    let recorder = Recorder::default();
    let data = recorder.clone();
    let mut rx = SmiStream::init(
        port,
        address,
        StreamDirection::Rx,
        &StreamConfig::default(),
        move |block| {
            data.push(Seen::Data {
                slot: block.slot,
                sequence: block.sequence,
                first: block.data()[0],
            });
        },
        |_, event| println!("{event:?}"),
    )
    .unwrap();

    rx.set_state(true).unwrap();
    std::thread::sleep(Duration::from_secs(1));
    rx.set_state(false).unwrap();
    let stats = rx.stats().unwrap();
    rx.release().unwrap();

    println!("Blocks: {}, bitrate: {:.1} Mbit/s", stats.blocks, stats.bitrate_bps / 1e6);
    assert!(stats.blocks > 0);
}
