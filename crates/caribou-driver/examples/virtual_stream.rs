//! Streaming engine walkthrough on the virtual SMI port
//!
//! Runs a receive stream without hardware and hands blocks to a consumer
//! thread through a `BlockQueue`.

use bytes::Bytes;
use caribou_driver::backends::{FillPattern, VirtualSmi};
use caribou_driver::prelude::*;
use caribou_driver::StreamConfig;
use std::sync::Arc;
use std::time::Duration;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("caribou_driver=info")
        .init();

    println!("📡 Virtual SMI stream\n");

    let port = VirtualSmi::new(4096);
    port.set_fill(FillPattern::BlockIndex);

    let queue: Arc<BlockQueue> = Arc::new(BlockQueue::bounded(16));
    let producer = Arc::clone(&queue);

    let address = StreamAddress::for_channel(StreamDirection::Rx, 0)?;
    let config = StreamConfig::default().with_block_len(4096);
    let mut rx = SmiStream::init(
        Arc::new(port.clone()),
        address,
        StreamDirection::Rx,
        &config,
        move |block| {
            if producer.push_head(Bytes::copy_from_slice(block.data())).is_err() {
                tracing::warn!("Consumer too slow, block {} dropped", block.sequence);
            }
        },
        |address, event| println!("  event {address}: {event:?}"),
    )?;

    let (len, count) = rx.read_buffer_info()?;
    println!("Arena: {count} × {len} bytes");

    rx.set_state(true)?;
    port.signal_ready(StreamDirection::Rx, 32);

    let mut received = 0;
    while received < 32 {
        match queue.pop_tail() {
            Ok(block) => {
                received += 1;
                if received % 8 == 0 {
                    println!("  consumed {received} blocks (last tag {})", block[0]);
                }
            }
            Err(SmiError::Empty) => std::thread::sleep(Duration::from_millis(1)),
            Err(e) => return Err(e),
        }
    }

    rx.set_state(false)?;
    let stats = rx.stats()?;
    rx.release()?;

    println!("\n✅ {} blocks, {} bytes, {} dropped", stats.blocks, stats.bytes, queue.dropped());
    Ok(())
}
