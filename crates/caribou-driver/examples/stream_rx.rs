//! Receive IQ samples from the SMI stream device for a few seconds
//!
//! Expects the FPGA to be configured already (see `program_fpga`).

use caribou_driver::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("caribou_driver=info")
        .init();

    let channel: u8 = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(0);

    let config = DriverConfig::from_env();
    let smi = Arc::new(caribou_driver::SmiDevice::open(&config.smi_device)?);
    let address = StreamAddress::for_channel(StreamDirection::Rx, channel)?;

    let samples = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&samples);

    let mut rx = SmiStream::init(
        smi,
        address,
        StreamDirection::Rx,
        &config.stream,
        move |block| {
            counter.fetch_add(block.iq_words().len() as u64, Ordering::Relaxed);
        },
        |address, event| println!("  {address}: {event:?}"),
    )?;

    let (len, count) = rx.read_buffer_info()?;
    println!("📡 Channel {channel}, {count} × {len} byte blocks");

    rx.set_state(true)?;
    for _ in 0..5 {
        std::thread::sleep(Duration::from_secs(1));
        let stats = rx.stats()?;
        println!(
            "  {} blocks, {:.2} Mbit/s",
            stats.blocks,
            stats.bitrate_bps / 1e6
        );
    }
    rx.set_state(false)?;
    rx.release()?;

    println!("✅ {} IQ samples received", samples.load(Ordering::Relaxed));
    Ok(())
}
