//! Load an iCE40 bitstream
//!
//! Usage: `cargo run --example program_fpga -- top.bin`

use caribou_driver::prelude::*;
use std::sync::Arc;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("caribou_driver=info")
        .init();

    let Some(path) = std::env::args().nth(1) else {
        eprintln!("usage: program_fpga <bitstream.bin>");
        std::process::exit(2);
    };

    let config = DriverConfig::from_env();
    let board = open_board(&config)?;
    board.bus.init()?;

    let fpga = LogicConfigurator::new(
        Arc::clone(&board.bus),
        Arc::clone(&board.gpio),
        config.configurator,
        config.timing,
    );
    fpga.init()?;

    if fpga.is_configured()? {
        println!("ℹ️  FPGA already configured, reloading");
    }

    println!("🔧 Loading {path}...");
    let result = fpga.configure_from_reader(std::fs::File::open(&path)?);
    match &result {
        Ok(()) => println!("✅ FPGA configured ({:?})", fpga.state()),
        Err(e) => {
            println!("❌ {e} ({:?}), pulsing reset", fpga.state());
            fpga.hard_reset(ResetLevel::Pulse)?;
        }
    }

    fpga.release()?;
    board.bus.close()?;
    result
}
