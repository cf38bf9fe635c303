//! iCE40 configurator validation tests
//!
//! Runs the configurator over the real pin transport with a simulated GPIO
//! bank, decoding the bit-banged image back from the recorded pin writes.

use caribou_driver::backends::SoftGpio;
use caribou_driver::chip::board::fpga;
use caribou_driver::{
    BusPins, ChipBus, ChipSpec, ConfigState, ConfigureTiming, ConfiguratorPins, LogicConfigurator,
    PinTransport, ResetLevel, SmiError, SpiMode, TransferDiscipline,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Board {
    gpio: Arc<SoftGpio>,
    bus: Arc<ChipBus>,
    configurator: Arc<LogicConfigurator>,
}

fn board(timing: ConfigureTiming) -> Board {
    let gpio = Arc::new(SoftGpio::new());
    let transport = PinTransport::new(gpio.clone(), BusPins::default(), "/nonexistent");
    let bus = Arc::new(ChipBus::new(transport));
    bus.init().unwrap();
    let configurator = Arc::new(LogicConfigurator::new(
        Arc::clone(&bus),
        gpio.clone(),
        ConfiguratorPins::default(),
        timing,
    ));
    configurator.init().unwrap();
    Board {
        gpio,
        bus,
        configurator,
    }
}

fn fast() -> ConfigureTiming {
    ConfigureTiming::default()
        .with_housekeeping(Duration::from_micros(10))
        .with_done_timeout(Duration::from_millis(50))
}

/// Bytes clocked out (mode 0, MSB first) while the FPGA select line was low
fn decode_selected(gpio: &SoftGpio) -> Vec<u8> {
    let pins = BusPins::default();
    let mut mosi = false;
    let mut sck = false;
    let mut selected = false;
    let mut bits = Vec::new();

    for write in gpio.write_log() {
        if write.pin == pins.mosi {
            mosi = write.high;
        } else if write.pin == fpga::SELECT {
            selected = !write.high;
        } else if write.pin == pins.sck {
            if write.high && !sck && selected {
                bits.push(mosi);
            }
            sck = write.high;
        }
    }

    assert_eq!(bits.len() % 8, 0, "partial byte on the wire");
    bits.chunks(8)
        .map(|byte| byte.iter().fold(0u8, |acc, &b| (acc << 1) | u8::from(b)))
        .collect()
}

#[test]
fn image_is_clocked_out_under_select() {
    let board = board(fast());
    board
        .gpio
        .set_responder(fpga::DONE, |levels| levels[usize::from(fpga::RESET)]);

    let blob: Vec<u8> = (0..600u32).map(|i| (i * 7 % 256) as u8).collect();
    board.configurator.configure(&blob).unwrap();

    assert_eq!(board.configurator.state(), ConfigState::Configured);
    assert_eq!(decode_selected(&board.gpio), blob);
    assert!(board.gpio.level(fpga::SELECT), "select released afterwards");
}

#[test]
fn done_timeout_is_bounded() {
    let timeout = Duration::from_millis(40);
    let board = board(fast().with_done_timeout(timeout));
    board.gpio.set_responder(fpga::DONE, |_| false);

    let started = Instant::now();
    let err = board.configurator.configure(&[0x5A; 32]).unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, SmiError::Timeout { .. }), "{err}");
    assert!(elapsed >= timeout);
    assert!(elapsed < timeout + Duration::from_secs(1), "took {elapsed:?}");
    assert_eq!(board.configurator.state(), ConfigState::Failed);
    assert!(board.gpio.level(fpga::SELECT));

    // Failed until the device is reset out of band
    assert!(matches!(
        board.configurator.configure(&[0x5A; 32]),
        Err(SmiError::InvalidState { .. })
    ));
    board.configurator.hard_reset(ResetLevel::Pulse).unwrap();
    assert_eq!(board.configurator.state(), ConfigState::Idle);
}

#[test]
fn concurrent_configure_is_busy() {
    let board = board(fast().with_done_timeout(Duration::from_millis(300)));
    board.gpio.set_responder(fpga::DONE, |_| false);

    let first = {
        let configurator = Arc::clone(&board.configurator);
        std::thread::spawn(move || configurator.configure(&[0x11; 8]))
    };
    let deadline = Instant::now() + Duration::from_secs(2);
    while board.configurator.state() != ConfigState::AwaitingReady && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }

    assert!(matches!(
        board.configurator.configure(&[0x22; 8]),
        Err(SmiError::Busy { .. })
    ));
    assert!(matches!(
        board.configurator.hard_reset(ResetLevel::Pulse),
        Err(SmiError::Busy { .. })
    ));
    assert!(matches!(
        first.join().unwrap(),
        Err(SmiError::Timeout { .. })
    ));
}

#[test]
fn other_chips_share_the_bus_during_configuration() {
    let board = board(fast());
    board
        .gpio
        .set_responder(fpga::DONE, |levels| levels[usize::from(fpga::RESET)]);
    let mixer = board
        .bus
        .add_chip(
            ChipSpec::new(16, 5_000_000, SpiMode::Mode0, TransferDiscipline::Poll)
                .with_name("mixer"),
        )
        .unwrap();

    let writer = {
        let bus = Arc::clone(&board.bus);
        std::thread::spawn(move || {
            for _ in 0..20 {
                bus.write(mixer, &[0x00, 0x01]).unwrap();
            }
        })
    };
    board.configurator.configure(&[0xC3; 256]).unwrap();
    writer.join().unwrap();

    assert_eq!(board.configurator.state(), ConfigState::Configured);
    assert_eq!(board.bus.chip_count(), 2);
}

#[test]
fn release_removes_programming_endpoint() {
    let board = board(fast());
    assert_eq!(board.bus.chip_count(), 1);
    board.configurator.release().unwrap();
    assert_eq!(board.bus.chip_count(), 0);
    assert!(matches!(
        board.configurator.configure(&[1]),
        Err(SmiError::NotInitialized { .. })
    ));
}

#[test]
#[ignore] // Requires hardware
fn hardware_configure_from_file() {
    use caribou_driver::backends::open_board;
    use caribou_driver::DriverConfig;

    let path = std::env::var("CARIBOU_BITSTREAM").expect("CARIBOU_BITSTREAM not set");
    let config = DriverConfig::from_env();
    let hw = open_board(&config).expect("board");
    hw.bus.init().unwrap();
    let configurator =
        LogicConfigurator::new(Arc::clone(&hw.bus), hw.gpio, config.configurator, config.timing);
    configurator.init().unwrap();

    let file = std::fs::File::open(path).unwrap();
    configurator.configure_from_reader(file).unwrap();
    assert!(configurator.is_configured().unwrap());
}
