use std::thread;

use jtag_bscan::bsdl;
use jtag_bscan::cable::sim::{SimChain, SimTap};
use jtag_bscan::cable::SharedCable;
use jtag_bscan::{
    AttachPolicy, BsdlDescription, Error, FixedDriver, IdCodePattern, PinDirection, PinRegister,
    PinState, PinValue, ProbeTransport, ScanMode, Session, SessionConfig,
};

const DEMO_MCU: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/data/demo_mcu.bsd");
const PROBE: &str = "USB JLINK ARM";
const MCU_ID: u32 = 0x4BA0_6477;
const OTHER_ID: u32 = 0x0641_3041;

fn mcu() -> BsdlDescription {
    bsdl::parse_file(DEMO_MCU).unwrap()
}

struct Bench {
    transport: ProbeTransport,
    chain: SharedCable<SimChain>,
}

impl Bench {
    fn new(taps: Vec<SimTap>) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let chain = SharedCable::new(SimChain::new(taps));
        let mut driver = FixedDriver::new("sim");
        driver.add_shared(PROBE, chain.clone());
        let mut transport = ProbeTransport::new();
        transport.register_driver(Box::new(driver));
        Bench { transport, chain }
    }

    /// The microcontroller nearest TDO, followed by a TAP with a 5-bit IR
    fn standard() -> Self {
        Self::new(vec![
            SimTap::from_description(mcu(), MCU_ID),
            SimTap::with_idcode(5, OTHER_ID),
        ])
    }

    fn open(&self) -> Session {
        self.open_with(SessionConfig::default())
    }

    fn open_with(&self, config: SessionConfig) -> Session {
        Session::open_by_name(&self.transport, PROBE, config).unwrap()
    }

    fn set_input(&self, pin: &str, level: bool) {
        self.chain.lock().tap_mut(0).unwrap().set_input(pin, level);
    }

    fn pad(&self, pin: &str) -> Option<bool> {
        self.chain.lock().tap(0).unwrap().pad(pin)
    }
}

#[test]
fn detects_chain() {
    let bench = Bench::standard();
    let mut session = bench.open();
    assert_eq!(session.probe_name(), PROBE);

    assert_eq!(session.scan_init_chain().unwrap(), 2);
    assert_eq!(session.get_number_devices().unwrap(), 2);
    assert_eq!(session.get_devid(0).unwrap(), MCU_ID);
    assert_eq!(session.get_devid(1).unwrap(), OTHER_ID);
    assert!(matches!(
        session.get_devid(2),
        Err(Error::IndexOutOfRange { index: 2, count: 2 })
    ));

    let devices = session.devices().unwrap();
    assert_eq!(devices[0].ir_len, Some(4));
    assert_eq!(devices[1].ir_len, Some(5));
}

#[test]
fn idcode_pattern_of_the_fixture() {
    let pattern = bsdl::extract_devid(&mcu()).unwrap();
    assert_eq!(pattern, "0x4BA0*477".parse::<IdCodePattern>().unwrap());
    assert_eq!(pattern.to_string(), "0x4BA0*477");
    assert!(pattern.matches(0x4BA0_0477));
    assert!(pattern.matches(MCU_ID));
    assert!(!pattern.matches(0x5BA0_0477));

    // Any die revision binds
    let bench = Bench::new(vec![SimTap::from_description(mcu(), 0x4BA0_0477)]);
    let mut session = bench.open();
    assert_eq!(session.scan_init_chain().unwrap(), 1);
    session.attach(mcu(), 0).unwrap();
}

#[test]
fn broken_chain() {
    let bench = Bench::standard();
    bench.chain.lock().set_stuck_tdo(Some(true));
    let mut session = bench.open();
    assert!(matches!(session.scan_init_chain(), Err(Error::ChainScanError(_))));
    assert!(matches!(session.get_number_devices(), Err(Error::ChainScanError(_))));
}

#[test]
fn operations_need_a_scanned_chain() {
    let bench = Bench::standard();
    let mut session = bench.open();
    assert!(matches!(session.get_devid(0), Err(Error::ChainScanError(_))));
    assert!(matches!(
        session.attach(mcu(), 0),
        Err(Error::PositionOutOfRange { position: 0, count: 0 })
    ));
    assert!(matches!(session.scan(), Err(Error::ChainScanError(_))));
}

#[test]
fn attach_checks_idcode_and_position() {
    let bench = Bench::standard();
    let mut session = bench.open();
    session.scan_init_chain().unwrap();

    let dev = session.attach_file(DEMO_MCU, 0).unwrap();
    assert_eq!(dev.position, 0);
    assert_eq!(session.description(dev).unwrap().entity(), "DEMO_MCU");
    assert_eq!(session.get_scan_mode(dev).unwrap(), ScanMode::Passive);

    assert!(matches!(
        session.attach(mcu(), 1),
        Err(Error::DescriptionMismatch { position: 1, .. })
    ));
    assert!(matches!(
        session.attach(mcu(), 2),
        Err(Error::PositionOutOfRange { position: 2, count: 2 })
    ));
    assert!(matches!(session.attach_file("/nonexistent/part.bsd", 0), Err(Error::Io(_))));
}

#[test]
fn permissive_attach_still_checks_ir_length() {
    let bench = Bench::new(vec![
        SimTap::from_description(mcu(), MCU_ID),
        SimTap::with_idcode(4, OTHER_ID),
        SimTap::with_idcode(5, OTHER_ID),
    ]);
    let mut session = bench.open_with(SessionConfig::default().attach_policy(AttachPolicy::Permissive));
    session.scan_init_chain().unwrap();

    // Wrong IDCODE, right IR length
    session.attach(mcu(), 1).unwrap();
    // Wrong IR length
    assert!(matches!(
        session.attach(mcu(), 2),
        Err(Error::DescriptionMismatch { position: 2, .. })
    ));
}

#[test]
fn enumerates_pins() {
    let bench = Bench::standard();
    let mut session = bench.open();
    session.scan_init_chain().unwrap();
    let dev = session.attach(mcu(), 0).unwrap();

    // Linkage ports are left out
    assert_eq!(session.pins_get_number(dev).unwrap(), 14);
    assert_eq!(session.pin_get_properties(dev, 0).unwrap(), ("TCK".to_string(), PinDirection::Input));
    assert_eq!(session.pin_get_properties(dev, 3).unwrap(), ("TDO".to_string(), PinDirection::Output));
    assert_eq!(session.pin_get_properties(dev, 4).unwrap(), ("NRST".to_string(), PinDirection::Input));
    assert_eq!(
        session.pin_get_properties(dev, 5).unwrap(),
        ("PA9".to_string(), PinDirection::Bidirectional)
    );
    assert_eq!(session.pin_get_properties(dev, 8).unwrap(), ("PB0".to_string(), PinDirection::Output));
    assert_eq!(
        session.pin_get_properties(dev, 10).unwrap(),
        ("D(3)".to_string(), PinDirection::Bidirectional)
    );
    assert!(matches!(
        session.pin_get_properties(dev, 14),
        Err(Error::IndexOutOfRange { index: 14, count: 14 })
    ));

    assert_eq!(session.pin_get_id(dev, "PA10").unwrap(), 6);
    assert_eq!(session.pin_get_id(dev, "D(0)").unwrap(), 13);
    assert!(matches!(session.pin_get_id(dev, "pa10"), Err(Error::UnknownPinName(_))));

    let description = session.description(dev).unwrap();
    assert_eq!(description.package(), Some("LQFP48"));
    assert_eq!(description.pin("D(3)").unwrap().package_pins, vec!["44".to_string()]);
}

#[test]
fn passive_scan_samples_pins() {
    let bench = Bench::standard();
    let mut session = bench.open();
    session.scan_init_chain().unwrap();
    let dev = session.attach(mcu(), 0).unwrap();

    assert_eq!(session.pin_get_state(dev, "PA10").unwrap(), PinState::Unknown);

    bench.set_input("PA10", false);
    bench.set_input("NRST", false);
    bench.chain.lock().tap_mut(0).unwrap().set_core_output("PB0", Some(true));
    session.scan().unwrap();

    assert_eq!(session.pin_get_state(dev, "PA10").unwrap(), PinState::Low);
    assert_eq!(session.pin_get_state(dev, "NRST").unwrap(), PinState::Low);
    // Pulled up
    assert_eq!(session.pin_get_state(dev, "PA9").unwrap(), PinState::High);
    assert_eq!(session.pin_get_state(dev, "PB0").unwrap(), PinState::High);
    assert_eq!(bench.chain.lock().tap(0).unwrap().instruction_name(), "SAMPLE");
    assert_eq!(bench.chain.lock().tap(1).unwrap().instruction_name(), "BYPASS");

    // Staged values do not reach the pads while sampling
    session.pin_set_state(dev, "PA9", false).unwrap();
    session.scan().unwrap();
    assert_eq!(bench.pad("PA9"), Some(true));
    assert_eq!(session.pin_get_state(dev, "PA9").unwrap(), PinState::High);
}

#[test]
fn active_scan_round_trips() {
    let bench = Bench::standard();
    let mut session = bench.open();
    session.scan_init_chain().unwrap();
    let dev = session.attach(mcu(), 0).unwrap();
    session.set_scan_mode(dev, ScanMode::Active).unwrap();

    let values = [
        ("PA9", PinValue::High),
        ("PA10", PinValue::Low),
        ("PB0", PinValue::High),
        ("PB1", PinValue::Low),
        ("D(2)", PinValue::High),
        ("D(0)", PinValue::Low),
    ];
    for (pin, value) in values {
        session.pin_set_state(dev, pin, value).unwrap();
    }
    session.scan().unwrap();

    for (pin, value) in values {
        let expected = if value == PinValue::High { PinState::High } else { PinState::Low };
        assert_eq!(session.pin_get_state(dev, pin).unwrap(), expected, "{}", pin);
    }
    assert_eq!(bench.pad("PA9"), Some(true));
    assert_eq!(bench.pad("PA10"), Some(false));
    assert_eq!(bench.pad("D(0)"), Some(false));
    assert_eq!(bench.chain.lock().tap(0).unwrap().instruction_name(), "EXTEST");

    // Never driven
    assert_eq!(session.pin_get_state(dev, "PA11").unwrap(), PinState::HighZ);

    bench.set_input("NRST", false);
    session.scan().unwrap();
    assert_eq!(session.pin_get_state(dev, "NRST").unwrap(), PinState::Low);

    session.pin_set_state(dev, "PA10", true).unwrap();
    session.scan().unwrap();
    assert_eq!(session.pin_get_state(dev, "PA10").unwrap(), PinState::High);
    assert_eq!(bench.pad("PA10"), Some(true));
}

#[test]
fn tri_state() {
    let bench = Bench::standard();
    let mut session = bench.open();
    session.scan_init_chain().unwrap();
    let dev = session.attach(mcu(), 0).unwrap();
    session.set_scan_mode(dev, ScanMode::Active).unwrap();

    session.pin_set_state(dev, "PA9", PinValue::Low).unwrap();
    session.scan().unwrap();
    assert_eq!(bench.pad("PA9"), Some(false));
    assert_eq!(
        session.pin_get_register(dev, "PA9", PinRegister::OutputEnable).unwrap(),
        Some(true)
    );

    session.pin_set_state(dev, "PA9", None::<bool>).unwrap();
    session.scan().unwrap();
    assert_eq!(session.pin_get_state(dev, "PA9").unwrap(), PinState::HighZ);
    assert_eq!(
        session.pin_get_register(dev, "PA9", PinRegister::OutputEnable).unwrap(),
        Some(false)
    );
    // Released to the pull-up
    assert_eq!(bench.pad("PA9"), Some(true));
    bench.set_input("PA9", false);
    session.scan().unwrap();
    assert_eq!(
        session.pin_get_register(dev, "PA9", PinRegister::Input).unwrap(),
        Some(false)
    );
}

#[test]
fn rejects_bad_pin_writes() {
    let bench = Bench::standard();
    let mut session = bench.open();
    session.scan_init_chain().unwrap();
    let dev = session.attach(mcu(), 0).unwrap();

    assert!(matches!(
        session.pin_set_state(dev, "NRST", true),
        Err(Error::InvalidDirection(_))
    ));
    assert!(matches!(
        session.pin_set_state(dev, "TCK", false),
        Err(Error::InvalidDirection(_))
    ));
    assert!(matches!(
        session.pin_set_state(dev, "PB1", PinValue::HighImpedance),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        session.pin_set_state(dev, "PA99", true),
        Err(Error::UnknownPinName(_))
    ));
    assert!(matches!(
        session.pin_get_state(dev, "pa9"),
        Err(Error::UnknownPinName(_))
    ));
    session.pin_set_state(dev, "PB1", "low".parse::<PinValue>().unwrap()).unwrap();
    assert_eq!(
        session.pin_get_register(dev, "PB1", PinRegister::Output).unwrap(),
        Some(false)
    );
}

#[test]
fn instruction_register_reloaded_only_on_change() {
    let bench = Bench::standard();
    let mut session = bench.open();
    session.scan_init_chain().unwrap();
    let dev = session.attach(mcu(), 0).unwrap();
    let updates = || bench.chain.lock().tap(0).unwrap().ir_updates();
    let start = updates();

    // Straight into EXTEST: preload under SAMPLE first
    session.set_scan_mode(dev, ScanMode::Active).unwrap();
    session.scan().unwrap();
    assert_eq!(updates(), start + 2);
    session.scan().unwrap();
    assert_eq!(updates(), start + 2);

    session.set_scan_mode(dev, ScanMode::Passive).unwrap();
    session.scan().unwrap();
    session.scan().unwrap();
    assert_eq!(updates(), start + 3);

    // SAMPLE is already latched, so only EXTEST is loaded
    session.set_scan_mode(dev, ScanMode::Active).unwrap();
    session.scan().unwrap();
    assert_eq!(updates(), start + 4);
}

#[test]
fn entering_extest_leaves_driving_devices_alone() {
    let bench = Bench::new(vec![
        SimTap::from_description(mcu(), MCU_ID),
        SimTap::from_description(mcu(), MCU_ID),
    ]);
    let mut session = bench.open();
    assert_eq!(session.scan_init_chain().unwrap(), 2);
    let first = session.attach(mcu(), 0).unwrap();
    let second = session.attach(mcu(), 1).unwrap();

    session.set_scan_mode(first, ScanMode::Active).unwrap();
    session.pin_set_state(first, "PA9", false).unwrap();
    session.scan().unwrap();
    assert_eq!(bench.pad("PA9"), Some(false));

    // Only the second device is preloaded; the first keeps holding PA9 low
    session.set_scan_mode(second, ScanMode::Active).unwrap();
    session.pin_set_state(second, "PA9", true).unwrap();
    session.scan().unwrap();

    {
        let chain = bench.chain.lock();
        let (near, far) = (chain.tap(0).unwrap(), chain.tap(1).unwrap());
        assert_eq!(near.extest_releases(), 0);
        assert_eq!(near.instruction_name(), "EXTEST");
        assert_eq!(near.pad("PA9"), Some(false));
        assert_eq!(far.instruction_name(), "EXTEST");
        assert_eq!(far.pad("PA9"), Some(true));
    }
    assert_eq!(session.pin_get_state(first, "PA9").unwrap(), PinState::Low);
    assert_eq!(session.pin_get_state(second, "PA9").unwrap(), PinState::High);
}

#[test]
fn failed_scan_keeps_previous_state() {
    let bench = Bench::standard();
    let mut session = bench.open();
    session.scan_init_chain().unwrap();
    let dev = session.attach(mcu(), 0).unwrap();
    session.set_scan_mode(dev, ScanMode::Active).unwrap();
    session.pin_set_state(dev, "PA9", true).unwrap();
    session.scan().unwrap();

    session.pin_set_state(dev, "PA9", false).unwrap();
    bench.chain.lock().set_fault(Some("probe unplugged".into()));
    assert!(matches!(session.scan(), Err(Error::Cable(_))));
    assert_eq!(session.pin_get_state(dev, "PA9").unwrap(), PinState::High);
    assert_eq!(
        session.pin_get_register(dev, "PA9", PinRegister::Output).unwrap(),
        Some(false)
    );

    bench.chain.lock().set_fault(None);
    session.scan().unwrap();
    assert_eq!(session.pin_get_state(dev, "PA9").unwrap(), PinState::Low);
    assert_eq!(bench.pad("PA9"), Some(false));
}

#[test]
fn write_only_scan_keeps_captured_values() {
    let bench = Bench::standard();
    let mut session = bench.open();
    session.scan_init_chain().unwrap();
    let dev = session.attach(mcu(), 0).unwrap();

    session.scan().unwrap();
    assert_eq!(session.pin_get_state(dev, "PA10").unwrap(), PinState::High);

    bench.set_input("PA10", false);
    session.scan_write_only().unwrap();
    assert_eq!(session.pin_get_state(dev, "PA10").unwrap(), PinState::High);

    session.scan().unwrap();
    assert_eq!(session.pin_get_state(dev, "PA10").unwrap(), PinState::Low);
}

#[test]
fn detach_returns_tap_to_bypass() {
    let bench = Bench::standard();
    let mut session = bench.open();
    session.scan_init_chain().unwrap();
    let dev = session.attach(mcu(), 0).unwrap();
    session.scan().unwrap();

    session.detach(0).unwrap();
    // Nothing bound there any more
    session.detach(0).unwrap();
    assert!(matches!(session.pins_get_number(dev), Err(Error::InvalidArgument(_))));
    assert!(matches!(
        session.detach(5),
        Err(Error::PositionOutOfRange { position: 5, count: 2 })
    ));

    session.scan().unwrap();
    assert_eq!(bench.chain.lock().tap(0).unwrap().instruction_name(), "BYPASS");
}

#[test]
fn deinit_is_idempotent() {
    let bench = Bench::standard();
    let mut session = bench.open();
    session.scan_init_chain().unwrap();
    let dev = session.attach(mcu(), 0).unwrap();
    session.set_scan_mode(dev, ScanMode::Active).unwrap();
    session.scan().unwrap();

    session.deinit();
    session.deinit();
    assert!(!session.is_open());
    // The chain was reset on the way out
    assert_eq!(bench.chain.lock().tap(0).unwrap().instruction_name(), "IDCODE");

    assert!(matches!(session.scan(), Err(Error::ProbeUnavailable(_))));
    assert!(matches!(session.get_devid(0), Err(Error::ProbeUnavailable(_))));
    assert!(matches!(session.pin_get_state(dev, "PA9"), Err(Error::ProbeUnavailable(_))));
    assert!(matches!(session.scan_init_chain(), Err(Error::ProbeUnavailable(_))));

    // The probe can be claimed again
    bench.open();
}

#[test]
fn probe_is_exclusive() {
    let bench = Bench::standard();
    assert!(bench.transport.list_probes().contains_key(PROBE));

    let first = bench.open();
    assert!(matches!(
        Session::open_by_name(&bench.transport, PROBE, SessionConfig::default()),
        Err(Error::ProbeUnavailable(_))
    ));
    assert!(matches!(
        Session::open_by_name(&bench.transport, "no such probe", SessionConfig::default()),
        Err(Error::ProbeUnavailable(_))
    ));
    drop(first);
    bench.open();
}

#[test]
fn shared_session_across_threads() {
    let bench = Bench::standard();
    let mut session = bench.open();
    session.scan_init_chain().unwrap();
    let dev = session.attach(mcu(), 0).unwrap();
    session.set_scan_mode(dev, ScanMode::Active).unwrap();
    let shared = session.into_shared();

    let workers: Vec<_> = (0..4)
        .map(|i| {
            let shared = shared.clone();
            thread::spawn(move || {
                let pin = format!("D({})", i);
                shared.pin_set_state(dev, &pin, true).unwrap();
                shared.scan().unwrap();
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    for i in 0..4 {
        let pin = format!("D({})", i);
        assert_eq!(shared.pin_get_state(dev, &pin).unwrap(), PinState::High);
        assert_eq!(bench.pad(&pin), Some(true));
    }

    shared.deinit();
    assert!(matches!(shared.scan(), Err(Error::ProbeUnavailable(_))));
}
