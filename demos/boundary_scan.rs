// Boundary-scan a device on a JTAG chain
//
// Detects the chain behind a probe, binds a BSDL file to one position and then samples its pins,
// or drives some of them under EXTEST.  With --virtual the chain is simulated from the BSDL file,
// so the tool can be tried without hardware.
//
//   cargo run --example boundary_scan -- --list
//   cargo run --example boundary_scan -- --bsdl tests/data/demo_mcu.bsd --virtual --set PA9=high --watch PA9

use std::thread;
use std::time::Duration;

use clap::Parser;
use jtag_bscan::bsdl;
use jtag_bscan::cable::sim::{SimChain, SimTap};
use jtag_bscan::cable::SharedCable;
use jtag_bscan::{
    AttachPolicy, FixedDriver, PinValue, ProbeTransport, ScanMode, Session, SessionConfig,
};

#[derive(Parser)]
#[command(name = "boundary_scan")]
#[command(about = "Sample or drive device pins through IEEE 1149.1 boundary scan")]
struct Args {
    /// List the attached probes and exit
    #[arg(short, long)]
    list: bool,

    /// Probe to open, by display name
    #[arg(short, long, default_value = "USB JLINK ARM")]
    probe: String,

    /// TCK frequency in hertz
    #[arg(short, long, default_value_t = 1_000_000)]
    clock: u32,

    /// BSDL file of the device to scan
    #[arg(short, long)]
    bsdl: Option<String>,

    /// Chain position of the device, 0 is nearest TDO
    #[arg(long, default_value_t = 0)]
    position: usize,

    /// Attach even when the IDCODE does not match the BSDL file
    #[arg(long)]
    permissive: bool,

    /// Simulate a chain holding only the device described by --bsdl
    #[arg(long = "virtual")]
    simulated: bool,

    /// Drive a pin, e.g. PA9=high, PA10=low or PA11=z.  Switches the device to EXTEST.
    #[arg(short, long, value_name = "PIN=VALUE")]
    set: Vec<String>,

    /// Pin to report after each scan; every pin when none is given
    #[arg(short, long, value_name = "PIN")]
    watch: Vec<String>,

    /// Number of scans
    #[arg(short = 'n', long, default_value_t = 1)]
    count: usize,

    /// Delay between scans in milliseconds
    #[arg(short, long, default_value_t = 500)]
    interval: u64,

    /// Show debug logs
    #[arg(short, long)]
    verbose: bool,
}

fn parse_assignment(text: &str) -> Result<(String, PinValue), Box<dyn std::error::Error>> {
    let (pin, value) = text
        .split_once('=')
        .ok_or_else(|| format!("expected PIN=VALUE, got `{}`", text))?;
    Ok((pin.trim().to_string(), value.parse()?))
}

fn transport(args: &Args) -> Result<ProbeTransport, Box<dyn std::error::Error>> {
    if !args.simulated {
        return Ok(ProbeTransport::with_default_drivers());
    }
    let path = args.bsdl.as_ref().ok_or("--virtual needs --bsdl")?;
    let description = bsdl::parse_file(path)?;
    let idcode = bsdl::extract_devid(&description)?.value();
    let chain = SharedCable::new(SimChain::new(vec![SimTap::from_description(description, idcode)]));

    let mut driver = FixedDriver::new("virtual");
    driver.add_shared(args.probe.clone(), chain);
    let mut transport = ProbeTransport::new();
    transport.register_driver(Box::new(driver));
    Ok(transport)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::init();
    }

    let transport = transport(&args)?;
    if args.list {
        for (name, id) in transport.list_probes() {
            println!("{}  {}", id, name);
        }
        return Ok(());
    }

    let policy = if args.permissive {
        AttachPolicy::Permissive
    } else {
        AttachPolicy::Strict
    };
    let config = SessionConfig::default().clock_hz(args.clock).attach_policy(policy);
    let mut session = Session::open_by_name(&transport, &args.probe, config)?;

    let count = session.scan_init_chain()?;
    println!("{} device(s) on the chain", count);
    for device in session.devices()? {
        let ir = device
            .ir_len
            .map_or_else(|| "?".to_string(), |len| len.to_string());
        println!("  {}: IDCODE {:#010x}, IR length {}", device.position, device.idcode, ir);
    }

    let Some(path) = &args.bsdl else {
        return Ok(());
    };
    let device = session.attach_file(path, args.position)?;
    let description = session.description(device)?;
    println!("attached {} at position {}", description.entity(), args.position);

    let assignments = args
        .set
        .iter()
        .map(|s| parse_assignment(s))
        .collect::<Result<Vec<_>, _>>()?;
    if !assignments.is_empty() {
        session.set_scan_mode(device, ScanMode::Active)?;
    }
    for (pin, value) in assignments {
        session.pin_set_state(device, &pin, value)?;
    }

    let watched: Vec<String> = if args.watch.is_empty() {
        description.pins().iter().map(|p| p.name.clone()).collect()
    } else {
        args.watch.clone()
    };

    for n in 0..args.count.max(1) {
        if n > 0 {
            thread::sleep(Duration::from_millis(args.interval));
        }
        session.scan()?;
        let states = watched
            .iter()
            .map(|pin| Ok(format!("{}={}", pin, session.pin_get_state(device, pin)?)))
            .collect::<jtag_bscan::Result<Vec<_>>>()?;
        println!("{}", states.join(" "));
    }

    session.deinit();
    Ok(())
}
