mod calibration;
mod commands;
mod config;
mod error;
mod hold;
mod input;
mod output;
mod pad;
mod session;

use clap::Parser;
use config::PadConfig;
use error::PadError;
use input::{select_pads, DeviceEnumerator, RawDeviceDescriptor};
use output::Emitter;
use pad::{Player, ReportDecoder};
use session::{PadController, PadSession, PadTask, ReaderTiming};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Splits two identical dance pads into Player 1 and Player 2
#[derive(Parser, Debug)]
#[command(name = "padsplit", version, about)]
struct Args {
    /// Config file (default: padsplit_config.json next to the executable)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Ignore saved and automatic assignment and calibrate right away
    #[arg(short, long)]
    calibrate: bool,

    /// Only log pad events, no synthetic keys
    #[arg(short, long)]
    logger: bool,

    /// Read joystick-style pads instead of raw HID
    #[arg(short, long)]
    joystick: bool,

    /// Do not repeat held panels
    #[arg(long)]
    no_hold: bool,

    /// Log raw reports in hex
    #[arg(long)]
    raw: bool,

    /// List HID interfaces and exit
    #[arg(long)]
    list: bool,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn list_devices(config: &PadConfig) {
    let mut enumerator = DeviceEnumerator::new(config);
    let filter = input::DeviceFilter::new(config);
    let devices = enumerator.scan_all();

    println!("{} HID interface(s)", devices.len());
    for device in &devices {
        let status = match enumerator.probe(device) {
            Ok(()) => "OK".to_string(),
            Err(e) => format!("FAILED: {}", e),
        };
        println!(
            "{} #{} {:04x}:{:04x} '{}' by {} SN {} iface={} usage_page=0x{:02x} usage={} {}",
            if filter.matches(device) { "*" } else { " " },
            device.id,
            device.vendor_id,
            device.product_id,
            device.name,
            device.manufacturer.as_deref().unwrap_or("unknown"),
            device.serial_or_unknown(),
            device.interface_number,
            device.usage_page,
            device.usage,
            device.path.to_string_lossy(),
        );
        println!("    open: {}", status);
    }

    let pads = select_pads(&enumerator.scan());
    println!("{} pad(s) would be used", pads.len());
    for pad in pads {
        println!("  {}", pad.label());
    }
}

/// Opens every selected HID pad and starts its reader
fn start_hid(
    config: &PadConfig,
    controller: &mut PadController,
    decoder: Arc<ReportDecoder>,
    timing: &ReaderTiming,
) -> anyhow::Result<Vec<RawDeviceDescriptor>> {
    let mut enumerator = DeviceEnumerator::new(config);
    let pads = select_pads(&enumerator.scan());
    log::info!("Found {} pad(s)", pads.len());

    let mut attached = Vec::new();
    for pad in pads {
        let reader = match enumerator.open(&pad) {
            Ok(reader) => reader,
            Err(e) => {
                log::error!("{}", e);
                continue;
            }
        };

        let task = PadTask {
            device_id: pad.descriptor.identity(),
            label: pad.label(),
            format: pad.format,
            reader: Box::new(reader),
        };
        controller.spawn_reader(Arc::clone(&decoder), timing.clone(), task)?;
        attached.push(pad.descriptor);
    }

    Ok(attached)
}

fn choose_bindings(session: &PadSession, calibrate: bool, config: &PadConfig, attached: &[RawDeviceDescriptor]) {
    if calibrate {
        session.start_calibration();
        return;
    }

    let ids: Vec<_> = attached.iter().map(RawDeviceDescriptor::identity).collect();
    if session.restore_bindings(&config.saved_bindings(), &ids) {
        return;
    }
    if session.auto_bind(attached) {
        return;
    }

    log::warn!(
        "Only {} pad(s) found, some pads only show up once they are used",
        attached.len()
    );
    log::info!("{}", session.step().instructions());
}

fn help_text(session: &PadSession, config: &PadConfig, emitter: &Emitter) -> String {
    let mut lines = vec![
        commands::MENU.to_string(),
        format!("Output: {}", emitter.name()),
        format!("Status: {}", session.step().instructions()),
        format!("Held panels: {}", session.held_count()),
    ];

    for player in Player::ALL {
        let pad = session
            .device_for(player)
            .map(|device| session.label_for(&device))
            .unwrap_or_else(|| "not assigned".to_string());
        lines.push(format!(
            "{}: {} -> {}",
            player,
            pad,
            config.layout(player).describe()
        ));
    }
    lines.join("\n")
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = PadConfig::load(args.config.as_deref());
    if args.list {
        list_devices(&config);
        return Ok(());
    }

    let emitter = Arc::new(Emitter::select(!args.logger, config.players));
    let hold_interval = (!args.logger && !args.no_hold).then(|| config.hold_interval());
    log::info!(
        "Output: {}, hold repeat: {}",
        emitter.name(),
        hold_interval.map_or("off".to_string(), |d| format!("{} ms", d.as_millis()))
    );

    let saved_config = Mutex::new(config.clone());
    let config_path = args.config.clone();
    let session = Arc::new(
        PadSession::new(Arc::clone(&emitter), hold_interval).with_calibration_hook(move |bindings| {
            let Ok(mut saved) = saved_config.lock() else {
                return;
            };
            if !saved.set_saved_bindings(bindings) {
                log::info!("Joystick pad assignment is kept for this run only");
                return;
            }
            if let Err(e) = saved.save(config_path.as_deref()) {
                log::error!("Failed to save pad assignment: {}", e);
            }
        }),
    );

    {
        let session = Arc::clone(&session);
        if let Err(e) = ctrlc::set_handler(move || session.request_stop()) {
            log::warn!("Failed to install Ctrl-C handler: {}", e);
        }
    }

    let decoder = Arc::new(ReportDecoder::new(&config));
    let timing = ReaderTiming {
        read_timeout_ms: config.read_timeout_ms,
        poll_interval: config.poll_interval(),
        report_size: config.report_size,
        raw_dump: if args.raw { config.raw_dump_limit } else { 0 },
    };

    let mut controller = PadController::new(Arc::clone(&session));
    let attached = if args.joystick {
        let timeout = std::time::Duration::from_millis(config.read_timeout_ms.max(1) as u64);
        let (handle, found) =
            input::joystick::spawn_joystick_reader(Arc::clone(&session), Arc::clone(&decoder), timeout)?;
        controller.adopt(handle);
        found
    } else {
        start_hid(&config, &mut controller, Arc::clone(&decoder), &timing)?
    };

    if attached.is_empty() {
        controller.stop();
        return Err(PadError::NoUsablePads.into());
    }
    log::info!("{} reader(s) running", controller.reader_count());

    choose_bindings(&session, args.calibrate, &config, &attached);

    println!("{}", commands::MENU);
    let intake = commands::spawn_stdin_reader();
    commands::run_command_loop(&session, &intake, config.command_poll(), || {
        help_text(&session, &config, &emitter)
    });

    controller.stop();
    Ok(())
}
