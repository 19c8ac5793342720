use clap::Parser;
use conductor::{
    cli::{parse_command, Args, Command, HELP},
    logging,
    ui::StatusMonitor,
    Conductor, Settings, SimulatedBackend,
};
use dialoguer::Input;
use log::LevelFilter;
use std::sync::Arc;
use std::{thread, time::Duration};

fn main() {
    let args = Args::parse();
    initialize_logging(args.verbose);

    let settings = match load_settings(&args) {
        Ok(settings) => settings,
        Err(e) => exit_with_error(&format!("Invalid settings: {}", e)),
    };

    let conductor = match Conductor::new(&settings, Arc::new(SimulatedBackend)) {
        Ok(conductor) => conductor,
        Err(e) => exit_with_error(&format!("Failed to build conductor: {}", e)),
    };
    conductor.start();

    if args.headless {
        run_headless(&conductor, settings.timing.quantum);
    } else {
        run_console(&conductor);
    }

    conductor.stop();
    log::info!("Application exiting");
}

fn initialize_logging(verbose: bool) {
    let terminal = verbose.then_some(LevelFilter::Info);
    match logging::init_logger(LevelFilter::Debug, terminal) {
        Ok(path) => log::info!("Application starting, logging to {}", path.display()),
        Err(e) => eprintln!("Logging disabled: {}", e),
    }
}

fn load_settings(args: &Args) -> conductor::Result<Settings> {
    let mut settings = Settings::load(args.config.as_deref())?;
    args.apply(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn exit_with_error(message: &str) -> ! {
    log::error!("{}", message);
    eprintln!("{}", message);
    std::process::exit(1);
}

fn run_headless(conductor: &Conductor, quantum: u32) {
    let monitor = Arc::new(StatusMonitor::new(quantum));
    monitor.attach(conductor.timing());
    conductor.start_playback();

    log::info!("Running headless. Press Ctrl+C to exit...");
    loop {
        thread::sleep(Duration::from_secs(1));
    }
}

fn run_console(conductor: &Conductor) {
    println!("{}", HELP);
    loop {
        let line = match Input::<String>::new()
            .with_prompt("conductor")
            .allow_empty(true)
            .interact_text()
        {
            Ok(line) => line,
            Err(e) => {
                log::error!("Console input failed: {}", e);
                break;
            }
        };

        match parse_command(&line) {
            Some(Command::Start) => conductor.start_playback(),
            Some(Command::Stop) => conductor.stop_playback(),
            Some(Command::Bpm(bpm)) => {
                if let Err(e) = conductor.set_bpm(bpm) {
                    println!("{}", e);
                }
            }
            Some(Command::Status) => print_status(conductor),
            Some(Command::Devices) => print_devices(conductor),
            Some(Command::Ports) => print_ports(conductor),
            Some(Command::Help) => println!("{}", HELP),
            Some(Command::Quit) => break,
            None if line.trim().is_empty() => {}
            None => println!("Unknown command: {}", line.trim()),
        }
    }
}

fn print_status(conductor: &Conductor) {
    let status = conductor.status();
    let clock = conductor.clock().status();
    println!(
        "{} | BPM {:.1} | beat {:.2} | accuracy {:.1}ms | uptime {:.0}s",
        if status.is_playing { "Playing" } else { "Stopped" },
        status.bpm,
        status.beat_position,
        status.timing_accuracy,
        status.uptime
    );
    println!(
        "MIDI clock: {} pulses, {}/{} devices connected, {} send errors",
        clock.pulse_count, clock.connected_devices, clock.device_count, clock.send_errors
    );
    if log::log_enabled!(log::Level::Debug) {
        match conductor.status_json() {
            Ok(json) => log::debug!("Detailed status: {}", json),
            Err(e) => log::warn!("Failed to serialize status: {}", e),
        }
    }
}

fn print_devices(conductor: &Conductor) {
    let devices = conductor.clock().devices();
    if devices.is_empty() {
        println!("No MIDI clock devices");
    }
    for device in devices {
        println!(
            "  - {} ({}) {} sent={} errors={}",
            device.name,
            device.port_id,
            if device.is_connected { "connected" } else { "disconnected" },
            device.messages_sent,
            device.error_count
        );
    }
}

fn print_ports(conductor: &Conductor) {
    let router = conductor.router();
    for port in router.ports() {
        println!(
            "  - {} [{}] {} messages={}",
            port.port_id, port.direction, port.name, port.message_count
        );
    }
    for connection in router.connections() {
        println!(
            "  {} -> {}{}",
            connection.input_port,
            connection.output_port,
            if connection.enabled { "" } else { " (disabled)" }
        );
    }
    let stats = router.statistics();
    println!(
        "{} connections ({} active), {:.1} msg/s",
        stats.total_connections, stats.active_connections, stats.messages_per_second
    );
}
