use crate::config::Settings;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Master tempo, MIDI clock and MIDI routing hub", long_about = None)]
pub struct Args {
    /// Settings file (TOML, YAML or JSON)
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Initial tempo in beats per minute
    #[arg(long)]
    pub bpm: Option<f64>,

    /// Beats per bar used for phase alignment
    #[arg(long)]
    pub quantum: Option<u32>,

    /// Do not broadcast the network tempo beacon
    #[arg(long)]
    pub no_beacon: bool,

    /// Start playing immediately and show the transport monitor instead of a prompt
    #[arg(long)]
    pub headless: bool,

    /// Also log to the terminal
    #[arg(long, short)]
    pub verbose: bool,
}

impl Args {
    /// Applies command-line overrides on top of loaded settings.
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(bpm) = self.bpm {
            settings.timing.bpm = bpm;
        }
        if let Some(quantum) = self.quantum {
            settings.timing.quantum = quantum;
        }
        if self.no_beacon {
            settings.timing.beacon.enabled = false;
        }
    }
}

/// A console command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Stop,
    Bpm(f64),
    Status,
    Devices,
    Ports,
    Quit,
    Help,
}

/// Parses one console line. Returns `None` for blank or unrecognised input.
pub fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim().to_lowercase();
    let mut words = line.split_whitespace();
    let head = words.next()?;

    match head {
        "start" | "s" | "play" => Some(Command::Start),
        "stop" | "t" => Some(Command::Stop),
        "status" | "st" => Some(Command::Status),
        "devices" | "d" => Some(Command::Devices),
        "ports" | "p" => Some(Command::Ports),
        "quit" | "q" | "exit" => Some(Command::Quit),
        "help" | "h" | "?" => Some(Command::Help),
        "bpm" | "b" => words.next()?.parse().ok().map(Command::Bpm),
        _ => head
            .strip_prefix('b')
            .and_then(|value| value.parse().ok())
            .map(Command::Bpm),
    }
}

pub const HELP: &str = "\
Commands:
  start | s        start playback
  stop  | t        stop playback
  bpm <n> | b<n>   set tempo (60-200)
  status           show timing and clock status
  devices          list clock output devices
  ports            list router ports and connections
  quit  | q        exit";
