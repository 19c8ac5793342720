// config.rs

use crate::error::{Error, Result};
use crate::router::{MidiFilter, MidiTransform, PortDirection};
use config::{Environment, File};
use log::{debug, info};
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::path::Path;

/// MIDI clock resolution.
pub const PULSES_PER_QUARTER_NOTE: u32 = 24;
pub const MIN_BPM: f64 = 60.0;
pub const MAX_BPM: f64 = 200.0;
pub const DEFAULT_BPM: f64 = 120.0;
pub const DEFAULT_QUANTUM: u32 = 4;

pub const BEACON_GROUP: &str = "224.76.78.75";
pub const BEACON_PORT: u16 = 20808;
pub const BEACON_MAGIC: &str = "_abl";

const ENV_PREFIX: &str = "CONDUCTOR";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub timing: TimingSettings,
    pub clock: ClockSettings,
    pub router: RouterSettings,
    pub devices: Vec<DeviceConfig>,
    pub ports: Vec<PortConfig>,
    pub connections: Vec<ConnectionConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    pub bpm: f64,
    pub quantum: u32,
    pub update_interval_us: u64,
    pub beacon: BeaconSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BeaconSettings {
    pub enabled: bool,
    pub group: String,
    pub port: u16,
    pub interval_ms: u64,
    pub ttl: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClockSettings {
    pub tick_interval_us: u64,
    pub heartbeat_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterSettings {
    pub poll_timeout_ms: u64,
}

/// A clock output device registered at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    pub port_id: String,
}

/// A router port registered at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct PortConfig {
    pub id: String,
    pub name: String,
    pub direction: PortDirection,
}

/// A router connection registered at startup, with its processing chains.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    pub input: String,
    pub output: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub filters: Vec<MidiFilter>,
    #[serde(default)]
    pub transforms: Vec<MidiTransform>,
}

fn enabled_by_default() -> bool {
    true
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            bpm: DEFAULT_BPM,
            quantum: DEFAULT_QUANTUM,
            update_interval_us: 1_000,
            beacon: BeaconSettings::default(),
        }
    }
}

impl Default for BeaconSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            group: BEACON_GROUP.to_string(),
            port: BEACON_PORT,
            interval_ms: 20,
            ttl: 2,
        }
    }
}

impl Default for ClockSettings {
    fn default() -> Self {
        Self {
            tick_interval_us: 1_000,
            heartbeat_ms: 300,
        }
    }
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 100,
        }
    }
}

impl Settings {
    /// Loads settings from an optional file, then `CONDUCTOR_*` environment
    /// variables (`CONDUCTOR_TIMING__BPM=128`). Missing keys keep their defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!("Loading settings from {}", path.display());
            builder = builder.add_source(File::from(path).required(true));
        }

        let settings: Settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        debug!("Loaded settings: {:?}", settings);
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        crate::timing::validate_tempo(self.timing.bpm)?;
        if self.timing.quantum == 0 {
            return Err(Error::InvalidQuantum(0));
        }
        if self.timing.beacon.group.parse::<Ipv4Addr>().is_err() {
            return Err(Error::InvalidBeaconGroup(self.timing.beacon.group.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    // Loading reads the process environment, which tests share.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.timing.bpm, 120.0);
        assert_eq!(settings.timing.quantum, 4);
        assert_eq!(settings.timing.beacon.group, "224.76.78.75");
        assert_eq!(settings.timing.beacon.port, 20808);
        assert_eq!(settings.clock.heartbeat_ms, 300);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let path = std::env::temp_dir().join(format!("conductor-test-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[timing]
bpm = 96.0

[timing.beacon]
enabled = false

[[ports]]
id = "kbd"
name = "USB Keyboard"
direction = "input"

[[ports]]
id = "synth"
name = "USB Synth"
direction = "output"

[[connections]]
input = "kbd"
output = "synth"

[[connections.transforms]]
name = "Octave Up"
transpose = 12
"#
        )
        .unwrap();
        drop(file);

        let settings = Settings::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(settings.timing.bpm, 96.0);
        assert_eq!(settings.timing.quantum, 4);
        assert!(!settings.timing.beacon.enabled);
        assert_eq!(settings.ports.len(), 2);
        assert_eq!(settings.ports[0].direction, PortDirection::Input);
        assert_eq!(settings.connections.len(), 1);
        assert!(settings.connections[0].enabled);
        assert_eq!(settings.connections[0].transforms[0].transpose, 12);
    }

    #[test]
    fn test_validate_rejects_out_of_range_bpm() {
        let mut settings = Settings::default();
        settings.timing.bpm = 250.0;
        assert!(matches!(
            settings.validate(),
            Err(Error::TempoOutOfRange(_))
        ));
    }

    #[test]
    fn test_environment_overrides() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        std::env::set_var("CONDUCTOR_TIMING__BPM", "96");
        std::env::set_var("CONDUCTOR_TIMING__BEACON__ENABLED", "false");
        let loaded = Settings::load(None);
        std::env::remove_var("CONDUCTOR_TIMING__BPM");
        std::env::remove_var("CONDUCTOR_TIMING__BEACON__ENABLED");

        let settings = loaded.unwrap();
        assert_eq!(settings.timing.bpm, 96.0);
        assert!(!settings.timing.beacon.enabled);
    }

    #[test]
    fn test_validate_rejects_bad_beacon_group() {
        let mut settings = Settings::default();
        settings.timing.beacon.group = "not-an-address".to_string();
        assert!(matches!(
            settings.validate(),
            Err(Error::InvalidBeaconGroup(_))
        ));
    }
}
