use thiserror::Error;

/// Errors returned by the control surface of the engine, clock and router.
#[derive(Error, Debug)]
pub enum Error {
    #[error("tempo {0} BPM is outside the supported range ({min}-{max})", min = crate::config::MIN_BPM, max = crate::config::MAX_BPM)]
    TempoOutOfRange(f64),

    #[error("quantum must be at least one beat, got {0}")]
    InvalidQuantum(u32),

    #[error("beacon group '{0}' is not an IPv4 address")]
    InvalidBeaconGroup(String),

    #[error("MIDI channel {0} is outside 0-15")]
    InvalidChannel(u8),

    #[error("MIDI data byte {0} is outside 0-127")]
    InvalidDataByte(u8),

    #[error("{0:?} cannot be built with this constructor")]
    KindMismatch(crate::midi::MessageKind),

    #[error("{0:?} needs a MIDI channel")]
    MissingChannel(crate::midi::MessageKind),

    #[error("unknown MIDI status byte {0:#04x}")]
    UnknownStatus(u8),

    #[error("MIDI message {kind:?} needs {expected} bytes, got {actual}")]
    Truncated {
        kind: crate::midi::MessageKind,
        expected: usize,
        actual: usize,
    },

    #[error("empty MIDI message")]
    EmptyMessage,

    #[error("port '{0}' is not registered")]
    PortNotFound(String),

    #[error("port '{0}' is already registered")]
    PortExists(String),

    #[error("port '{port}' is not an {expected} port")]
    PortDirection {
        port: String,
        expected: crate::router::PortDirection,
    },

    #[error("no connection {0} -> {1}")]
    ConnectionNotFound(String, String),

    #[error("connection {0} -> {1} already exists")]
    ConnectionExists(String, String),

    #[error("device '{0}' is not registered")]
    DeviceNotFound(String),

    #[error("device '{0}' is already registered")]
    DeviceExists(String),

    #[error("velocity curve must have 128 entries in 0-127, got {0} entries")]
    InvalidVelocityCurve(usize),

    #[error("channel map entry {from} -> {to} is outside 0-15")]
    InvalidChannelMap { from: u8, to: u8 },

    #[error("failed to send to '{port}': {reason}")]
    Send { port: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
