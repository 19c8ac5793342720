use super::message::hex;
use crate::error::Result;
use log::trace;
use serde::Serialize;

/// An open MIDI output.
pub trait MidiSink: Send {
    fn send(&mut self, bytes: &[u8]) -> Result<()>;
}

/// Opens outputs for clock devices and router ports. Chosen once when the
/// clock generator or router is built.
pub trait MidiBackend: Send + Sync {
    fn name(&self) -> &str;

    fn open_output(&self, port_id: &str, name: &str) -> Result<Box<dyn MidiSink>>;
}

/// Backend that accepts every message and only logs it.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimulatedBackend;

impl MidiBackend for SimulatedBackend {
    fn name(&self) -> &str {
        "simulated"
    }

    fn open_output(&self, port_id: &str, name: &str) -> Result<Box<dyn MidiSink>> {
        trace!("Opening simulated output {} ({})", name, port_id);
        Ok(Box::new(SimulatedSink {
            name: name.to_string(),
        }))
    }
}

struct SimulatedSink {
    name: String,
}

impl MidiSink for SimulatedSink {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        trace!("MIDI -> {}: {}", self.name, hex(bytes));
        Ok(())
    }
}

/// A clock output device and its delivery counters.
pub struct MidiDevice {
    name: String,
    port_id: String,
    connected: bool,
    last_message_time: f64,
    messages_sent: u64,
    error_count: u64,
    sink: Box<dyn MidiSink>,
}

/// Serializable view of a [`MidiDevice`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub name: String,
    pub port_id: String,
    pub is_connected: bool,
    pub last_message_time: f64,
    pub messages_sent: u64,
    pub error_count: u64,
}

impl MidiDevice {
    pub fn new(name: impl Into<String>, port_id: impl Into<String>, sink: Box<dyn MidiSink>) -> Self {
        Self {
            name: name.into(),
            port_id: port_id.into(),
            connected: true,
            last_message_time: 0.0,
            messages_sent: 0,
            error_count: 0,
            sink,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn port_id(&self) -> &str {
        &self.port_id
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    /// Sends `bytes`, updating the sent or error counter.
    pub fn send(&mut self, bytes: &[u8]) -> Result<()> {
        match self.sink.send(bytes) {
            Ok(()) => {
                self.messages_sent += 1;
                self.last_message_time = crate::timing::unix_seconds();
                Ok(())
            }
            Err(e) => {
                self.error_count += 1;
                Err(e)
            }
        }
    }

    pub fn info(&self) -> DeviceInfo {
        DeviceInfo {
            name: self.name.clone(),
            port_id: self.port_id.clone(),
            is_connected: self.connected,
            last_message_time: self.last_message_time,
            messages_sent: self.messages_sent,
            error_count: self.error_count,
        }
    }
}
