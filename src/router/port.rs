use crate::error::{Error, Result};
use crate::midi::{MidiMessage, MidiSink};
use log::trace;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortDirection {
    Input,
    Output,
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortDirection::Input => write!(f, "input"),
            PortDirection::Output => write!(f, "output"),
        }
    }
}

/// A logical router endpoint. Output ports own the sink they deliver to.
pub struct MidiPort {
    id: String,
    name: String,
    direction: PortDirection,
    connected: bool,
    last_activity: f64,
    message_count: u64,
    error_count: u64,
    sink: Option<Box<dyn MidiSink>>,
}

/// Serializable view of a [`MidiPort`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortInfo {
    pub port_id: String,
    pub name: String,
    pub direction: PortDirection,
    pub is_connected: bool,
    pub last_activity: f64,
    pub message_count: u64,
    pub error_count: u64,
}

impl MidiPort {
    pub fn input(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(id.into(), name.into(), PortDirection::Input, None)
    }

    pub fn output(id: impl Into<String>, name: impl Into<String>, sink: Box<dyn MidiSink>) -> Self {
        Self::new(id.into(), name.into(), PortDirection::Output, Some(sink))
    }

    fn new(id: String, name: String, direction: PortDirection, sink: Option<Box<dyn MidiSink>>) -> Self {
        Self {
            id,
            name,
            direction,
            connected: true,
            last_activity: 0.0,
            message_count: 0,
            error_count: 0,
            sink,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> PortDirection {
        self.direction
    }

    pub fn is_input(&self) -> bool {
        self.direction == PortDirection::Input
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    /// Delivers `message` through the sink, counting the outcome.
    pub fn send(&mut self, message: &MidiMessage) -> Result<()> {
        let result = match (&mut self.sink, self.connected) {
            (Some(sink), true) => sink.send(&message.encode()),
            (None, _) => Err(Error::PortDirection {
                port: self.id.clone(),
                expected: PortDirection::Output,
            }),
            (Some(_), false) => Err(Error::Send {
                port: self.id.clone(),
                reason: "port is disconnected".to_string(),
            }),
        };

        match result {
            Ok(()) => {
                self.message_count += 1;
                self.last_activity = crate::timing::unix_seconds();
                trace!("MIDI OUT [{}]: {:?}", self.name, message);
                Ok(())
            }
            Err(e) => {
                self.error_count += 1;
                Err(e)
            }
        }
    }

    pub fn info(&self) -> PortInfo {
        PortInfo {
            port_id: self.id.clone(),
            name: self.name.clone(),
            direction: self.direction,
            is_connected: self.connected,
            last_activity: self.last_activity,
            message_count: self.message_count,
            error_count: self.error_count,
        }
    }
}
