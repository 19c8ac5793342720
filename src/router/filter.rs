use crate::midi::{MessageKind, MidiMessage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Pass/reject predicate attached to a connection.
///
/// Each dimension left as `None` passes everything. Velocity and note ranges
/// are inclusive and only constrain note-on/off messages; the channel set
/// only constrains channel messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiFilter {
    pub name: String,
    pub enabled: bool,
    pub channels: Option<BTreeSet<u8>>,
    pub kinds: Option<BTreeSet<MessageKind>>,
    pub velocity_range: Option<(u8, u8)>,
    pub note_range: Option<(u8, u8)>,
}

impl Default for MidiFilter {
    fn default() -> Self {
        Self::new("filter")
    }
}

impl MidiFilter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            channels: None,
            kinds: None,
            velocity_range: None,
            note_range: None,
        }
    }

    pub fn with_channels(mut self, channels: impl IntoIterator<Item = u8>) -> Self {
        self.channels = Some(channels.into_iter().collect());
        self
    }

    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = MessageKind>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    pub fn with_velocity_range(mut self, min: u8, max: u8) -> Self {
        self.velocity_range = Some((min, max));
        self
    }

    pub fn with_note_range(mut self, min: u8, max: u8) -> Self {
        self.note_range = Some((min, max));
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn passes(&self, message: &MidiMessage) -> bool {
        if !self.enabled {
            return true;
        }

        if let (Some(channels), Some(channel)) = (&self.channels, message.channel()) {
            if !channels.contains(&channel) {
                return false;
            }
        }

        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&message.kind()) {
                return false;
            }
        }

        if let (Some((min, max)), Some(velocity)) = (self.velocity_range, message.velocity()) {
            if !(min..=max).contains(&velocity) {
                return false;
            }
        }

        if let (Some((min, max)), Some(note)) = (self.note_range, message.note()) {
            if !(min..=max).contains(&note) {
                return false;
            }
        }

        true
    }
}
