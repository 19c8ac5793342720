use crate::error::{Error, Result};
use crate::midi::MidiMessage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Rewrites messages passing through a connection.
///
/// Channel remapping applies to channel messages whose channel is in the
/// table. Transposition and the velocity curve apply to note-on/off only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiTransform {
    pub name: String,
    pub enabled: bool,
    pub channel_map: Option<BTreeMap<u8, u8>>,
    /// Semitones added to the note number, result clamped to 0-127.
    pub transpose: i32,
    /// 128 output velocities indexed by input velocity.
    pub velocity_curve: Option<Vec<u8>>,
}

impl Default for MidiTransform {
    fn default() -> Self {
        Self::new("transform")
    }
}

impl MidiTransform {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            channel_map: None,
            transpose: 0,
            velocity_curve: None,
        }
    }

    pub fn with_channel_map(mut self, map: impl IntoIterator<Item = (u8, u8)>) -> Result<Self> {
        self.channel_map = Some(map.into_iter().collect());
        self.validate()?;
        Ok(self)
    }

    pub fn with_transpose(mut self, semitones: i32) -> Self {
        self.transpose = semitones;
        self
    }

    pub fn with_velocity_curve(mut self, curve: Vec<u8>) -> Result<Self> {
        self.velocity_curve = Some(curve);
        self.validate()?;
        Ok(self)
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Checks the channel map targets and the velocity curve shape.
    pub fn validate(&self) -> Result<()> {
        if let Some(map) = &self.channel_map {
            if let Some((&from, &to)) = map.iter().find(|(from, to)| **from > 15 || **to > 15) {
                return Err(Error::InvalidChannelMap { from, to });
            }
        }
        if let Some(curve) = &self.velocity_curve {
            if curve.len() != 128 || curve.iter().any(|&v| v > 127) {
                return Err(Error::InvalidVelocityCurve(curve.len()));
            }
        }
        Ok(())
    }

    pub fn apply(&self, message: &MidiMessage) -> MidiMessage {
        if !self.enabled {
            return message.clone();
        }

        let channel = message.channel().map(|channel| {
            self.channel_map
                .as_ref()
                .and_then(|map| map.get(&channel).copied())
                .unwrap_or(channel)
        });

        let (mut data1, mut data2) = (message.data1(), message.data2());
        if message.kind().is_note() {
            data1 = (data1 as i32 + self.transpose).clamp(0, 127) as u8;
            if let Some(curve) = &self.velocity_curve {
                if let Some(&velocity) = curve.get(data2 as usize) {
                    data2 = velocity;
                }
            }
        }

        message.derive(channel, data1, data2)
    }
}
