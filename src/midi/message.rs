use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Status-byte kinds understood by the router and the clock generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[non_exhaustive]
pub enum MessageKind {
    NoteOff,
    NoteOn,
    PolyAftertouch,
    ControlChange,
    ProgramChange,
    ChannelAftertouch,
    PitchBend,
    SystemExclusive,
    TimingClock,
    Start,
    Continue,
    Stop,
    ActiveSensing,
    SystemReset,
}

impl MessageKind {
    /// Status byte, with the channel nibble cleared for channel kinds.
    pub const fn status(self) -> u8 {
        match self {
            MessageKind::NoteOff => 0x80,
            MessageKind::NoteOn => 0x90,
            MessageKind::PolyAftertouch => 0xA0,
            MessageKind::ControlChange => 0xB0,
            MessageKind::ProgramChange => 0xC0,
            MessageKind::ChannelAftertouch => 0xD0,
            MessageKind::PitchBend => 0xE0,
            MessageKind::SystemExclusive => 0xF0,
            MessageKind::TimingClock => 0xF8,
            MessageKind::Start => 0xFA,
            MessageKind::Continue => 0xFB,
            MessageKind::Stop => 0xFC,
            MessageKind::ActiveSensing => 0xFE,
            MessageKind::SystemReset => 0xFF,
        }
    }

    pub fn from_status(status: u8) -> Option<Self> {
        let kind = match status {
            0xF0 => MessageKind::SystemExclusive,
            0xF8 => MessageKind::TimingClock,
            0xFA => MessageKind::Start,
            0xFB => MessageKind::Continue,
            0xFC => MessageKind::Stop,
            0xFE => MessageKind::ActiveSensing,
            0xFF => MessageKind::SystemReset,
            _ => match status & 0xF0 {
                0x80 => MessageKind::NoteOff,
                0x90 => MessageKind::NoteOn,
                0xA0 => MessageKind::PolyAftertouch,
                0xB0 => MessageKind::ControlChange,
                0xC0 => MessageKind::ProgramChange,
                0xD0 => MessageKind::ChannelAftertouch,
                0xE0 => MessageKind::PitchBend,
                _ => return None,
            },
        };
        Some(kind)
    }

    pub const fn is_channel(self) -> bool {
        self.status() < 0xF0
    }

    pub const fn is_note(self) -> bool {
        matches!(self, MessageKind::NoteOn | MessageKind::NoteOff)
    }

    /// Number of data bytes following the status byte on the wire.
    pub const fn data_len(self) -> usize {
        match self {
            MessageKind::ProgramChange | MessageKind::ChannelAftertouch => 1,
            kind if kind.is_channel() => 2,
            _ => 0,
        }
    }
}

/// A single MIDI message.
///
/// Messages are immutable; the router's transforms build new instances. A
/// message decoded from bytes keeps its raw form, which [`MidiMessage::encode`]
/// returns verbatim; derived messages never carry one. Deserialization goes
/// through the same validation as the constructors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MessageRecord")]
pub struct MidiMessage {
    timestamp: f64,
    #[serde(rename = "type")]
    kind: MessageKind,
    channel: Option<u8>,
    data1: u8,
    data2: u8,
    #[serde(skip)]
    raw: Option<Vec<u8>>,
}

/// Unvalidated wire shape of a serialized [`MidiMessage`].
#[derive(Deserialize)]
struct MessageRecord {
    #[serde(default)]
    timestamp: f64,
    #[serde(rename = "type")]
    kind: MessageKind,
    #[serde(default)]
    channel: Option<u8>,
    #[serde(default)]
    data1: u8,
    #[serde(default)]
    data2: u8,
}

impl TryFrom<MessageRecord> for MidiMessage {
    type Error = Error;

    fn try_from(record: MessageRecord) -> Result<Self> {
        let message = match (record.kind.is_channel(), record.channel) {
            (true, Some(channel)) => {
                Self::channel_message(record.kind, channel, record.data1, record.data2)?
            }
            (true, None) => return Err(Error::MissingChannel(record.kind)),
            (false, None) => Self::system(record.kind)?,
            (false, Some(_)) => return Err(Error::KindMismatch(record.kind)),
        };
        Ok(message.with_timestamp(record.timestamp))
    }
}

fn check_channel(channel: u8) -> Result<u8> {
    if channel > 0x0F {
        Err(Error::InvalidChannel(channel))
    } else {
        Ok(channel)
    }
}

fn check_data(byte: u8) -> Result<u8> {
    if byte > 0x7F {
        Err(Error::InvalidDataByte(byte))
    } else {
        Ok(byte)
    }
}

impl MidiMessage {
    /// Builds a channel message. For one-data-byte kinds `data2` is ignored
    /// on the wire.
    pub fn channel_message(kind: MessageKind, channel: u8, data1: u8, data2: u8) -> Result<Self> {
        if !kind.is_channel() {
            return Err(Error::KindMismatch(kind));
        }
        Ok(Self {
            timestamp: crate::timing::unix_seconds(),
            kind,
            channel: Some(check_channel(channel)?),
            data1: check_data(data1)?,
            data2: check_data(data2)?,
            raw: None,
        })
    }

    /// Builds a channel-less system message.
    pub fn system(kind: MessageKind) -> Result<Self> {
        if kind.is_channel() {
            return Err(Error::KindMismatch(kind));
        }
        Ok(Self::realtime(kind))
    }

    fn realtime(kind: MessageKind) -> Self {
        Self {
            timestamp: crate::timing::unix_seconds(),
            kind,
            channel: None,
            data1: 0,
            data2: 0,
            raw: None,
        }
    }

    pub fn note_on(channel: u8, note: u8, velocity: u8) -> Result<Self> {
        Self::channel_message(MessageKind::NoteOn, channel, note, velocity)
    }

    pub fn note_off(channel: u8, note: u8, velocity: u8) -> Result<Self> {
        Self::channel_message(MessageKind::NoteOff, channel, note, velocity)
    }

    pub fn control_change(channel: u8, controller: u8, value: u8) -> Result<Self> {
        Self::channel_message(MessageKind::ControlChange, channel, controller, value)
    }

    pub fn program_change(channel: u8, program: u8) -> Result<Self> {
        Self::channel_message(MessageKind::ProgramChange, channel, program, 0)
    }

    pub fn clock() -> Self {
        Self::realtime(MessageKind::TimingClock)
    }

    pub fn start() -> Self {
        Self::realtime(MessageKind::Start)
    }

    pub fn stop() -> Self {
        Self::realtime(MessageKind::Stop)
    }

    pub fn active_sensing() -> Self {
        Self::realtime(MessageKind::ActiveSensing)
    }

    /// Decodes one complete message. Extra trailing bytes (SysEx payloads)
    /// are kept in the raw form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let status = *bytes.first().ok_or(Error::EmptyMessage)?;
        let kind = MessageKind::from_status(status).ok_or(Error::UnknownStatus(status))?;

        let expected = 1 + kind.data_len();
        if bytes.len() < expected {
            return Err(Error::Truncated {
                kind,
                expected,
                actual: bytes.len(),
            });
        }

        let data1 = if kind.data_len() >= 1 { check_data(bytes[1])? } else { 0 };
        let data2 = if kind.data_len() >= 2 { check_data(bytes[2])? } else { 0 };

        Ok(Self {
            timestamp: crate::timing::unix_seconds(),
            kind,
            channel: kind.is_channel().then_some(status & 0x0F),
            data1,
            data2,
            raw: Some(bytes.to_vec()),
        })
    }

    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// A copy with new channel and data bytes and no raw form.
    pub(crate) fn derive(&self, channel: Option<u8>, data1: u8, data2: u8) -> Self {
        Self {
            timestamp: self.timestamp,
            kind: self.kind,
            channel,
            data1,
            data2,
            raw: None,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        if let Some(raw) = &self.raw {
            return raw.clone();
        }

        match self.channel {
            Some(channel) if self.kind.is_channel() => {
                let status = self.kind.status() | (channel & 0x0F);
                match self.kind.data_len() {
                    1 => vec![status, self.data1],
                    _ => vec![status, self.data1, self.data2],
                }
            }
            _ => vec![self.kind.status()],
        }
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn channel(&self) -> Option<u8> {
        self.channel
    }

    pub fn data1(&self) -> u8 {
        self.data1
    }

    pub fn data2(&self) -> u8 {
        self.data2
    }

    /// Note number for note-on/off messages.
    pub fn note(&self) -> Option<u8> {
        self.kind.is_note().then_some(self.data1)
    }

    /// Velocity for note-on/off messages.
    pub fn velocity(&self) -> Option<u8> {
        self.kind.is_note().then_some(self.data2)
    }
}

/// Lower-case hex rendering used in trace output.
pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_on_encoding() {
        let msg = MidiMessage::note_on(1, 60, 100).unwrap();
        assert_eq!(msg.encode(), vec![0x91, 0x3C, 0x64]);

        let msg = MidiMessage::note_on(1, 0x60, 0x64).unwrap();
        assert_eq!(msg.encode(), vec![0x91, 0x60, 0x64]);
    }

    #[test]
    fn test_system_message_encoding() {
        assert_eq!(MidiMessage::start().encode(), vec![0xFA]);
        assert_eq!(MidiMessage::stop().encode(), vec![0xFC]);
        assert_eq!(MidiMessage::clock().encode(), vec![0xF8]);
        assert_eq!(MidiMessage::active_sensing().encode(), vec![0xFE]);
        assert_eq!(
            MidiMessage::system(MessageKind::SystemReset).unwrap().encode(),
            vec![0xFF]
        );
    }

    #[test]
    fn test_single_data_byte_kinds() {
        let msg = MidiMessage::program_change(15, 42).unwrap();
        assert_eq!(msg.encode(), vec![0xCF, 42]);

        let msg = MidiMessage::channel_message(MessageKind::ChannelAftertouch, 2, 80, 99).unwrap();
        assert_eq!(msg.encode(), vec![0xD2, 80]);

        let msg = MidiMessage::channel_message(MessageKind::PitchBend, 0, 0, 64).unwrap();
        assert_eq!(msg.encode(), vec![0xE0, 0, 64]);
    }

    #[test]
    fn test_constructor_validation() {
        assert!(matches!(
            MidiMessage::note_on(16, 60, 100),
            Err(Error::InvalidChannel(16))
        ));
        assert!(matches!(
            MidiMessage::note_on(0, 128, 100),
            Err(Error::InvalidDataByte(128))
        ));
        assert!(matches!(
            MidiMessage::system(MessageKind::NoteOn),
            Err(Error::KindMismatch(MessageKind::NoteOn))
        ));
        assert!(matches!(
            MidiMessage::channel_message(MessageKind::Start, 0, 0, 0),
            Err(Error::KindMismatch(MessageKind::Start))
        ));
    }

    #[test]
    fn test_parse_channel_and_system_messages() {
        let msg = MidiMessage::from_bytes(&[0x93, 64, 90]).unwrap();
        assert_eq!(msg.kind(), MessageKind::NoteOn);
        assert_eq!(msg.channel(), Some(3));
        assert_eq!(msg.note(), Some(64));
        assert_eq!(msg.velocity(), Some(90));

        let msg = MidiMessage::from_bytes(&[0xF8]).unwrap();
        assert_eq!(msg.kind(), MessageKind::TimingClock);
        assert_eq!(msg.channel(), None);
        assert_eq!(msg.note(), None);

        let msg = MidiMessage::from_bytes(&[0xC0, 5]).unwrap();
        assert_eq!(msg.kind(), MessageKind::ProgramChange);
        assert_eq!(msg.data1(), 5);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(MidiMessage::from_bytes(&[]), Err(Error::EmptyMessage)));
        assert!(matches!(
            MidiMessage::from_bytes(&[0xF4]),
            Err(Error::UnknownStatus(0xF4))
        ));
        assert!(matches!(
            MidiMessage::from_bytes(&[0x90, 60]),
            Err(Error::Truncated {
                expected: 3,
                actual: 2,
                ..
            })
        ));
        assert!(matches!(
            MidiMessage::from_bytes(&[0x90, 60, 200]),
            Err(Error::InvalidDataByte(200))
        ));
    }

    #[test]
    fn test_raw_form_is_preserved_until_derived() {
        let sysex = [0xF0, 0x7E, 0x00, 0x09, 0x01, 0xF7];
        let msg = MidiMessage::from_bytes(&sysex).unwrap();
        assert_eq!(msg.encode(), sysex.to_vec());

        let note = MidiMessage::from_bytes(&[0x90, 60, 100]).unwrap();
        let derived = note.derive(Some(4), 72, 100);
        assert_eq!(derived.encode(), vec![0x94, 72, 100]);
    }

    #[test]
    fn test_serializes_for_status_output() {
        let msg = MidiMessage::control_change(0, 7, 100)
            .unwrap()
            .with_timestamp(12.5);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "ControlChange");
        assert_eq!(json["channel"], 0);
        assert_eq!(json["data1"], 7);
        assert_eq!(json["data2"], 100);
        assert_eq!(json["timestamp"], 12.5);

        let back: MidiMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_deserialization_is_validated() {
        let bad_channel = r#"{"type":"NoteOn","channel":200,"data1":60,"data2":100,"timestamp":0.0}"#;
        assert!(serde_json::from_str::<MidiMessage>(bad_channel).is_err());

        let bad_data = r#"{"type":"NoteOn","channel":1,"data1":255,"data2":100,"timestamp":0.0}"#;
        assert!(serde_json::from_str::<MidiMessage>(bad_data).is_err());

        let no_channel = r#"{"type":"NoteOn","channel":null,"data1":60,"data2":100,"timestamp":0.0}"#;
        assert!(serde_json::from_str::<MidiMessage>(no_channel).is_err());

        let clock_on_channel = r#"{"type":"TimingClock","channel":3,"timestamp":0.0}"#;
        assert!(serde_json::from_str::<MidiMessage>(clock_on_channel).is_err());

        let start: MidiMessage = serde_json::from_str(r#"{"type":"Start","channel":null}"#).unwrap();
        assert_eq!(start.encode(), vec![0xFA]);
    }
}
