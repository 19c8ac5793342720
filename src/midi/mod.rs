//! MIDI functionality for the conductor
//!
//! This module provides:
//! - [`MidiMessage`] and [`MessageKind`]: validated messages and their byte encoding
//! - [`MidiBackend`] / [`MidiSink`]: the output capability, with [`SimulatedBackend`]
//!   as the logging-only implementation
//! - [`ClockGenerator`]: 24 ppqn clock, transport and heartbeat fan-out
//!
mod clock;
mod device;
mod message;

pub use clock::{pulse_interval, ClockGenerator, ClockStatus};
pub use device::{DeviceInfo, MidiBackend, MidiDevice, MidiSink, SimulatedBackend};
pub use message::{hex, MessageKind, MidiMessage};
