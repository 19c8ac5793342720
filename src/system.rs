//! System controller
//!
//! [`Conductor`] is built once at startup and handed to whatever drives it
//! (the console, a control panel). It keeps the timing engine and the MIDI
//! clock in step and exposes the combined status.

use crate::config::Settings;
use crate::error::Result;
use crate::midi::{ClockGenerator, ClockStatus, DeviceInfo, MidiBackend};
use crate::registry::{CallbackResult, Registry, SubscriptionId};
use crate::router::{MidiConnection, MidiRouter, PortInfo, RouterStatistics};
use crate::timing::{unix_seconds, TimingEngine, TimingState};
use log::{info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Transport and tempo events announced to listeners.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SystemEvent {
    PlayStart,
    PlayStop,
    BpmChange { old: f64, new: f64 },
}

pub type EventListener = dyn Fn(&SystemEvent) -> CallbackResult + Send + Sync;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemStatus {
    pub uptime: f64,
    pub is_playing: bool,
    pub bpm: f64,
    pub beat_position: f64,
    pub timing_accuracy: f64,
    pub connected_peers: u32,
    pub midi_devices: usize,
    pub connected_devices: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetailedStatus {
    pub system: SystemStatus,
    pub timing: TimingState,
    pub midi: ClockStatus,
    pub devices: Vec<DeviceInfo>,
    pub router: RouterStatistics,
    pub ports: Vec<PortInfo>,
    pub connections: Vec<MidiConnection>,
    pub timestamp: f64,
}

pub struct Conductor {
    timing: Arc<TimingEngine>,
    clock: Arc<ClockGenerator>,
    router: Arc<MidiRouter>,
    events: Registry<EventListener>,
    started_at: Instant,
}

impl Conductor {
    /// Builds the three units from `settings`, registering the configured
    /// devices, ports and connections. Nothing runs until [`Conductor::start`].
    pub fn new(settings: &Settings, backend: Arc<dyn MidiBackend>) -> Result<Self> {
        settings.validate()?;

        let timing = Arc::new(TimingEngine::new(settings.timing.clone())?);
        let clock = Arc::new(ClockGenerator::new(&settings.clock, Arc::clone(&backend)));
        clock.set_bpm(settings.timing.bpm)?;
        let router = Arc::new(MidiRouter::new(&settings.router, backend));

        for device in &settings.devices {
            clock.add_device(&device.name, &device.port_id)?;
        }
        for port in &settings.ports {
            router.add_port(&port.id, &port.name, port.direction)?;
        }
        for conn in &settings.connections {
            router.add_connection(&conn.input, &conn.output)?;
            for filter in &conn.filters {
                router.add_filter(&conn.input, &conn.output, filter.clone())?;
            }
            for transform in &conn.transforms {
                router.add_transform(&conn.input, &conn.output, transform.clone())?;
            }
            if !conn.enabled {
                router.set_connection_enabled(&conn.input, &conn.output, false)?;
            }
        }

        Ok(Self {
            timing,
            clock,
            router,
            events: Registry::new("event listener"),
            started_at: Instant::now(),
        })
    }

    pub fn timing(&self) -> &Arc<TimingEngine> {
        &self.timing
    }

    pub fn clock(&self) -> &Arc<ClockGenerator> {
        &self.clock
    }

    pub fn router(&self) -> &Arc<MidiRouter> {
        &self.router
    }

    pub fn start(&self) {
        info!("Starting conductor");
        self.timing.start();
        self.clock.start();
        self.router.start();
    }

    /// Stops playback, then every background task.
    pub fn stop(&self) {
        info!("Stopping conductor");
        self.stop_playback();
        self.router.stop();
        self.clock.stop();
        self.timing.stop();
    }

    pub fn is_playing(&self) -> bool {
        self.timing.is_playing()
    }

    pub fn start_playback(&self) {
        if self.timing.is_playing() {
            return;
        }
        self.timing.start_playback();
        self.clock.start_playback();
        self.fire(SystemEvent::PlayStart);
    }

    pub fn stop_playback(&self) {
        if !self.timing.is_playing() {
            return;
        }
        self.timing.stop_playback();
        self.clock.stop_playback();
        self.fire(SystemEvent::PlayStop);
    }

    /// Sets the tempo on the engine and the clock. A rejected tempo changes
    /// neither.
    pub fn set_bpm(&self, bpm: f64) -> Result<()> {
        let old = self.timing.tempo();
        self.timing.set_tempo(bpm)?;
        if let Err(e) = self.clock.set_bpm(bpm) {
            warn!("Clock rejected BPM {}: {}", bpm, e);
            return Err(e);
        }
        self.fire(SystemEvent::BpmChange { old, new: bpm });
        info!("BPM changed from {} to {}", old, bpm);
        Ok(())
    }

    pub fn set_quantum(&self, quantum: u32) -> Result<()> {
        self.timing.set_quantum(quantum)
    }

    pub fn add_event_listener(
        &self,
        name: impl Into<String>,
        listener: Arc<EventListener>,
    ) -> SubscriptionId {
        self.events.register(name, listener)
    }

    pub fn remove_event_listener(&self, id: SubscriptionId) -> bool {
        self.events.unregister(id)
    }

    fn fire(&self, event: SystemEvent) {
        if self.events.is_empty() {
            return;
        }
        self.events.dispatch(|listener| listener(&event));
    }

    pub fn status(&self) -> SystemStatus {
        let timing = self.timing.state();
        let clock = self.clock.status();
        SystemStatus {
            uptime: self.started_at.elapsed().as_secs_f64(),
            is_playing: timing.is_playing,
            bpm: timing.bpm,
            beat_position: timing.beat_position,
            timing_accuracy: timing.timing_accuracy,
            connected_peers: timing.connected_peers,
            midi_devices: clock.device_count,
            connected_devices: clock.connected_devices,
        }
    }

    pub fn detailed_status(&self) -> DetailedStatus {
        DetailedStatus {
            system: self.status(),
            timing: self.timing.state(),
            midi: self.clock.status(),
            devices: self.clock.devices(),
            router: self.router.statistics(),
            ports: self.router.ports(),
            connections: self.router.connections(),
            timestamp: unix_seconds(),
        }
    }

    pub fn status_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.detailed_status())?)
    }
}

impl Drop for Conductor {
    fn drop(&mut self) {
        self.stop();
    }
}
