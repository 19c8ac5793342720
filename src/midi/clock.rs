//! MIDI clock generation.
//!
//! Derives a 24 ppqn clock from the current tempo and fans it out to every
//! registered output device, together with Start/Stop transport messages and
//! an Active Sensing heartbeat while stopped.
//!
//! Pulse due times are computed from an anchor instant and the current pulse
//! interval (`anchor + n * interval`). A tempo change re-anchors at the last
//! pulse, so neither tempo changes nor late wake-ups accumulate drift.
//!
//! A wake-up more than four pulses late drops the remaining overdue pulses
//! and restarts the schedule at the wake-up time. Downstream devices then
//! lag the timing engine's beat grid by the dropped pulses until the next
//! Start; the count is reported as `dropped_pulses`.

use super::device::{DeviceInfo, MidiBackend, MidiDevice};
use super::message::{hex, MidiMessage};
use crate::config::{ClockSettings, PULSES_PER_QUARTER_NOTE};
use crate::error::{Error, Result};
use log::{debug, info, trace, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Pulses emitted in a single poll before the schedule is re-anchored.
const MAX_CATCH_UP_PULSES: u64 = 4;

/// Seconds between clock pulses at `bpm`.
pub fn pulse_interval(bpm: f64) -> f64 {
    60.0 / (PULSES_PER_QUARTER_NOTE as f64 * bpm)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClockStatus {
    pub is_running: bool,
    pub is_playing: bool,
    pub bpm: f64,
    pub clock_interval: f64,
    pub pulse_count: u64,
    pub dropped_pulses: u64,
    pub device_count: usize,
    pub connected_devices: usize,
    pub send_errors: u64,
}

struct ClockState {
    devices: Vec<MidiDevice>,
    playing: bool,
    bpm: f64,
    interval: f64,
    pulse_count: u64,
    dropped_pulses: u64,
    anchor: Instant,
    anchor_pulse: u64,
    last_heartbeat: Instant,
    send_errors: u64,
}

impl ClockState {
    fn next_pulse_due(&self) -> Instant {
        let pulses = (self.pulse_count - self.anchor_pulse + 1) as f64;
        self.anchor + Duration::from_secs_f64(self.interval * pulses)
    }

    fn last_pulse_time(&self) -> Instant {
        let pulses = (self.pulse_count - self.anchor_pulse) as f64;
        self.anchor + Duration::from_secs_f64(self.interval * pulses)
    }

    /// Sends `message` to every connected device. Failures are logged and
    /// counted per device.
    fn broadcast(&mut self, message: &MidiMessage) {
        let bytes = message.encode();
        let mut failures = 0;
        for device in self.devices.iter_mut().filter(|d| d.is_connected()) {
            match device.send(&bytes) {
                Ok(()) => trace!("Clock -> {}: {}", device.name(), hex(&bytes)),
                Err(e) => {
                    failures += 1;
                    warn!("Failed to send {:?} to {}: {}", message.kind(), device.name(), e);
                }
            }
        }
        self.send_errors += failures;
    }
}

struct ClockShared {
    state: Mutex<ClockState>,
    backend: Arc<dyn MidiBackend>,
    running: AtomicBool,
    tick_interval: Duration,
    heartbeat_interval: Duration,
}

impl ClockShared {
    fn lock(&self) -> MutexGuard<'_, ClockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn poll(&self, now: Instant) {
        let mut state = self.lock();

        if state.playing {
            let mut sent = 0;
            while state.next_pulse_due() <= now && sent < MAX_CATCH_UP_PULSES {
                state.broadcast(&MidiMessage::clock());
                state.pulse_count += 1;
                sent += 1;
            }
            if state.next_pulse_due() <= now {
                let behind = now.saturating_duration_since(state.last_pulse_time());
                let dropped = (behind.as_secs_f64() / state.interval).floor() as u64;
                state.dropped_pulses += dropped;
                warn!(
                    "MIDI clock fell behind at pulse {}, dropped {} pulse(s) and re-anchored",
                    state.pulse_count, dropped
                );
                state.anchor = now;
                state.anchor_pulse = state.pulse_count;
            }
        } else if now.saturating_duration_since(state.last_heartbeat) >= self.heartbeat_interval {
            state.broadcast(&MidiMessage::active_sensing());
            state.last_heartbeat = now;
        }
    }
}

/// Generates MIDI clock, transport and heartbeat messages.
pub struct ClockGenerator {
    shared: Arc<ClockShared>,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
}

impl ClockGenerator {
    pub fn new(settings: &ClockSettings, backend: Arc<dyn MidiBackend>) -> Self {
        let now = Instant::now();
        let bpm = crate::config::DEFAULT_BPM;
        info!("Creating MIDI clock generator using {} backend", backend.name());

        Self {
            shared: Arc::new(ClockShared {
                state: Mutex::new(ClockState {
                    devices: Vec::new(),
                    playing: false,
                    bpm,
                    interval: pulse_interval(bpm),
                    pulse_count: 0,
                    dropped_pulses: 0,
                    anchor: now,
                    anchor_pulse: 0,
                    last_heartbeat: now,
                    send_errors: 0,
                }),
                backend,
                running: AtomicBool::new(false),
                tick_interval: Duration::from_micros(settings.tick_interval_us.max(1)),
                heartbeat_interval: Duration::from_millis(settings.heartbeat_ms),
            }),
            thread_handle: Mutex::new(None),
        }
    }

    /// Opens an output for `port_id` through the backend and registers it.
    pub fn add_device(&self, name: &str, port_id: &str) -> Result<()> {
        let mut state = self.shared.lock();
        if state.devices.iter().any(|d| d.port_id() == port_id) {
            return Err(Error::DeviceExists(port_id.to_string()));
        }

        let sink = self.shared.backend.open_output(port_id, name)?;
        state.devices.push(MidiDevice::new(name, port_id, sink));
        info!("Added MIDI device: {} ({})", name, port_id);
        Ok(())
    }

    pub fn remove_device(&self, port_id: &str) -> Result<()> {
        let mut state = self.shared.lock();
        let index = state
            .devices
            .iter()
            .position(|d| d.port_id() == port_id)
            .ok_or_else(|| Error::DeviceNotFound(port_id.to_string()))?;
        let device = state.devices.remove(index);
        info!("Removed MIDI device: {}", device.name());
        Ok(())
    }

    pub fn set_device_connected(&self, port_id: &str, connected: bool) -> Result<()> {
        let mut state = self.shared.lock();
        let device = state
            .devices
            .iter_mut()
            .find(|d| d.port_id() == port_id)
            .ok_or_else(|| Error::DeviceNotFound(port_id.to_string()))?;
        device.set_connected(connected);
        Ok(())
    }

    pub fn devices(&self) -> Vec<DeviceInfo> {
        self.shared.lock().devices.iter().map(MidiDevice::info).collect()
    }

    /// Changes the tempo. The pulse already scheduled keeps its position; every
    /// later pulse uses the new interval.
    pub fn set_bpm(&self, bpm: f64) -> Result<()> {
        crate::timing::validate_tempo(bpm)?;

        let mut state = self.shared.lock();
        let last_pulse = state.last_pulse_time();
        state.anchor = last_pulse;
        state.anchor_pulse = state.pulse_count;
        state.bpm = bpm;
        state.interval = pulse_interval(bpm);
        debug!(
            "MIDI clock BPM set to {}, interval: {:.4}s",
            bpm, state.interval
        );
        Ok(())
    }

    pub fn start_playback(&self) {
        self.start_playback_at(Instant::now());
    }

    /// Emits Start and restarts the pulse train at `now`. No-op while playing.
    pub fn start_playback_at(&self, now: Instant) {
        let mut state = self.shared.lock();
        if state.playing {
            return;
        }

        state.playing = true;
        state.pulse_count = 0;
        state.dropped_pulses = 0;
        state.anchor = now;
        state.anchor_pulse = 0;
        state.broadcast(&MidiMessage::start());
        info!("MIDI playback started at {} BPM", state.bpm);
    }

    pub fn stop_playback(&self) {
        self.stop_playback_at(Instant::now());
    }

    /// Emits Stop. The heartbeat cadence restarts from `now`.
    pub fn stop_playback_at(&self, now: Instant) {
        let mut state = self.shared.lock();
        if !state.playing {
            return;
        }

        state.playing = false;
        state.last_heartbeat = now;
        state.broadcast(&MidiMessage::stop());
        info!("MIDI playback stopped after {} pulses", state.pulse_count);
    }

    /// Runs one scheduling step as of `now`: sends due clock pulses while
    /// playing, or the heartbeat while stopped.
    pub fn poll(&self, now: Instant) {
        self.shared.poll(now);
    }

    pub fn start(&self) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            warn!("MIDI clock generator already running");
            return;
        }

        let shared = Arc::clone(&self.shared);
        let handle = thread::spawn(move || {
            info!("MIDI clock generator thread started");
            while shared.running.load(Ordering::SeqCst) {
                shared.poll(Instant::now());
                thread::sleep(shared.tick_interval);
            }
            info!("MIDI clock generator thread stopped");
        });

        *self
            .thread_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        info!("MIDI clock generator started");
    }

    /// Stops playback, then stops and joins the generator thread.
    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }

        self.stop_playback();

        let handle = self
            .thread_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("MIDI clock generator thread panicked");
            }
        }
        info!("MIDI clock generator stopped");
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> ClockStatus {
        let state = self.shared.lock();
        ClockStatus {
            is_running: self.is_running(),
            is_playing: state.playing,
            bpm: state.bpm,
            clock_interval: state.interval,
            pulse_count: state.pulse_count,
            dropped_pulses: state.dropped_pulses,
            device_count: state.devices.len(),
            connected_devices: state.devices.iter().filter(|d| d.is_connected()).count(),
            send_errors: state.send_errors,
        }
    }
}

impl Drop for ClockGenerator {
    fn drop(&mut self) {
        self.stop();
    }
}
