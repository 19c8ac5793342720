//! Timing engine
//!
//! Owns the master transport state (tempo, playing flag, beat position) and
//! runs the high-frequency update loop that:
//! - recomputes the beat position and timing accuracy while playing
//! - broadcasts the network beacon at its own cadence
//! - hands a full state snapshot to every registered subscriber
//!
//! Tempo changes apply to the next beat-position computation; the phase is
//! not corrected retroactively.

pub mod beacon;

use crate::config::{TimingSettings, MAX_BPM, MIN_BPM};
use crate::error::{Error, Result};
use crate::registry::{CallbackResult, Registry, SubscriptionId};
use beacon::Beacon;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Wall-clock seconds since the Unix epoch, for status output and packets.
pub fn unix_seconds() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Accepts finite tempos within [`MIN_BPM`, `MAX_BPM`].
pub fn validate_tempo(bpm: f64) -> Result<f64> {
    if bpm.is_finite() && (MIN_BPM..=MAX_BPM).contains(&bpm) {
        Ok(bpm)
    } else {
        Err(Error::TempoOutOfRange(bpm))
    }
}

/// Beats elapsed after `elapsed` at a constant `bpm`.
pub fn beat_position(elapsed: Duration, bpm: f64) -> f64 {
    elapsed.as_secs_f64() * bpm / 60.0
}

/// Distance in milliseconds between `elapsed` and the ideal time of the last
/// whole beat.
pub fn timing_accuracy_ms(elapsed: Duration, beat_position: f64, bpm: f64) -> f64 {
    let expected = beat_position.floor() * 60.0 / bpm;
    (elapsed.as_secs_f64() - expected).abs() * 1000.0
}

/// Snapshot of the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingState {
    pub bpm: f64,
    pub is_playing: bool,
    pub beat_position: f64,
    pub quantum: u32,
    /// Wall-clock time playback last started, in Unix seconds.
    pub start_time: f64,
    pub timing_accuracy: f64,
    /// Always zero: inbound peer beacons are never consumed.
    pub connected_peers: u32,
}

impl Default for TimingState {
    fn default() -> Self {
        Self {
            bpm: crate::config::DEFAULT_BPM,
            is_playing: false,
            beat_position: 0.0,
            quantum: crate::config::DEFAULT_QUANTUM,
            start_time: 0.0,
            timing_accuracy: 0.0,
            connected_peers: 0,
        }
    }
}

/// Callback receiving a state snapshot on every update cycle.
pub type StateSubscriber = dyn Fn(&TimingState) -> CallbackResult + Send + Sync;

struct EngineState {
    timing: TimingState,
    started_at: Option<Instant>,
}

struct EngineShared {
    state: Mutex<EngineState>,
    subscribers: Registry<StateSubscriber>,
    running: AtomicBool,
    settings: TimingSettings,
}

impl EngineShared {
    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, now: Instant) -> TimingState {
        let mut state = self.lock();
        if state.timing.is_playing {
            if let Some(started_at) = state.started_at {
                let elapsed = now.saturating_duration_since(started_at);
                let bpm = state.timing.bpm;
                let beat = beat_position(elapsed, bpm);
                state.timing.beat_position = beat;
                state.timing.timing_accuracy = timing_accuracy_ms(elapsed, beat, bpm);
            }
        }
        state.timing.clone()
    }

    fn notify(&self, snapshot: &TimingState) {
        self.subscribers.dispatch(|subscriber| subscriber(snapshot));
    }

    fn run(&self, mut beacon: Beacon) {
        let interval = Duration::from_micros(self.settings.update_interval_us.max(1));
        info!("Timing engine thread started");

        while self.running.load(Ordering::SeqCst) {
            let now = Instant::now();
            let snapshot = self.update(now);
            beacon.maybe_send(&snapshot, now);
            self.notify(&snapshot);
            thread::sleep(interval);
        }

        info!(
            "Timing engine thread stopped ({} beacon packets to {}, {} send errors)",
            beacon.packets_sent(),
            beacon.target(),
            beacon.send_errors()
        );
    }
}

/// The master tempo and transport reference.
pub struct TimingEngine {
    shared: Arc<EngineShared>,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
}

impl TimingEngine {
    pub fn new(settings: TimingSettings) -> Result<Self> {
        validate_tempo(settings.bpm)?;
        if settings.quantum == 0 {
            return Err(Error::InvalidQuantum(0));
        }

        let timing = TimingState {
            bpm: settings.bpm,
            quantum: settings.quantum,
            ..TimingState::default()
        };

        Ok(Self {
            shared: Arc::new(EngineShared {
                state: Mutex::new(EngineState {
                    timing,
                    started_at: None,
                }),
                subscribers: Registry::new("timing subscriber"),
                running: AtomicBool::new(false),
                settings,
            }),
            thread_handle: Mutex::new(None),
        })
    }

    /// Sets the tempo. Out-of-range values are rejected and leave the tempo
    /// unchanged.
    pub fn set_tempo(&self, bpm: f64) -> Result<()> {
        if let Err(e) = validate_tempo(bpm) {
            warn!("BPM {} out of range ({}-{})", bpm, MIN_BPM, MAX_BPM);
            return Err(e);
        }
        self.shared.lock().timing.bpm = bpm;
        info!("BPM set to {:.1}", bpm);
        Ok(())
    }

    pub fn tempo(&self) -> f64 {
        self.shared.lock().timing.bpm
    }

    pub fn set_quantum(&self, quantum: u32) -> Result<()> {
        if quantum == 0 {
            warn!("Rejected quantum of zero beats");
            return Err(Error::InvalidQuantum(quantum));
        }
        self.shared.lock().timing.quantum = quantum;
        info!("Quantum set to {} beats", quantum);
        Ok(())
    }

    pub fn start_playback(&self) {
        self.start_playback_at(Instant::now());
    }

    /// Starts playback from beat zero with `now` as the reference time.
    pub fn start_playback_at(&self, now: Instant) {
        let mut state = self.shared.lock();
        state.timing.is_playing = true;
        state.timing.beat_position = 0.0;
        state.timing.timing_accuracy = 0.0;
        state.timing.start_time = unix_seconds();
        state.started_at = Some(now);
        info!("Playback started at BPM {:.1}", state.timing.bpm);
    }

    /// Stops playback; the beat position keeps its last value.
    pub fn stop_playback(&self) {
        self.shared.lock().timing.is_playing = false;
        info!("Playback stopped");
    }

    pub fn is_playing(&self) -> bool {
        self.shared.lock().timing.is_playing
    }

    pub fn state(&self) -> TimingState {
        self.shared.lock().timing.clone()
    }

    /// Runs one update cycle as of `now` and notifies subscribers. The
    /// background loop calls this continuously.
    pub fn update_at(&self, now: Instant) -> TimingState {
        let snapshot = self.shared.update(now);
        self.shared.notify(&snapshot);
        snapshot
    }

    pub fn subscribe(
        &self,
        name: impl Into<String>,
        subscriber: Arc<StateSubscriber>,
    ) -> SubscriptionId {
        self.shared.subscribers.register(name, subscriber)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.subscribers.unregister(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.len()
    }

    pub fn start(&self) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            warn!("Timing engine already running");
            return;
        }

        debug!(
            "Timing subscribers: {:?}",
            self.shared.subscribers.names()
        );
        let beacon = Beacon::open(&self.shared.settings.beacon);
        let shared = Arc::clone(&self.shared);
        let handle = thread::spawn(move || shared.run(beacon));

        *self
            .thread_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        info!("Timing engine started");
    }

    /// Stops the update loop and waits for it to exit.
    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let handle = self
            .thread_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Timing engine thread panicked");
            }
        }
        info!("Timing engine stopped");
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }
}

impl Drop for TimingEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_beat_position() {
        assert_eq!(beat_position(Duration::from_secs(2), 120.0), 4.0);
        assert_eq!(beat_position(Duration::from_millis(1500), 60.0), 1.5);
    }

    #[test]
    fn test_timing_accuracy() {
        // 2.25 s at 120 BPM is beat 4.5; beat 4 was due at 2.0 s.
        let elapsed = Duration::from_millis(2250);
        let beat = beat_position(elapsed, 120.0);
        assert!((timing_accuracy_ms(elapsed, beat, 120.0) - 250.0).abs() < 1e-6);
    }

    #[test]
    fn test_validate_tempo() {
        assert!(validate_tempo(60.0).is_ok());
        assert!(validate_tempo(200.0).is_ok());
        assert!(validate_tempo(59.0).is_err());
        assert!(validate_tempo(250.0).is_err());
        assert!(validate_tempo(f64::NAN).is_err());
    }
}
