// ui.rs

use crate::registry::{CallbackResult, SubscriptionId};
use crate::timing::{TimingEngine, TimingState};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Bars shown by the phrase indicator before it wraps.
const BARS_PER_PHRASE: u64 = 4;
const REFRESH_INTERVAL: Duration = Duration::from_millis(50);

/// Splits an absolute beat position into a 1-based (bar, beat-in-bar) pair.
pub fn bar_and_beat(beat_position: f64, quantum: u32) -> (u64, u64) {
    let quantum = u64::from(quantum.max(1));
    let whole_beats = beat_position.max(0.0).floor() as u64;
    (whole_beats / quantum + 1, whole_beats % quantum + 1)
}

fn style(template: &str, fallback: ProgressStyle) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or(fallback)
}

fn create_beat_progress(multi_progress: &MultiProgress, quantum: u32) -> ProgressBar {
    let pb = multi_progress.add(ProgressBar::new(u64::from(quantum)));
    pb.set_style(
        style(
            "{prefix:.bold} [{bar:40.cyan}] {pos}/{len}",
            ProgressStyle::default_bar(),
        )
        .progress_chars("⣀⣤⣦⣶⣷⣿ "),
    );
    pb.set_prefix("Beat");
    pb
}

fn create_bar_progress(multi_progress: &MultiProgress) -> ProgressBar {
    let pb = multi_progress.add(ProgressBar::new(BARS_PER_PHRASE));
    pb.set_style(
        style(
            "{prefix:.bold} [{bar:20.white/black}] {pos}/{len} {msg}",
            ProgressStyle::default_bar(),
        )
        .progress_chars("█▊ "),
    );
    pb.set_prefix("Bar");
    pb
}

fn create_transport_spinner(multi_progress: &MultiProgress) -> ProgressBar {
    let pb = multi_progress.add(ProgressBar::new_spinner());
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_prefix("Transport");
    pb
}

/// Terminal transport display fed by timing engine snapshots.
pub struct StatusMonitor {
    #[allow(dead_code)]
    multi_progress: MultiProgress,
    beat_pb: ProgressBar,
    bar_pb: ProgressBar,
    transport_pb: ProgressBar,
    last_refresh: Mutex<Option<Instant>>,
}

impl StatusMonitor {
    /// Draws to stderr.
    pub fn new(quantum: u32) -> Self {
        Self::with_draw_target(ProgressDrawTarget::stderr(), quantum)
    }

    /// Draws nothing; the bars still track state.
    pub fn hidden(quantum: u32) -> Self {
        Self::with_draw_target(ProgressDrawTarget::hidden(), quantum)
    }

    fn with_draw_target(target: ProgressDrawTarget, quantum: u32) -> Self {
        let multi_progress = MultiProgress::with_draw_target(target);
        let beat_pb = create_beat_progress(&multi_progress, quantum);
        let bar_pb = create_bar_progress(&multi_progress);
        let transport_pb = create_transport_spinner(&multi_progress);

        Self {
            multi_progress,
            beat_pb,
            bar_pb,
            transport_pb,
            last_refresh: Mutex::new(None),
        }
    }

    /// Redraws from `state` unconditionally.
    pub fn render(&self, state: &TimingState) {
        let (bar, beat) = bar_and_beat(state.beat_position, state.quantum);

        self.beat_pb.set_length(u64::from(state.quantum.max(1)));
        self.beat_pb.set_position(if state.is_playing { beat } else { 0 });
        self.bar_pb.set_position((bar - 1) % BARS_PER_PHRASE + 1);
        self.bar_pb.set_message(format!("(bar {})", bar));

        self.transport_pb.set_message(format!(
            "BPM: {:.1}, Beat: {:.2}, Accuracy: {:.1}ms, Transport: {}",
            state.bpm,
            state.beat_position,
            state.timing_accuracy,
            if state.is_playing { "Playing" } else { "Stopped" }
        ));
        self.transport_pb.tick();
    }

    /// Redraws at most every 50 ms; the timing loop calls far more often.
    pub fn update(&self, state: &TimingState) {
        let now = Instant::now();
        {
            let mut last = self
                .last_refresh
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if matches!(*last, Some(at) if now.duration_since(at) < REFRESH_INTERVAL) {
                return;
            }
            *last = Some(now);
        }
        self.render(state);
    }

    /// Subscribes the monitor to `engine` snapshots.
    pub fn attach(self: &Arc<Self>, engine: &TimingEngine) -> SubscriptionId {
        let monitor = Arc::clone(self);
        engine.subscribe(
            "status monitor",
            Arc::new(move |state: &TimingState| -> CallbackResult {
                monitor.update(state);
                Ok(())
            }),
        )
    }

    pub fn beat(&self) -> u64 {
        self.beat_pb.position()
    }

    pub fn bar(&self) -> u64 {
        self.bar_pb.position()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bar_and_beat() {
        assert_eq!(bar_and_beat(0.0, 4), (1, 1));
        assert_eq!(bar_and_beat(3.9, 4), (1, 4));
        assert_eq!(bar_and_beat(4.0, 4), (2, 1));
        assert_eq!(bar_and_beat(7.5, 3), (3, 2));
    }

    #[test]
    fn test_render_tracks_state() {
        let monitor = StatusMonitor::hidden(4);
        let state = TimingState {
            is_playing: true,
            beat_position: 5.5,
            ..TimingState::default()
        };
        monitor.render(&state);
        assert_eq!(monitor.beat(), 2);
        assert_eq!(monitor.bar(), 2);

        let stopped = TimingState {
            is_playing: false,
            ..state
        };
        monitor.render(&stopped);
        assert_eq!(monitor.beat(), 0);
    }
}
