use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(1);

/// Messages-per-second meter. The rate is recomputed at most once per
/// second, and each recompute starts a new counting window.
#[derive(Debug, Clone)]
pub struct ThroughputMeter {
    processed: u64,
    messages_per_second: f64,
    last_refresh: Instant,
}

impl ThroughputMeter {
    pub fn new(now: Instant) -> Self {
        Self {
            processed: 0,
            messages_per_second: 0.0,
            last_refresh: now,
        }
    }

    pub fn record(&mut self) {
        self.processed += 1;
    }

    /// Recomputes the rate if a full window has elapsed. Returns whether it did.
    pub fn refresh(&mut self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refresh);
        if elapsed < WINDOW {
            return false;
        }

        self.messages_per_second = self.processed as f64 / elapsed.as_secs_f64();
        self.processed = 0;
        self.last_refresh = now;
        true
    }

    /// Messages counted in the current window.
    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn messages_per_second(&self) -> f64 {
        self.messages_per_second
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_only_recomputed_after_a_full_second() {
        let t0 = Instant::now();
        let mut meter = ThroughputMeter::new(t0);
        for _ in 0..50 {
            meter.record();
        }

        assert!(!meter.refresh(t0 + Duration::from_millis(999)));
        assert_eq!(meter.messages_per_second(), 0.0);
        assert_eq!(meter.processed(), 50);

        assert!(meter.refresh(t0 + Duration::from_secs(2)));
        assert_eq!(meter.messages_per_second(), 25.0);
        assert_eq!(meter.processed(), 0);
    }

    #[test]
    fn test_window_restarts_at_each_recompute() {
        let t0 = Instant::now();
        let mut meter = ThroughputMeter::new(t0);
        meter.record();
        assert!(meter.refresh(t0 + Duration::from_secs(1)));
        assert_eq!(meter.messages_per_second(), 1.0);

        assert!(!meter.refresh(t0 + Duration::from_millis(1500)));
        for _ in 0..4 {
            meter.record();
        }
        assert!(meter.refresh(t0 + Duration::from_secs(2)));
        assert_eq!(meter.messages_per_second(), 4.0);
    }
}
