//! EWMA rate accounting for the ring buffer.

use std::time::{Duration, Instant};

use crate::RingStats;

/// Running statistics state, owned by the buffer while stats are enabled.
pub(crate) struct StatsState {
    update_interval: Duration,
    beta: f64,
    window_start: Instant,
    window_count: u64,
    window_bytes: u64,
    seeded: bool,
    totals: RingStats,
}

impl StatsState {
    pub(crate) fn new(update_interval_s: f64, ewma_beta: f64) -> StatsState {
        StatsState {
            update_interval: Duration::from_secs_f64(update_interval_s),
            beta: ewma_beta.clamp(0.0, 1.0),
            window_start: Instant::now(),
            window_count: 0,
            window_bytes: 0,
            seeded: false,
            totals: RingStats::default(),
        }
    }

    /// Account one confirmed read; close the measurement window if the
    /// update interval has elapsed.
    pub(crate) fn record_read(&mut self, bytes: Option<usize>) {
        self.totals.rd_count += 1;
        self.window_count += 1;
        if let Some(bytes) = bytes {
            self.totals.rd_bytes += bytes as u64;
            self.window_bytes += bytes as u64;
        }

        let elapsed = self.window_start.elapsed();
        if elapsed < self.update_interval {
            return;
        }

        // Normalize by the real window length so scheduling jitter doesn't
        // bias the estimate.
        let secs = elapsed.as_secs_f64();
        let rate = self.window_count as f64 / secs;
        let byterate = self.window_bytes as f64 / secs;

        if self.seeded {
            self.totals.rd_per_sec += self.beta * (rate - self.totals.rd_per_sec);
            self.totals.byterate += self.beta * (byterate - self.totals.byterate);
        } else {
            // The first completed window seeds the averages; starting from
            // zero would take 1/beta windows just to approach the true rate.
            self.totals.rd_per_sec = rate;
            self.totals.byterate = byterate;
            self.seeded = true;
        }

        self.window_start = Instant::now();
        self.window_count = 0;
        self.window_bytes = 0;
    }

    pub(crate) fn snapshot(&self) -> RingStats {
        self.totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_counters_accumulate_immediately() {
        let mut stats = StatsState::new(60.0, 0.5);
        stats.record_read(Some(100));
        stats.record_read(None);
        stats.record_read(Some(50));
        let snap = stats.snapshot();
        assert_eq!(snap.rd_count, 3);
        assert_eq!(snap.rd_bytes, 150);
        // Window never closed; rates still unseeded.
        assert_eq!(snap.rd_per_sec, 0.0);
    }

    #[test]
    fn test_first_window_seeds_rates() {
        let mut stats = StatsState::new(0.01, 0.1);
        stats.record_read(Some(8));
        thread::sleep(Duration::from_millis(15));
        stats.record_read(Some(8));
        let snap = stats.snapshot();
        assert!(snap.rd_per_sec > 0.0);
        assert!(snap.byterate > 0.0);
    }

    #[test]
    fn test_beta_clamped() {
        let stats = StatsState::new(1.0, 7.5);
        assert_eq!(stats.beta, 1.0);
    }
}
