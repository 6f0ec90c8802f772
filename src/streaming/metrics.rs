// Ingest counters and sliding-window throughput estimation

use crate::streaming::types::MetricsSnapshot;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Samples/sec over a sliding window of recent arrivals.
///
/// Arrivals are bucketed (default 20 buckets per window) so memory stays
/// bounded at any sample rate.
#[derive(Debug)]
pub struct ThroughputEstimator {
    window: Duration,
    bucket_width: Duration,
    buckets: VecDeque<(Instant, u64)>,
    started: Option<Instant>,
}

impl ThroughputEstimator {
    const BUCKETS_PER_WINDOW: u32 = 20;

    pub fn new(window: Duration) -> Self {
        let window = window.max(Duration::from_millis(10));
        Self {
            window,
            bucket_width: window / Self::BUCKETS_PER_WINDOW,
            buckets: VecDeque::with_capacity(Self::BUCKETS_PER_WINDOW as usize + 1),
            started: None,
        }
    }

    pub fn record(&mut self, now: Instant) {
        self.record_many(now, 1);
    }

    pub fn record_many(&mut self, now: Instant, count: u64) {
        self.started.get_or_insert(now);
        match self.buckets.back_mut() {
            Some((start, n)) if now.saturating_duration_since(*start) < self.bucket_width => {
                *n += count;
            }
            _ => self.buckets.push_back((now, count)),
        }
        self.prune(now);
    }

    /// Current rate; decays to zero once arrivals stop for a full window
    pub fn rate(&mut self, now: Instant) -> f64 {
        self.prune(now);
        let Some(started) = self.started else {
            return 0.0;
        };

        let total: u64 = self.buckets.iter().map(|(_, n)| n).sum();
        if total == 0 {
            return 0.0;
        }

        // Before a full window has elapsed, divide by the time actually observed
        let span = now.saturating_duration_since(started).min(self.window);
        let secs = span.as_secs_f64().max(self.bucket_width.as_secs_f64());
        total as f64 / secs
    }

    fn prune(&mut self, now: Instant) {
        while let Some((start, _)) = self.buckets.front() {
            if now.saturating_duration_since(*start) > self.window {
                self.buckets.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Lock-free counters shared between an ingest worker and metric readers
#[derive(Debug, Default)]
pub struct IngestCounters {
    lines_received: AtomicU64,
    decoded: AtomicU64,
    dropped: AtomicU64,
    decimated: AtomicU64,
    rate_bits: AtomicU64,
}

impl IngestCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_line(&self) {
        self.lines_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decoded(&self) {
        self.decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decimated(&self) {
        self.decimated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn publish_rate(&self, samples_per_sec: f64) {
        self.rate_bits
            .store(samples_per_sec.to_bits(), Ordering::Relaxed);
    }

    pub fn samples_per_sec(&self) -> f64 {
        f64::from_bits(self.rate_bits.load(Ordering::Relaxed))
    }

    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn decoded_count(&self) -> u64 {
        self.decoded.load(Ordering::Relaxed)
    }

    pub fn lines_received(&self) -> u64 {
        self.lines_received.load(Ordering::Relaxed)
    }

    pub fn decimated_count(&self) -> u64 {
        self.decimated.load(Ordering::Relaxed)
    }

    /// Combine with buffer-side counters into a caller-facing snapshot
    pub fn snapshot(&self, evicted_count: u64, buffer_len: usize) -> MetricsSnapshot {
        MetricsSnapshot {
            samples_per_sec: self.samples_per_sec(),
            drop_count: self.drop_count(),
            evicted_count,
            decoded_count: self.decoded_count(),
            lines_received: self.lines_received(),
            buffer_len,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_over_full_window() {
        let mut est = ThroughputEstimator::new(Duration::from_secs(2));
        let t0 = Instant::now();
        // 100 Hz for 4 seconds
        for i in 0..400u64 {
            est.record(t0 + Duration::from_millis(i * 10));
        }
        let rate = est.rate(t0 + Duration::from_millis(3990));
        assert!((rate - 100.0).abs() < 10.0, "rate was {}", rate);
    }

    #[test]
    fn test_rate_before_window_filled() {
        let mut est = ThroughputEstimator::new(Duration::from_secs(2));
        let t0 = Instant::now();
        for i in 0..50u64 {
            est.record(t0 + Duration::from_millis(i * 10));
        }
        // 50 samples over ~0.5s
        let rate = est.rate(t0 + Duration::from_millis(500));
        assert!((rate - 100.0).abs() < 15.0, "rate was {}", rate);
    }

    #[test]
    fn test_rate_decays_after_stall() {
        let mut est = ThroughputEstimator::new(Duration::from_secs(1));
        let t0 = Instant::now();
        for i in 0..100u64 {
            est.record(t0 + Duration::from_millis(i * 10));
        }
        assert!(est.rate(t0 + Duration::from_millis(1000)) > 0.0);
        assert_eq!(est.rate(t0 + Duration::from_secs(5)), 0.0);
    }

    #[test]
    fn test_empty_estimator_reports_zero() {
        let mut est = ThroughputEstimator::new(Duration::from_secs(1));
        assert_eq!(est.rate(Instant::now()), 0.0);
    }

    #[test]
    fn test_counters_snapshot() {
        let counters = IngestCounters::new();
        counters.record_line();
        counters.record_line();
        counters.record_decoded();
        counters.record_drop();
        counters.publish_rate(42.5);

        let snap = counters.snapshot(3, 7);
        assert_eq!(snap.lines_received, 2);
        assert_eq!(snap.decoded_count, 1);
        assert_eq!(snap.drop_count, 1);
        assert_eq!(snap.evicted_count, 3);
        assert_eq!(snap.buffer_len, 7);
        assert_eq!(snap.samples_per_sec, 42.5);
    }
}
