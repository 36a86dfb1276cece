//! Byte accounting and bandwidth math for a single stream.
//!
//! A [`TransferStats`] is owned by the task driving one stream and is never
//! shared. Time is passed in explicitly so the sampling rules can be exercised
//! without a network.

use crate::config::Mode;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Floor applied to the sender's aggregate duration.
pub const MIN_REPORT_DURATION: Duration = Duration::from_secs(1);

/// Stand-in for a measured duration of exactly zero.
const ZERO_ELAPSED_SUBSTITUTE: Duration = Duration::from_micros(1);

/// Converts a byte count over a duration into megabits per second.
///
/// No clamping is applied; callers substitute a floor for tiny durations.
///
/// # Examples
///
/// ```
/// use goodput::measurements::bandwidth_mbps;
///
/// assert_eq!(bandwidth_mbps(1_000_000, 1.0), 8.0);
/// assert_eq!(bandwidth_mbps(0, 5.0), 0.0);
/// ```
pub fn bandwidth_mbps(bytes: u64, duration_secs: f64) -> f64 {
    (bytes as f64 * 8.0) / (duration_secs * 1_000_000.0)
}

/// One sampling window of a duration-bounded stream.
///
/// `start` and `end` are the nominal labels `index * interval` and
/// `(index + 1) * interval`, not the measured wall-clock boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalRecord {
    pub index: u32,
    pub start: f64,
    pub end: f64,
    pub bytes: u64,
    pub mbps: f64,
}

impl IntervalRecord {
    fn new(index: u32, interval: Duration, bytes: u64) -> Self {
        let secs = interval.as_secs_f64();
        Self {
            index,
            start: index as f64 * secs,
            end: (index + 1) as f64 * secs,
            bytes,
            mbps: bandwidth_mbps(bytes, secs),
        }
    }
}

/// Aggregate result of one finished stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSummary {
    pub mode: Mode,
    /// Peer identity, `ip:port`
    pub endpoint: String,
    pub bytes: u64,
    /// Duration used for the bandwidth figure, in seconds
    pub seconds: f64,
    pub mbps: f64,
}

impl StreamSummary {
    /// Builds a summary from the measured duration.
    ///
    /// Only an elapsed time of exactly zero is replaced, to keep the divisor
    /// non-zero.
    pub fn new(mode: Mode, endpoint: impl Into<String>, bytes: u64, elapsed: Duration) -> Self {
        let elapsed = if elapsed.is_zero() {
            ZERO_ELAPSED_SUBSTITUTE
        } else {
            elapsed
        };
        let seconds = elapsed.as_secs_f64();
        Self {
            mode,
            endpoint: endpoint.into(),
            bytes,
            seconds,
            mbps: bandwidth_mbps(bytes, seconds),
        }
    }

    /// Builds a summary with `elapsed` floored at [`MIN_REPORT_DURATION`].
    pub fn floored(mode: Mode, endpoint: impl Into<String>, bytes: u64, elapsed: Duration) -> Self {
        Self::new(mode, endpoint, bytes, elapsed.max(MIN_REPORT_DURATION))
    }
}

/// Running counters for one stream.
#[derive(Debug)]
pub struct TransferStats {
    bytes: u64,
    started: Instant,
    window_start: Instant,
    window_bytes: u64,
    window_index: u32,
}

impl TransferStats {
    pub fn new(started: Instant) -> Self {
        Self {
            bytes: 0,
            started,
            window_start: started,
            window_bytes: 0,
            window_index: 0,
        }
    }

    /// Accounts for `n` bytes moved in the current window.
    pub fn record(&mut self, n: u64) {
        self.bytes += n;
        self.window_bytes += n;
    }

    /// Total bytes moved since the stream began.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started)
    }

    /// Closes the current window if at least `interval` has passed since it opened.
    ///
    /// The next window opens at `now` rather than at the nominal boundary, so
    /// drift accumulates over a long run while the labels stay nominal.
    pub fn roll_window(&mut self, now: Instant, interval: Duration) -> Option<IntervalRecord> {
        if now.saturating_duration_since(self.window_start) < interval {
            return None;
        }
        let record = IntervalRecord::new(self.window_index, interval, self.window_bytes);
        self.window_start = now;
        self.window_bytes = 0;
        self.window_index += 1;
        Some(record)
    }

    /// Reports the trailing partial window, if it holds any bytes.
    pub fn flush_window(&mut self, interval: Duration) -> Option<IntervalRecord> {
        if self.window_bytes == 0 {
            return None;
        }
        let record = IntervalRecord::new(self.window_index, interval, self.window_bytes);
        self.window_bytes = 0;
        self.window_index += 1;
        Some(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHUNK: u64 = 1000;

    /// Mirrors the client's duration loop with a synthetic clock that advances
    /// `step` per send.
    fn simulate(
        limit: Duration,
        interval: Duration,
        step: Duration,
    ) -> (TransferStats, Vec<IntervalRecord>) {
        let t0 = Instant::now();
        let mut stats = TransferStats::new(t0);
        let mut now = t0;
        let mut records = Vec::new();

        while stats.elapsed(now) < limit {
            now += step;
            stats.record(CHUNK);
            if let Some(record) = stats.roll_window(now, interval) {
                records.push(record);
            }
        }
        records.extend(stats.flush_window(interval));
        (stats, records)
    }

    #[test]
    fn test_bandwidth_mbps() {
        assert_eq!(bandwidth_mbps(1_000_000, 1.0), 8.0);
        assert_eq!(bandwidth_mbps(0, 5.0), 0.0);
        assert_eq!(bandwidth_mbps(5_000_000, 2.0), 20.0);
    }

    #[test]
    fn test_five_seconds_at_two_second_interval() {
        let (_, records) = simulate(
            Duration::from_secs(5),
            Duration::from_secs(2),
            Duration::from_millis(100),
        );

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].start, 0.0);
        assert_eq!(records[0].end, 2.0);
        assert_eq!(records[1].start, 2.0);
        assert_eq!(records[1].end, 4.0);
        assert_eq!(records[2].start, 4.0);
        assert_eq!(records[0].bytes, 20 * CHUNK);
        assert_eq!(records[1].bytes, 20 * CHUNK);
        assert_eq!(records[2].bytes, 10 * CHUNK);
    }

    #[test]
    fn test_interval_bytes_sum_to_total() {
        let cases = [(5000, 2000, 100), (3000, 700, 130), (1000, 1000, 7)];
        for (limit_ms, interval_ms, step_ms) in cases {
            let (stats, records) = simulate(
                Duration::from_millis(limit_ms),
                Duration::from_millis(interval_ms),
                Duration::from_millis(step_ms),
            );
            let sum: u64 = records.iter().map(|r| r.bytes).sum();
            assert_eq!(sum, stats.bytes());
        }
    }

    #[test]
    fn test_window_restarts_at_now() {
        let t0 = Instant::now();
        let interval = Duration::from_secs(1);
        let mut stats = TransferStats::new(t0);

        stats.record(CHUNK);
        // Late boundary: the window closes at 1.5s and the next opens there.
        let late = t0 + Duration::from_millis(1500);
        let first = stats.roll_window(late, interval).unwrap();
        assert_eq!((first.start, first.end), (0.0, 1.0));

        stats.record(CHUNK);
        assert!(stats.roll_window(t0 + Duration::from_millis(2400), interval).is_none());
        let second = stats.roll_window(t0 + Duration::from_millis(2500), interval).unwrap();
        assert_eq!((second.start, second.end), (1.0, 2.0));
        assert_eq!(second.index, 1);
    }

    #[test]
    fn test_interval_record_uses_nominal_length() {
        let t0 = Instant::now();
        let mut stats = TransferStats::new(t0);
        stats.record(2_000_000);
        let record = stats
            .roll_window(t0 + Duration::from_secs(3), Duration::from_secs(2))
            .unwrap();
        assert_eq!(record.mbps, 8.0);
    }

    #[test]
    fn test_flush_empty_window() {
        let mut stats = TransferStats::new(Instant::now());
        assert!(stats.flush_window(Duration::from_secs(1)).is_none());
    }

    #[test]
    fn test_floored_summary() {
        let summary = StreamSummary::floored(
            Mode::Client,
            "127.0.0.1:8088",
            1_000_000,
            Duration::from_millis(20),
        );
        assert_eq!(summary.seconds, 1.0);
        assert_eq!(summary.mbps, 8.0);

        let summary = StreamSummary::floored(Mode::Client, "x", 4_000_000, Duration::from_secs(2));
        assert_eq!(summary.seconds, 2.0);
        assert_eq!(summary.mbps, 16.0);
    }

    #[test]
    fn test_summary_keeps_short_duration() {
        let summary = StreamSummary::new(Mode::Server, "x", 1_000_000, Duration::from_millis(250));
        assert_eq!(summary.seconds, 0.25);
        assert_eq!(summary.mbps, 32.0);
    }

    #[test]
    fn test_summary_zero_duration_is_finite() {
        let summary = StreamSummary::new(Mode::Server, "x", 1_000, Duration::ZERO);
        assert!(summary.seconds > 0.0);
        assert!(summary.mbps.is_finite());

        let empty = StreamSummary::new(Mode::Server, "x", 0, Duration::ZERO);
        assert_eq!(empty.mbps, 0.0);
    }
}
