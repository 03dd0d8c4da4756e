use std::time::Duration;

use tokio::time::Instant;

use crate::core::speed::Throughput;
use crate::data::{RateOptions, SinkTotals};

/// Waits at or below this are skipped; timers that fine only add jitter.
const MIN_BLOCK: Duration = Duration::from_millis(1000);

/// Longest single hold; vanishingly small targets saturate here.
pub(crate) const MAX_BLOCK: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// Sink counters as seen by the gate at one instant.
#[derive(Debug, Clone, Default)]
pub struct SinkSnapshot {
    pub totals: SinkTotals,
    pub first_write_at: Option<Instant>,
    /// Service speed, present once the estimator has enough samples.
    pub observed: Option<Throughput>,
}

/// Computes how long a write channel must hold its next dispatch so that
/// writes, records and bytes since the first write stay within the configured
/// per-second targets.
///
/// The gate holds no timer and no state of its own: the answer depends only on
/// the snapshot and `now`.
#[derive(Debug, Clone, Default)]
pub struct SinkGate {
    writes_per_second: Option<f64>,
    records_per_second: Option<f64>,
    bytes_per_second: Option<f64>,
    adaptive: bool,
}

impl SinkGate {
    pub fn new(options: &RateOptions) -> Self {
        let positive = |rate: Option<f64>| rate.filter(|r| r.is_finite() && *r > 0.0);
        Self {
            writes_per_second: positive(options.writes_per_second),
            records_per_second: positive(options.records_per_second),
            bytes_per_second: positive(options.bytes_per_second),
            adaptive: options.adaptive,
        }
    }

    pub fn is_open(&self) -> bool {
        self.writes_per_second.is_none()
            && self.records_per_second.is_none()
            && self.bytes_per_second.is_none()
    }

    pub fn blocked_time(&self, sink: &SinkSnapshot, now: Instant) -> Duration {
        let Some(first_write_at) = sink.first_write_at else {
            return Duration::ZERO;
        };
        if self.is_open() {
            return Duration::ZERO;
        }

        let (records_per_second, bytes_per_second) = self.targets(sink.observed);
        let totals = &sink.totals;

        let required = [
            (self.writes_per_second, totals.writes),
            (records_per_second, totals.dispatched.records),
            (bytes_per_second, totals.dispatched.bytes),
        ]
        .into_iter()
        .filter_map(|(rate, done)| rate.map(|rate| done as f64 / rate))
        .fold(0.0_f64, f64::max);

        let elapsed = now.saturating_duration_since(first_write_at);
        let required = Duration::try_from_secs_f64(required)
            .map_or(MAX_BLOCK, |required| required.min(MAX_BLOCK));
        let blocked = required.saturating_sub(elapsed);

        if blocked <= MIN_BLOCK {
            Duration::ZERO
        } else {
            blocked
        }
    }

    fn targets(&self, observed: Option<Throughput>) -> (Option<f64>, Option<f64>) {
        match observed {
            Some(observed) if self.adaptive => (
                self.records_per_second
                    .map(|_| observed.records_per_second)
                    .filter(|r| *r > 0.0),
                self.bytes_per_second
                    .map(|_| observed.bytes_per_second)
                    .filter(|r| *r > 0.0),
            ),
            _ => (self.records_per_second, self.bytes_per_second),
        }
    }
}
