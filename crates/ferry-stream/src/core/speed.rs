use std::time::Duration;

use crate::data::Counts;

/// Observed service throughput.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Throughput {
    pub records_per_second: f64,
    pub bytes_per_second: f64,
}

/// Accumulates how fast the remote service actually processes writes.
///
/// Each completed write contributes the time the call took and the records
/// and bytes it carried. Records are only ever added to the record total and
/// bytes to the byte total.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceSpeed {
    samples: u64,
    took: Duration,
    records: u64,
    bytes: u64,
}

impl ServiceSpeed {
    pub fn new() -> Self { Self::default() }

    pub fn record(&mut self, took: Duration, counts: Counts) {
        self.samples += 1;
        self.took += took;
        self.records += counts.records;
        self.bytes += counts.bytes;
    }

    pub fn samples(&self) -> u64 { self.samples }

    pub fn records_per_second(&self) -> Option<f64> {
        let secs = self.took.as_secs_f64();
        (secs > 0.0).then(|| self.records as f64 / secs)
    }

    pub fn bytes_per_second(&self) -> Option<f64> {
        let secs = self.took.as_secs_f64();
        (secs > 0.0).then(|| self.bytes as f64 / secs)
    }

    /// Throughput, once at least `min_samples` writes have been recorded.
    pub fn throughput(&self, min_samples: u64) -> Option<Throughput> {
        if self.samples < min_samples.max(1) {
            return None;
        }
        Some(Throughput {
            records_per_second: self.records_per_second()?,
            bytes_per_second: self.bytes_per_second()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_estimator_has_no_rate() {
        let speed = ServiceSpeed::new();
        assert_eq!(speed.records_per_second(), None);
        assert_eq!(speed.throughput(0), None);
    }

    #[test]
    fn test_rates_use_matching_totals() {
        let mut speed = ServiceSpeed::new();
        speed.record(Duration::from_millis(500), Counts::new(50, 1000));
        speed.record(Duration::from_millis(1500), Counts::new(150, 3000));

        assert_eq!(speed.samples(), 2);
        assert_eq!(speed.records_per_second(), Some(100.0));
        assert_eq!(speed.bytes_per_second(), Some(2000.0));
    }

    #[test]
    fn test_throughput_waits_for_samples() {
        let mut speed = ServiceSpeed::new();
        speed.record(Duration::from_secs(1), Counts::new(10, 10));
        assert!(speed.throughput(2).is_none());

        speed.record(Duration::from_secs(1), Counts::new(10, 10));
        let throughput = speed.throughput(2).unwrap();
        assert_eq!(throughput.records_per_second, 10.0);
    }
}
