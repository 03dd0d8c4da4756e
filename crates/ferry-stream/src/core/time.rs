use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;

use crate::data::TimeSnapshot;
use crate::error::{Result, StreamError};

/// Tracks when a channel was built, first became active, and how long it has
/// spent paused.
///
/// All methods take `now` explicitly; the tracker never reads a clock.
#[derive(Debug, Clone)]
pub struct TimeTracker {
    created_at: Instant,
    started_at: Option<Instant>,
    paused_at: Option<Instant>,
    will_resume_at: Option<Instant>,
    paused_total: Duration,
    finished_at: Option<Instant>,
}

impl TimeTracker {
    pub fn new(now: Instant) -> Self {
        Self {
            created_at: now,
            started_at: None,
            paused_at: None,
            will_resume_at: None,
            paused_total: Duration::ZERO,
            finished_at: None,
        }
    }

    /// Marks first activity. Later calls keep the original instant.
    pub fn start(&mut self, now: Instant) {
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
    }

    pub fn pause(&mut self, now: Instant, until: Option<Instant>) -> Result<()> {
        if self.paused_at.is_some() {
            return Err(StreamError::IllegalState("pause while already paused"));
        }
        self.start(now);
        self.paused_at = Some(now);
        self.will_resume_at = until;
        Ok(())
    }

    pub fn resume(&mut self, now: Instant) -> Result<()> {
        let Some(paused_at) = self.paused_at.take() else {
            return Err(StreamError::IllegalState("resume without pause"));
        };
        self.paused_total += now.saturating_duration_since(paused_at);
        self.will_resume_at = None;
        Ok(())
    }

    pub fn finish(&mut self, now: Instant) {
        if self.paused_at.is_some() {
            // resume cannot fail while paused
            let _ = self.resume(now);
        }
        self.start(now);
        self.finished_at.get_or_insert(now);
    }

    pub fn is_paused(&self) -> bool { self.paused_at.is_some() }

    pub fn started_at(&self) -> Option<Instant> { self.started_at }

    pub fn waiting(&self, now: Instant) -> Duration {
        self.started_at
            .unwrap_or(now)
            .saturating_duration_since(self.created_at)
    }

    pub fn paused(&self, now: Instant) -> Duration {
        let current = self
            .paused_at
            .map(|at| self.end(now).saturating_duration_since(at))
            .unwrap_or_default();
        self.paused_total + current
    }

    pub fn running(&self, now: Instant) -> Duration {
        match self.started_at {
            Some(started_at) => self
                .end(now)
                .saturating_duration_since(started_at)
                .saturating_sub(self.paused(now)),
            None => Duration::ZERO,
        }
    }

    pub fn snapshot(&self, now: Instant) -> TimeSnapshot {
        let will_resume_at = self.will_resume_at.and_then(|at| {
            let remaining = at.saturating_duration_since(now);
            chrono::Duration::from_std(remaining)
                .ok()
                .map(|remaining| Utc::now() + remaining)
        });

        TimeSnapshot {
            waiting: millis(self.waiting(now)),
            running: millis(self.running(now)),
            paused: millis(self.paused(now)),
            will_resume_at,
        }
    }

    fn end(&self, now: Instant) -> Instant { self.finished_at.unwrap_or(now) }
}

fn millis(duration: Duration) -> u64 { duration.as_millis().try_into().unwrap_or(u64::MAX) }

#[cfg(test)]
mod tests {
    use super::*;

    fn at(base: Instant, ms: u64) -> Instant { base + Duration::from_millis(ms) }

    #[test]
    fn test_waiting_until_first_activity() {
        let base = Instant::now();
        let mut time = TimeTracker::new(base);

        assert_eq!(time.waiting(at(base, 300)), Duration::from_millis(300));
        assert_eq!(time.running(at(base, 300)), Duration::ZERO);

        time.start(at(base, 500));
        time.start(at(base, 900));
        assert_eq!(time.waiting(at(base, 2000)), Duration::from_millis(500));
        assert_eq!(time.running(at(base, 2000)), Duration::from_millis(1500));
    }

    #[test]
    fn test_pauses_are_excluded_from_running() {
        let base = Instant::now();
        let mut time = TimeTracker::new(base);
        time.start(base);

        time.pause(at(base, 1000), Some(at(base, 3000))).unwrap();
        assert!(time.is_paused());
        assert_eq!(time.paused(at(base, 2000)), Duration::from_millis(1000));
        assert!(time.snapshot(at(base, 2000)).will_resume_at.is_some());

        time.resume(at(base, 3000)).unwrap();
        assert_eq!(time.paused(at(base, 4000)), Duration::from_millis(2000));
        assert_eq!(time.running(at(base, 4000)), Duration::from_millis(2000));
        assert!(time.snapshot(at(base, 4000)).will_resume_at.is_none());
    }

    #[test]
    fn test_pause_and_resume_out_of_state() {
        let base = Instant::now();
        let mut time = TimeTracker::new(base);

        assert!(matches!(time.resume(base), Err(StreamError::IllegalState(_))));
        time.pause(base, None).unwrap();
        assert!(matches!(time.pause(base, None), Err(StreamError::IllegalState(_))));
    }

    #[test]
    fn test_finish_freezes_durations() {
        let base = Instant::now();
        let mut time = TimeTracker::new(base);
        time.start(base);
        time.finish(at(base, 1000));

        let snapshot = time.snapshot(at(base, 5000));
        assert_eq!(snapshot.running, 1000);
        assert_eq!(snapshot.paused, 0);
    }
}
