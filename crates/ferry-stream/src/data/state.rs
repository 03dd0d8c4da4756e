use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::request::Counts;

/// Lifecycle of a channel.
///
/// Channels move `Waiting → Running ⇄ Paused → Finished` and never go back
/// to `Waiting` or leave `Finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    /// No upstream `start` observed yet.
    #[default]
    Waiting,

    Running,

    /// Holding back dispatches until the rate gate opens again.
    Paused,

    Finished,
}

impl ChannelStatus {
    pub fn can_transition(self, to: ChannelStatus) -> bool {
        use ChannelStatus::*;
        matches!(
            (self, to),
            (Waiting, Running) | (Running, Paused) | (Paused, Running) | (Running, Finished)
        )
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelStatus::Waiting => write!(f, "waiting"),
            ChannelStatus::Running => write!(f, "running"),
            ChannelStatus::Paused => write!(f, "paused"),
            ChannelStatus::Finished => write!(f, "finished"),
        }
    }
}

/// Durations in milliseconds as seen at one instant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSnapshot {
    /// From construction until first activity (or now, if none yet).
    pub waiting: u64,
    /// Active time, excluding pauses.
    pub running: u64,
    pub paused: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub will_resume_at: Option<DateTime<Utc>>,
}

/// Write-side counters exposed by pulses and the final `end` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SinkTotals {
    /// Remote calls made.
    pub writes: u64,
    /// Everything handed to the sink so far, settled or not.
    pub dispatched: Counts,
    pub successful: Counts,
    pub failed: Counts,
    #[serde(default, skip_serializing_if = "Counts::is_empty")]
    pub recovered: Counts,
    pub pending: usize,
}

/// Heartbeat payload; reading it never changes channel state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pulse {
    pub status: ChannelStatus,
    pub time: TimeSnapshot,
    pub sink: SinkTotals,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCounts {
    /// Sum of page sizes asked for.
    pub requested: u64,
    /// Records actually returned by resolved pages.
    pub resolved: u64,
    /// Records that passed the filter and were queued.
    pub accepted: u64,
    /// Records handed to the consumer.
    pub served: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadCounts {
    pub requested: u64,
    pub resolved: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchFailure {
    pub page: u64,
    pub message: String,
}

/// Read-side bookkeeping, passed to every [`Strategy`](crate::effects::Strategy) call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadState {
    pub records: RecordCounts,
    pub loads: LoadCounts,
    /// Page sizes of loads issued but not yet resolved.
    pub in_flight: u64,
    /// Total record count reported by the source, once known.
    pub total: Option<u64>,
    /// No more pages will be requested.
    pub exhausted: bool,
    /// No more records will ever be produced. Implies `exhausted`.
    pub terminated: bool,
}

impl ReadState {
    /// Records requested or resolved but not yet served.
    pub fn outstanding(&self) -> u64 {
        let unserved = self.records.accepted.saturating_sub(self.records.served);
        self.in_flight + unserved
    }

    pub fn loads_in_flight(&self) -> u64 { self.loads.requested - self.loads.resolved }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions_only_move_forward() {
        use ChannelStatus::*;
        assert!(Waiting.can_transition(Running));
        assert!(Running.can_transition(Paused));
        assert!(Paused.can_transition(Running));
        assert!(Running.can_transition(Finished));

        assert!(!Running.can_transition(Waiting));
        assert!(!Finished.can_transition(Running));
        assert!(!Paused.can_transition(Paused));
        assert!(!Waiting.can_transition(Paused));
    }

    #[test]
    fn test_outstanding_counts_in_flight_and_unserved() {
        let state = ReadState {
            records: RecordCounts {
                requested: 300,
                resolved: 200,
                accepted: 150,
                served: 120,
            },
            in_flight: 100,
            ..ReadState::default()
        };
        assert_eq!(state.outstanding(), 100 + 30);
    }
}
