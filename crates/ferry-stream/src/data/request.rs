use std::ops::{Add, AddAssign};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Record and byte tally used by every success/failure counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub records: u64,
    #[serde(default)]
    pub bytes: u64,
}

impl Counts {
    pub fn new(records: u64, bytes: u64) -> Self { Self { records, bytes } }

    pub fn is_empty(&self) -> bool { self.records == 0 && self.bytes == 0 }
}

impl Add for Counts {
    type Output = Counts;

    fn add(self, rhs: Counts) -> Counts {
        Counts {
            records: self.records + rhs.records,
            bytes: self.bytes + rhs.bytes,
        }
    }
}

impl AddAssign for Counts {
    fn add_assign(&mut self, rhs: Counts) {
        self.records += rhs.records;
        self.bytes += rhs.bytes;
    }
}

/// A flushed buffer, ready to be handed to a sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub payload: String,
    pub records: u64,
    /// Estimated size, see [`Buffer`](crate::core::Buffer) for the accounting rule.
    pub bytes: u64,
}

/// Snapshot taken when a buffer is flushed (write side) or a page fetch is
/// issued (read side).
///
/// `index` is dense and strictly increasing per channel or stream instance
/// and is the ordering key for everything downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub index: u64,
    pub record_offset: u64,
    pub records: u64,
    pub bytes: u64,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of executing a [`Request`].
///
/// `successful.records + failed.records` always equals the request's
/// `records`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub index: u64,
    /// Milliseconds spent in the external call.
    pub took: u64,
    pub timestamp: DateTime<Utc>,
    pub successful: Counts,
    pub failed: Counts,
    /// Part of `successful` that arrived in a nominally failed reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovered: Option<Counts>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl Response {
    pub fn failure(request: &Request, took: u64, error: impl Into<String>) -> Self {
        Self {
            index: request.index,
            took,
            timestamp: Utc::now(),
            successful: Counts::default(),
            failed: Counts::new(request.records, request.bytes),
            recovered: None,
            errors: vec![error.into()],
        }
    }

    pub fn is_success(&self) -> bool { self.failed.records == 0 && self.errors.is_empty() }
}

/// What a [`Sink`](crate::effects::Sink) reports for one write call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Number of remote calls made; `None` means one.
    pub writes: Option<u64>,
    pub successful: Counts,
    pub failed: Counts,
    pub recovered: Option<Counts>,
    pub errors: Vec<String>,
}

impl WriteOutcome {
    pub fn accepted(dispatch: &Dispatch) -> Self {
        Self {
            successful: Counts::new(dispatch.records, dispatch.bytes),
            ..Self::default()
        }
    }

    pub fn rejected(dispatch: &Dispatch, error: impl Into<String>) -> Self {
        Self {
            failed: Counts::new(dispatch.records, dispatch.bytes),
            errors: vec![error.into()],
            ..Self::default()
        }
    }
}
