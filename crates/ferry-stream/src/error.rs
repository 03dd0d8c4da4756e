//! Error types for ferry-stream.
//!
//! Only structural misuse ends up here. Failed remote writes and fetches are
//! reported as data (`Response`, `FetchFailure`), never as `StreamError`.

use thiserror::Error;

use crate::data::{ChannelStatus, EventKind};

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("channel `{channel}` was flushed before any start event")]
    MissingStart { channel: String },

    #[error("channel `{channel}` received a {kind} event before start")]
    BeforeStart { channel: String, kind: EventKind },

    #[error("channel `{channel}` received a second start event")]
    DuplicateStart { channel: String },

    #[error("channel `{channel}` is finished and cannot accept a {kind} event")]
    Finished { channel: String, kind: EventKind },

    #[error("task {index} was pushed twice")]
    DuplicateTask { index: u64 },

    #[error("illegal status transition from {from} to {to}")]
    InvalidTransition { from: ChannelStatus, to: ChannelStatus },

    #[error("illegal state: {0}")]
    IllegalState(&'static str),

    #[error("sink was destroyed with writes still pending")]
    Destroyed,

    #[error("source initialization failed: {0}")]
    SourceInit(String),

    #[error("record serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StreamError>;

/// Failure talking to a paginated HTTP source.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StreamError::BeforeStart {
            channel: "upload".into(),
            kind: EventKind::Data,
        };
        assert_eq!(err.to_string(), "channel `upload` received a data event before start");

        let err = StreamError::InvalidTransition {
            from: ChannelStatus::Finished,
            to: ChannelStatus::Running,
        };
        assert!(err.to_string().contains("finished to running"));

        let err = StreamError::DuplicateTask { index: 4 };
        assert!(err.to_string().contains("task 4"));

        let err = ApiError::Status {
            status: 503,
            body: "busy".into(),
        };
        assert_eq!(err.to_string(), "HTTP 503: busy");
    }
}
