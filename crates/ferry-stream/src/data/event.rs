use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::request::{Request, Response};
use super::state::Pulse;

/// A single message flowing through a channel pipeline.
///
/// Every event carries a fixed envelope (`channel`, `depth`, `timestamp`)
/// and a typed [`Payload`]. Serialized, the payload's fields are flattened
/// into the envelope next to a `type` tag, so a renderer sees objects such as
/// `{"type":"request","channel":"upload","index":0,...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Name of the channel that emitted the event.
    pub channel: String,

    /// Nesting depth of the emitting channel; producers emit at depth 0.
    #[serde(default)]
    pub depth: usize,

    pub timestamp: DateTime<Utc>,

    #[serde(flatten)]
    pub payload: Payload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Payload {
    /// Opens a stream. `options` grows by one entry per channel passed.
    Start {
        #[serde(default)]
        options: Vec<ChannelMeta>,
    },

    /// One record. `id` and `domain` are required by every consumer.
    Data {
        id: String,
        domain: String,
        #[serde(default)]
        record: Value,
    },

    Request(Request),

    Response(Response),

    /// Closes a stream. `results` grows by one entry per channel passed.
    End {
        #[serde(default)]
        results: Vec<ChannelMeta>,
    },

    Log {
        level: LogLevel,
        message: String,
    },

    Pulse(Pulse),
}

/// Per-channel metadata appended to `start` and `end` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMeta {
    pub channel: String,
    pub values: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// Payload discriminant, for matching and messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Start,
    Data,
    Request,
    Response,
    End,
    Log,
    Pulse,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Start => "start",
            EventKind::Data => "data",
            EventKind::Request => "request",
            EventKind::Response => "response",
            EventKind::End => "end",
            EventKind::Log => "log",
            EventKind::Pulse => "pulse",
        };
        f.write_str(name)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        };
        f.write_str(name)
    }
}

impl Payload {
    pub fn kind(&self) -> EventKind {
        match self {
            Payload::Start { .. } => EventKind::Start,
            Payload::Data { .. } => EventKind::Data,
            Payload::Request(_) => EventKind::Request,
            Payload::Response(_) => EventKind::Response,
            Payload::End { .. } => EventKind::End,
            Payload::Log { .. } => EventKind::Log,
            Payload::Pulse(_) => EventKind::Pulse,
        }
    }
}

impl Event {
    pub fn new(channel: impl Into<String>, payload: Payload) -> Self {
        Self {
            channel: channel.into(),
            depth: 0,
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn start(channel: impl Into<String>) -> Self {
        Self::new(channel, Payload::Start { options: Vec::new() })
    }

    pub fn end(channel: impl Into<String>) -> Self {
        Self::new(channel, Payload::End { results: Vec::new() })
    }

    pub fn data(
        channel: impl Into<String>,
        id: impl Into<String>,
        domain: impl Into<String>,
        record: Value,
    ) -> Self {
        Self::new(
            channel,
            Payload::Data {
                id: id.into(),
                domain: domain.into(),
                record,
            },
        )
    }

    pub fn log(channel: impl Into<String>, level: LogLevel, message: impl Into<String>) -> Self {
        Self::new(
            channel,
            Payload::Log {
                level,
                message: message.into(),
            },
        )
    }

    #[must_use]
    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    pub fn kind(&self) -> EventKind { self.payload.kind() }

    /// Control events may arrive before `start` without violating the protocol.
    ///
    /// `end` is not one of them: it closes a sequence that must have started.
    pub fn is_control(&self) -> bool {
        matches!(self.payload, Payload::Start { .. } | Payload::Log { .. } | Payload::Pulse(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_data_event_serializes_flat() {
        let event = Event::data("source", "42", "catalog", json!({"sku": "A-1"})).with_depth(0);
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["type"], "data");
        assert_eq!(value["channel"], "source");
        assert_eq!(value["id"], "42");
        assert_eq!(value["domain"], "catalog");
        assert_eq!(value["record"]["sku"], "A-1");
        assert!(value.get("timestamp").is_some());
    }

    #[test]
    fn test_event_round_trips_through_json() {
        let event = Event::log("upload", LogLevel::Warning, "end never observed").with_depth(2);
        let text = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&text).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_kind_and_control() {
        assert_eq!(Event::start("a").kind(), EventKind::Start);
        assert!(!Event::end("a").is_control());
        assert!(!Event::data("a", "1", "d", Value::Null).is_control());
        assert_eq!(EventKind::Response.to_string(), "response");
    }
}
