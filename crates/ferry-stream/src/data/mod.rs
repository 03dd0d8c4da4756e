//! Immutable data types shared by the read and write pipelines.
//!
//! Nothing in this module performs I/O or holds a clock; values are built by
//! the [`core`](crate::core) and [`effects`](crate::effects) layers and passed
//! around by value.

pub mod event;
pub mod options;
pub mod request;
pub mod state;

pub use event::{ChannelMeta, Event, EventKind, LogLevel, Payload};
pub use options::{BufferOptions, RateOptions, ReadOptions, WriteOptions};
pub use request::{Counts, Dispatch, Request, Response, WriteOutcome};
pub use state::{
    ChannelStatus, FetchFailure, LoadCounts, Pulse, ReadState, RecordCounts, SinkTotals,
    TimeSnapshot,
};
