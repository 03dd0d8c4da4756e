//! Pure state and computation for the pipelines.
//!
//! Everything here is synchronous and takes the current instant as an
//! argument where time matters, so it can be driven by a paused test clock.

mod buffer;
mod gate;
mod speed;
mod time;

pub use buffer::{Buffer, JsonBuffer, estimate_bytes};
pub(crate) use gate::MAX_BLOCK;
pub use gate::{SinkGate, SinkSnapshot};
pub use speed::{ServiceSpeed, Throughput};
pub use time::TimeTracker;
