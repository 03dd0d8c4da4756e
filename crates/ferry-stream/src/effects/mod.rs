//! I/O at the edges: sinks, sources, channels and the queues that order and
//! pace them.
//!
//! Everything here talks to a runtime or a remote service. The decisions
//! (batching, pacing, timing) live in [`core`](crate::core); this layer only
//! carries them out.

mod api;
mod channel;
mod http;
mod rate_queue;
mod read_stream;
mod sink;
mod task_queue;
mod write_channel;

pub use api::{ApiSink, ApiSinkOptions, ApiSource, ApiSourceOptions};
pub use channel::{Accepted, Channel, Emitter, EventReceiver, MapChannel, into_stream};
pub use http::{HttpClient, HttpResponse};
pub use rate_queue::RateLimitingQueue;
pub use read_stream::{BufferedReadStream, FetchRequest, Page, Source, Strategy, Until, Watermark};
pub use sink::{BpsSink, NullSink, PendingWrite, Sink, WriteChannelSink};
pub use task_queue::TaskQueue;
pub use write_channel::WriteChannel;

#[cfg(feature = "reqwest")]
pub use http::ReqwestClient;
