//! Paged reads and rate-limited batched writes against remote record services.
//!
//! # Architecture
//!
//! This crate follows the three-layer pattern:
//! - [`data`] - Immutable events, options and counters
//! - [`core`] - Pure batching, pacing and timing decisions
//! - [`effects`] - Sinks, sources, channels and queues that do the I/O
//!
//! # Key Features
//!
//! - **Ordered Prefetch**: [`BufferedReadStream`] fetches pages in parallel and
//!   serves records in source order
//! - **Batched Writes**: [`WriteChannel`] packs records into size-capped payloads
//!   and reports a `request`/`response` pair for every write
//! - **Pacing**: write channels hold dispatches back to stay within write,
//!   record and byte rates; [`RateLimitingQueue`] spaces arbitrary calls
//! - **Observable**: every channel emits structured [`Event`]s, including
//!   `pulse` snapshots of status, timings and sink counters
//!
//! # Example
//!
//! ```no_run
//! use ferry_stream::data::{Event, WriteOptions};
//! use ferry_stream::effects::{
//!     ApiSink, ApiSinkOptions, ApiSource, ApiSourceOptions, BufferedReadStream, ReqwestClient,
//!     Watermark, WriteChannel,
//! };
//!
//! # async fn example() -> ferry_stream::Result<()> {
//! let source = ApiSource::new(
//!     ReqwestClient::new(),
//!     ApiSourceOptions::new("https://shop.example/wp-json/wc/v3/products"),
//! );
//! let sink = ApiSink::new(
//!     ReqwestClient::new(),
//!     ApiSinkOptions::new("https://index.example/bulk"),
//! );
//!
//! let mut products = BufferedReadStream::new(source, Watermark::default()).open().await?;
//! let (mut upload, _events) = WriteChannel::new("upload", sink, WriteOptions::default());
//!
//! upload.push(Event::start("shop")).await?;
//! while let Some(product) = products.read().await? {
//!     let id = product["id"].to_string();
//!     upload.push(Event::data("shop", id, "products", product)).await?;
//! }
//! upload.push(Event::end("shop")).await?;
//! let totals = upload.flush().await?;
//! println!("{} written, {} failed", totals.successful.records, totals.failed.records);
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod data;
pub mod effects;
mod error;

pub use self::core::{Buffer, JsonBuffer, ServiceSpeed, SinkGate, TimeTracker};
pub use data::{Event, Payload, ReadOptions, WriteOptions};
pub use effects::{
    BufferedReadStream, HttpClient, MapChannel, RateLimitingQueue, Sink, Source, Strategy,
    TaskQueue, WriteChannel,
};

#[cfg(feature = "reqwest")]
pub use effects::ReqwestClient;

pub use error::{ApiError, Result, StreamError};
