//! The write boundary: sinks, and the bookkeeping wrapper around them.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::core::{ServiceSpeed, SinkSnapshot};
use crate::data::{Counts, Dispatch, Request, Response, SinkTotals, WriteOutcome};
use crate::error::{Result, StreamError};

/// External write collaborator.
///
/// `write` is the only place a remote call happens. Errors are allowed here;
/// [`WriteChannelSink`] turns them into failed responses so a failed write
/// still closes out its request.
///
/// # Implementations
///
/// - [`ApiSink`](crate::effects::ApiSink): POSTs payloads over HTTP
/// - [`BpsSink`]: measures service speed of another sink
/// - [`NullSink`]: accepts everything
pub trait Sink: Send + Sync + 'static {
    type Error: std::error::Error + Send + 'static;

    fn write(
        &self,
        dispatch: &Dispatch,
    ) -> impl Future<Output = std::result::Result<WriteOutcome, Self::Error>> + Send;

    /// Service speed observed so far, for sinks that measure it.
    fn observed(&self) -> Option<ServiceSpeed> { None }
}

/// Accepts every dispatch without doing anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl Sink for NullSink {
    type Error = Infallible;

    async fn write(&self, dispatch: &Dispatch) -> std::result::Result<WriteOutcome, Infallible> {
        Ok(WriteOutcome::accepted(dispatch))
    }
}

/// Wraps a sink and records how fast it processes writes.
#[derive(Debug)]
pub struct BpsSink<S> {
    inner: S,
    speed: Arc<Mutex<ServiceSpeed>>,
}

impl<S: Sink> BpsSink<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            speed: Arc::new(Mutex::new(ServiceSpeed::new())),
        }
    }

    /// Shared handle to the estimator, for progress displays.
    pub fn speed(&self) -> Arc<Mutex<ServiceSpeed>> { Arc::clone(&self.speed) }

    pub fn inner(&self) -> &S { &self.inner }
}

impl<S: Sink> Sink for BpsSink<S> {
    type Error = S::Error;

    async fn write(&self, dispatch: &Dispatch) -> std::result::Result<WriteOutcome, S::Error> {
        let started = Instant::now();
        let outcome = self.inner.write(dispatch).await?;
        let processed = outcome.successful + outcome.failed;
        self.speed.lock().record(started.elapsed(), processed);
        Ok(outcome)
    }

    fn observed(&self) -> Option<ServiceSpeed> { Some(self.speed.lock().clone()) }
}

#[derive(Debug, Default)]
struct SinkState {
    totals: SinkTotals,
    pending: BTreeMap<u64, Request>,
    first_write_at: Option<Instant>,
    destroyed: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<SinkState>,
    settled: Notify,
}

/// Owns a [`Sink`] for one write channel and keeps its books.
///
/// Every write goes through [`begin`](WriteChannelSink::begin), which
/// registers the request as pending under its index and counts it toward
/// pacing immediately. The returned [`PendingWrite`] settles the request when
/// dropped, whether or not the call completed.
#[derive(Debug)]
pub struct WriteChannelSink<S> {
    sink: Arc<S>,
    shared: Arc<Shared>,
}

impl<S> Clone for WriteChannelSink<S> {
    fn clone(&self) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: Sink> WriteChannelSink<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink: Arc::new(sink),
            shared: Arc::new(Shared::default()),
        }
    }

    pub fn sink(&self) -> &S { &self.sink }

    pub fn begin(&self, request: Request) -> PendingWrite<S> {
        {
            let mut state = self.shared.state.lock();
            state.first_write_at.get_or_insert_with(Instant::now);
            state.totals.writes += 1;
            state.totals.dispatched += Counts::new(request.records, request.bytes);
            let previous = state.pending.insert(request.index, request.clone());
            debug_assert!(previous.is_none(), "request {} dispatched twice", request.index);
            state.totals.pending = state.pending.len();
        }

        PendingWrite {
            sink: Arc::clone(&self.sink),
            shared: Arc::clone(&self.shared),
            request,
            response: None,
            extra_writes: 0,
        }
    }

    pub fn totals(&self) -> SinkTotals { self.shared.state.lock().totals.clone() }

    /// Requests dispatched and not yet settled, in index order.
    pub fn pending(&self) -> Vec<Request> {
        self.shared.state.lock().pending.values().cloned().collect()
    }

    pub fn snapshot(&self, min_samples: u64) -> SinkSnapshot {
        let observed = self
            .sink
            .observed()
            .and_then(|speed| speed.throughput(min_samples));
        let state = self.shared.state.lock();
        SinkSnapshot {
            totals: state.totals.clone(),
            first_write_at: state.first_write_at,
            observed,
        }
    }

    /// Resolves once nothing is pending.
    ///
    /// # Errors
    ///
    /// [`StreamError::Destroyed`] if [`destroy`](WriteChannelSink::destroy)
    /// was called before or while waiting.
    pub async fn finished(&self) -> Result<()> {
        loop {
            let settled = self.shared.settled.notified();
            {
                let state = self.shared.state.lock();
                if state.destroyed {
                    return Err(StreamError::Destroyed);
                }
                if state.pending.is_empty() {
                    return Ok(());
                }
            }
            settled.await;
        }
    }

    /// Rejects every current and future [`finished`](WriteChannelSink::finished) waiter.
    pub fn destroy(&self) {
        self.shared.state.lock().destroyed = true;
        self.shared.settled.notify_waiters();
    }
}

/// One dispatched write. Settles its request on drop.
#[derive(Debug)]
pub struct PendingWrite<S> {
    sink: Arc<S>,
    shared: Arc<Shared>,
    request: Request,
    response: Option<Response>,
    extra_writes: u64,
}

impl<S: Sink> PendingWrite<S> {
    pub fn request(&self) -> &Request { &self.request }

    /// Performs the call and returns its response. Never fails: sink errors
    /// become a response with every record counted as failed.
    pub async fn execute(&mut self, dispatch: Dispatch) -> Response {
        let started = Instant::now();
        let result = self.sink.write(&dispatch).await;
        let took = started.elapsed();

        let response = match result {
            Ok(outcome) => {
                self.extra_writes = outcome.writes.unwrap_or(1).saturating_sub(1);
                conserve(&self.request, took, outcome)
            }
            Err(err) => {
                tracing::warn!(index = self.request.index, error = %err, "write failed");
                Response::failure(&self.request, millis(took), err.to_string())
            }
        };

        self.response = Some(response.clone());
        response
    }
}

impl<S> Drop for PendingWrite<S> {
    fn drop(&mut self) {
        let response = self.response.take().unwrap_or_else(|| {
            Response::failure(&self.request, 0, "write abandoned before completion")
        });

        let mut state = self.shared.state.lock();
        state.pending.remove(&self.request.index);
        state.totals.pending = state.pending.len();
        state.totals.writes += self.extra_writes;
        state.totals.successful += response.successful;
        state.totals.failed += response.failed;
        if let Some(recovered) = response.recovered {
            state.totals.recovered += recovered;
        }
        drop(state);

        self.shared.settled.notify_waiters();
    }
}

/// Builds a response whose record counts add up to the request's.
fn conserve(request: &Request, took: Duration, outcome: WriteOutcome) -> Response {
    let mut successful = outcome.successful;
    let mut failed = outcome.failed;

    successful.records = successful.records.min(request.records);
    failed.records = request.records - successful.records;

    if successful.bytes == 0 && failed.bytes == 0 {
        if failed.records == 0 {
            successful.bytes = request.bytes;
        } else if successful.records == 0 {
            failed.bytes = request.bytes;
        }
    }

    Response {
        index: request.index,
        took: millis(took),
        timestamp: Utc::now(),
        successful,
        failed,
        recovered: outcome.recovered,
        errors: outcome.errors,
    }
}

fn millis(duration: Duration) -> u64 { duration.as_millis().try_into().unwrap_or(u64::MAX) }
