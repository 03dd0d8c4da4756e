//! The write side: batch records, pace dispatches, and report every write.

use std::sync::Arc;

use chrono::Utc;
use futures_util::{Stream, StreamExt};
use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::core::{JsonBuffer, SinkGate};
use crate::data::{
    ChannelStatus, Dispatch, Event, Payload, Pulse, Request, SinkTotals, WriteOptions,
};
use crate::effects::channel::{Accepted, Channel, EventReceiver};
use crate::effects::sink::{Sink, WriteChannelSink};
use crate::error::{Result, StreamError};

/// Buffers upstream records into payloads and writes them to a [`Sink`].
///
/// For every payload the channel emits a `request` event, hands the payload
/// to the sink on a spawned task, and emits the matching `response` event
/// once the write settles. At most `max_pending` writes run at once. When
/// rate targets are set the channel pauses before a dispatch that would
/// overshoot them, emitting a `pulse` so observers see the pause.
///
/// Must be driven from inside a tokio runtime.
///
/// # Examples
///
/// ```
/// use ferry_stream::data::{BufferOptions, Event, WriteOptions};
/// use ferry_stream::effects::{NullSink, WriteChannel};
/// use serde_json::json;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> ferry_stream::Result<()> {
/// let options =
///     WriteOptions::default().buffer(BufferOptions::default().records_per_request(Some(2)));
/// let (mut upload, _events) = WriteChannel::new("upload", NullSink, options);
///
/// upload.push(Event::start("source")).await?;
/// for id in 0..5 {
///     upload.push(Event::data("source", id.to_string(), "catalog", json!({"id": id}))).await?;
/// }
/// upload.push(Event::end("source")).await?;
///
/// let totals = upload.flush().await?;
/// assert_eq!(totals.writes, 3);
/// assert_eq!(totals.successful.records, 5);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct WriteChannel<S> {
    channel: Channel,
    buffer: JsonBuffer,
    sink: WriteChannelSink<S>,
    gate: SinkGate,
    admission: Arc<Semaphore>,
    options: WriteOptions,
    next_index: u64,
    next_offset: u64,
}

impl<S: Sink> WriteChannel<S> {
    pub fn new(name: impl Into<String>, sink: S, options: WriteOptions) -> (Self, EventReceiver) {
        let meta = serde_json::to_value(&options).unwrap_or_default();
        let (channel, receiver) = Channel::new(name, meta);
        let write_channel = Self {
            channel,
            buffer: JsonBuffer::new(options.buffer.clone()),
            sink: WriteChannelSink::new(sink),
            gate: SinkGate::new(&options.rate),
            admission: Arc::new(Semaphore::new(options.max_pending.max(1))),
            options,
            next_index: 0,
            next_offset: 0,
        };
        (write_channel, receiver)
    }

    pub fn name(&self) -> &str { self.channel.name() }

    pub fn status(&self) -> ChannelStatus { self.channel.status() }

    pub fn options(&self) -> &WriteOptions { &self.options }

    /// Handle to the sink bookkeeping, shared with in-flight writes.
    pub fn sink(&self) -> &WriteChannelSink<S> { &self.sink }

    /// Requests dispatched and not yet settled.
    pub fn pending(&self) -> Vec<Request> { self.sink.pending() }

    /// Status, timings and sink counters right now.
    pub fn pulse(&self) -> Pulse { self.channel.pulse(self.sink.totals()) }

    /// Emits [`pulse`](WriteChannel::pulse) as an event.
    pub fn emit_pulse(&self) { self.channel.emitter().emit(Payload::Pulse(self.pulse())); }

    /// Feeds one upstream event.
    ///
    /// Waits when `max_pending` writes are already in flight or the rate gate
    /// is closed.
    ///
    /// # Errors
    ///
    /// Protocol violations from [`Channel::accept`], or
    /// [`StreamError::Serialize`] if a record cannot be encoded.
    pub async fn push(&mut self, event: Event) -> Result<()> {
        if let Accepted::Data { record, .. } = self.channel.accept(event)? {
            for dispatch in self.buffer.push(&record)? {
                self.dispatch(dispatch).await?;
            }
        }
        Ok(())
    }

    /// Writes what is still buffered, waits for every write to settle, and
    /// emits `end`. Returns the final sink counters.
    ///
    /// # Errors
    ///
    /// - [`StreamError::MissingStart`] if no upstream `start` was seen
    /// - [`StreamError::Destroyed`] if the sink was destroyed meanwhile
    pub async fn flush(mut self) -> Result<SinkTotals> {
        if !self.channel.is_started() {
            return Err(StreamError::MissingStart {
                channel: self.name().to_string(),
            });
        }
        if let Some(dispatch) = self.buffer.flush() {
            self.dispatch(dispatch).await?;
        }
        self.sink.finished().await?;

        let totals = self.sink.totals();
        self.channel.finish(serde_json::to_value(&totals)?)?;
        tracing::debug!(
            channel = self.name(),
            writes = totals.writes,
            successful = totals.successful.records,
            failed = totals.failed.records,
            "write channel finished"
        );
        Ok(totals)
    }

    /// Abandons the channel: a pending or later [`flush`](WriteChannel::flush)
    /// fails with [`StreamError::Destroyed`].
    pub fn destroy(&self) { self.sink.destroy(); }

    /// Consumes `input` to the end, then flushes.
    pub async fn run<I>(mut self, input: I) -> Result<SinkTotals>
    where
        I: Stream<Item = Event>,
    {
        futures_util::pin_mut!(input);
        while let Some(event) = input.next().await {
            self.push(event).await?;
        }
        self.flush().await
    }

    async fn dispatch(&mut self, dispatch: Dispatch) -> Result<()> {
        let permit = Arc::clone(&self.admission)
            .acquire_owned()
            .await
            .map_err(|_| StreamError::IllegalState("admission semaphore closed"))?;
        self.wait_for_gate().await?;

        let request = Request {
            index: self.next_index,
            record_offset: self.next_offset,
            records: dispatch.records,
            bytes: dispatch.bytes,
            timestamp: Utc::now(),
        };
        self.next_index += 1;
        self.next_offset += dispatch.records;

        tracing::debug!(
            channel = self.name(),
            index = request.index,
            records = request.records,
            bytes = request.bytes,
            "dispatching"
        );
        let emitter = self.channel.emitter().clone();
        emitter.emit(Payload::Request(request.clone()));
        let mut pending = self.sink.begin(request);

        tokio::spawn(async move {
            let response = pending.execute(dispatch).await;
            emitter.emit(Payload::Response(response));
            // settle before freeing the slot
            drop(pending);
            drop(permit);
        });
        Ok(())
    }

    async fn wait_for_gate(&mut self) -> Result<()> {
        if self.gate.is_open() {
            return Ok(());
        }

        let now = Instant::now();
        let snapshot = self.sink.snapshot(self.options.rate.adaptive_samples);
        let blocked = self.gate.blocked_time(&snapshot, now);
        if blocked.is_zero() {
            return Ok(());
        }

        tracing::debug!(
            channel = self.name(),
            blocked_ms = blocked.as_millis() as u64,
            "rate target reached; pausing"
        );
        self.channel.pause(now + blocked)?;
        self.emit_pulse();

        tokio::time::sleep_until(now + blocked).await;

        self.channel.resume()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{BufferOptions, EventKind, RateOptions, WriteOutcome};
    use crate::effects::NullSink;
    use serde_json::json;
    use std::convert::Infallible;

    fn data(id: u64) -> Event {
        Event::data("source", id.to_string(), "catalog", json!({"id": id}))
    }

    fn options(records: u64) -> WriteOptions {
        WriteOptions::default().buffer(BufferOptions::default().records_per_request(Some(records)))
    }

    fn drain(receiver: &mut EventReceiver) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_records_are_batched() {
        let (mut upload, mut output) = WriteChannel::new("upload", NullSink, options(4));
        upload.push(Event::start("source")).await.unwrap();
        for id in 0..10 {
            upload.push(data(id)).await.unwrap();
        }
        upload.push(Event::end("source")).await.unwrap();
        let totals = upload.flush().await.unwrap();

        assert_eq!(totals.writes, 3);
        assert_eq!(totals.successful.records, 10);
        assert_eq!(totals.pending, 0);

        let sizes: Vec<u64> = drain(&mut output)
            .into_iter()
            .filter_map(|event| match event.payload {
                Payload::Request(request) => Some(request.records),
                _ => None,
            })
            .collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[tokio::test]
    async fn test_flush_without_start_fails() {
        let (upload, _output) = WriteChannel::new("upload", NullSink, options(4));
        assert!(matches!(
            upload.flush().await,
            Err(StreamError::MissingStart { .. })
        ));
    }

    #[tokio::test]
    async fn test_every_request_gets_a_response() {
        let (mut upload, mut output) = WriteChannel::new("upload", NullSink, options(1));
        upload.push(Event::start("source")).await.unwrap();
        for id in 0..5 {
            upload.push(data(id)).await.unwrap();
        }
        upload.push(Event::end("source")).await.unwrap();
        upload.flush().await.unwrap();

        let events = drain(&mut output);
        let requests = events.iter().filter(|e| e.kind() == EventKind::Request).count();
        let responses = events.iter().filter(|e| e.kind() == EventKind::Response).count();
        assert_eq!(requests, 5);
        assert_eq!(responses, 5);
        assert_eq!(events.last().map(Event::kind), Some(EventKind::End));
    }

    /// Never completes a write.
    struct Stalled;

    impl Sink for Stalled {
        type Error = Infallible;

        async fn write(
            &self,
            _dispatch: &Dispatch,
        ) -> std::result::Result<WriteOutcome, Infallible> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_max_pending_applies_backpressure() {
        let options = options(1).max_pending(2);
        let (mut upload, _output) = WriteChannel::new("upload", Stalled, options);
        upload.push(Event::start("source")).await.unwrap();
        upload.push(data(0)).await.unwrap();
        upload.push(data(1)).await.unwrap();

        let third = upload.push(data(2));
        tokio::pin!(third);
        assert!(futures_util::poll!(third.as_mut()).is_pending());
    }

    #[tokio::test]
    async fn test_destroy_fails_flush() {
        let (mut upload, _output) = WriteChannel::new("upload", Stalled, options(1));
        upload.push(Event::start("source")).await.unwrap();
        upload.push(data(0)).await.unwrap();
        upload.destroy();
        assert!(matches!(upload.flush().await, Err(StreamError::Destroyed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_is_visible_in_pulse() {
        let rate = RateOptions::default().writes_per_second(1.0);
        let (mut upload, mut output) = WriteChannel::new("upload", NullSink, options(1).rate(rate));
        upload.push(Event::start("source")).await.unwrap();
        for id in 0..4 {
            upload.push(data(id)).await.unwrap();
        }
        upload.flush().await.unwrap();

        let paused = drain(&mut output).into_iter().any(|event| match event.payload {
            Payload::Pulse(pulse) => pulse.status == ChannelStatus::Paused,
            _ => false,
        });
        assert!(paused);
    }

    #[tokio::test]
    async fn test_pulse_reports_totals() {
        let (mut upload, _output) = WriteChannel::new("upload", NullSink, options(2));
        assert_eq!(upload.pulse().status, ChannelStatus::Waiting);
        upload.push(Event::start("source")).await.unwrap();
        upload.push(data(0)).await.unwrap();
        upload.push(data(1)).await.unwrap();

        let pulse = upload.pulse();
        assert_eq!(pulse.status, ChannelStatus::Running);
        assert_eq!(pulse.sink.dispatched.records, 2);
        assert_eq!(pulse.sink.writes, 1);
    }
}
