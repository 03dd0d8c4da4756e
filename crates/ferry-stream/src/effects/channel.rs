//! Event pipeline plumbing shared by every channel.

use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::core::TimeTracker;
use crate::data::{ChannelMeta, ChannelStatus, Event, LogLevel, Payload, Pulse, SinkTotals};
use crate::error::{Result, StreamError};

/// Receiving end of a channel's output.
pub type EventReceiver = mpsc::UnboundedReceiver<Event>;

/// Turns a channel's output into a [`Stream`] another channel can consume.
pub fn into_stream(mut receiver: EventReceiver) -> impl Stream<Item = Event> + Send {
    futures_util::stream::poll_fn(move |cx| receiver.poll_recv(cx))
}

/// Sends events stamped with one channel's name and depth.
///
/// Cheap to clone; spawned write tasks carry their own copy.
#[derive(Debug, Clone)]
pub struct Emitter {
    channel: Arc<str>,
    depth: usize,
    sender: mpsc::UnboundedSender<Event>,
}

impl Emitter {
    pub fn channel(&self) -> &str { &self.channel }

    pub fn depth(&self) -> usize { self.depth }

    pub fn emit(&self, payload: Payload) {
        let event = Event::new(self.channel.as_ref(), payload).with_depth(self.depth);
        self.forward(event);
    }

    /// Passes an event on unchanged.
    pub fn forward(&self, event: Event) {
        // a dropped receiver means nobody is listening
        let _ = self.sender.send(event);
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(Payload::Log {
            level,
            message: message.into(),
        });
    }
}

/// What [`Channel::accept`] made of an upstream event.
#[derive(Debug, Clone, PartialEq)]
pub enum Accepted {
    /// Upstream `start`; this channel's own `start` has been emitted.
    Started,
    /// A record for the specialized channel to handle.
    Data {
        id: String,
        domain: String,
        record: Value,
    },
    /// Passed downstream unchanged.
    Forwarded,
    /// Upstream `end`; held back until this channel finishes.
    Ended,
}

/// Protocol state shared by every channel kind.
///
/// A channel consumes an upstream event sequence of the form
/// `start (data | nested events)* end` and produces its own. On upstream
/// `start` it emits a `start` one level deeper whose options are the
/// upstream options plus its own entry; nested events are forwarded
/// unchanged; on [`finish`](Channel::finish) it emits an `end` whose results
/// are the upstream results plus its own.
///
/// Data before `start`, a second `start`, or finishing without `start` are
/// errors. A second upstream `end`, or none at all, only produce a warning
/// log event.
#[derive(Debug)]
pub struct Channel {
    options: Value,
    status: ChannelStatus,
    started: bool,
    ended: bool,
    upstream_results: Vec<ChannelMeta>,
    time: TimeTracker,
    emitter: Emitter,
}

impl Channel {
    /// `options` is this channel's entry in the `start` event.
    pub fn new(name: impl Into<String>, options: Value) -> (Self, EventReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let name: String = name.into();
        let channel = Self {
            options,
            status: ChannelStatus::Waiting,
            started: false,
            ended: false,
            upstream_results: Vec::new(),
            time: TimeTracker::new(Instant::now()),
            emitter: Emitter {
                channel: Arc::from(name),
                depth: 0,
                sender,
            },
        };
        (channel, receiver)
    }

    pub fn name(&self) -> &str { self.emitter.channel() }

    /// Depth of this channel's own events: one more than its upstream.
    pub fn depth(&self) -> usize { self.emitter.depth }

    pub fn status(&self) -> ChannelStatus { self.status }

    pub fn is_started(&self) -> bool { self.started }

    pub fn emitter(&self) -> &Emitter { &self.emitter }

    pub fn time(&self) -> &TimeTracker { &self.time }

    /// Applies one upstream event to the protocol state.
    ///
    /// # Errors
    ///
    /// - [`StreamError::DuplicateStart`] for a second `start`
    /// - [`StreamError::BeforeStart`] for data or `end` before `start`
    /// - [`StreamError::Finished`] for any event after [`finish`](Channel::finish)
    pub fn accept(&mut self, event: Event) -> Result<Accepted> {
        let kind = event.kind();
        if self.status == ChannelStatus::Finished {
            return Err(StreamError::Finished {
                channel: self.name().to_string(),
                kind,
            });
        }
        if !self.started && !event.is_control() {
            return Err(StreamError::BeforeStart {
                channel: self.name().to_string(),
                kind,
            });
        }

        match event.payload {
            Payload::Start { mut options } => {
                if self.started {
                    return Err(StreamError::DuplicateStart {
                        channel: self.name().to_string(),
                    });
                }
                self.started = true;
                self.emitter.depth = event.depth + 1;
                self.set_status(ChannelStatus::Running)?;
                self.time.start(Instant::now());

                options.push(ChannelMeta {
                    channel: self.name().to_string(),
                    values: self.options.clone(),
                });
                self.emitter.emit(Payload::Start { options });
                Ok(Accepted::Started)
            }
            Payload::Data { id, domain, record } => Ok(Accepted::Data { id, domain, record }),
            Payload::End { results } => {
                if self.ended {
                    tracing::warn!(channel = self.name(), "duplicate end event");
                    self.emitter
                        .log(LogLevel::Warning, "received a second end event; ignored");
                    return Ok(Accepted::Forwarded);
                }
                self.ended = true;
                self.upstream_results = results;
                Ok(Accepted::Ended)
            }
            payload => {
                let event = Event { payload, ..event };
                self.emitter.forward(event);
                Ok(Accepted::Forwarded)
            }
        }
    }

    /// Emits this channel's `end`, carrying `results` as its own entry.
    ///
    /// # Errors
    ///
    /// [`StreamError::MissingStart`] if no upstream `start` was seen.
    pub fn finish(&mut self, results: Value) -> Result<()> {
        if !self.started {
            return Err(StreamError::MissingStart {
                channel: self.name().to_string(),
            });
        }
        if self.status == ChannelStatus::Paused {
            self.resume()?;
        }
        if !self.ended {
            tracing::warn!(channel = self.name(), "finished without upstream end");
            self.emitter
                .log(LogLevel::Warning, "upstream ended without an end event");
        }

        self.set_status(ChannelStatus::Finished)?;
        self.time.finish(Instant::now());

        let mut results_out = std::mem::take(&mut self.upstream_results);
        results_out.push(ChannelMeta {
            channel: self.name().to_string(),
            values: results,
        });
        self.emitter.emit(Payload::End {
            results: results_out,
        });
        Ok(())
    }

    /// Marks the channel paused until `until`.
    pub fn pause(&mut self, until: Instant) -> Result<()> {
        self.set_status(ChannelStatus::Paused)?;
        self.time.pause(Instant::now(), Some(until))
    }

    pub fn resume(&mut self) -> Result<()> {
        self.set_status(ChannelStatus::Running)?;
        self.time.resume(Instant::now())
    }

    /// Current status, timings and the given sink counters.
    pub fn pulse(&self, sink: SinkTotals) -> Pulse {
        Pulse {
            status: self.status,
            time: self.time.snapshot(Instant::now()),
            sink,
        }
    }

    fn set_status(&mut self, to: ChannelStatus) -> Result<()> {
        if !self.status.can_transition(to) {
            return Err(StreamError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}

/// Rewrites every record with a function and passes everything else on.
///
/// # Examples
///
/// ```
/// use ferry_stream::data::Event;
/// use ferry_stream::effects::MapChannel;
/// use serde_json::json;
///
/// let (mut upgrade, mut output) = MapChannel::new("upgrade", |mut record: serde_json::Value| {
///     record["version"] = json!(2);
///     record
/// });
///
/// upgrade.push(Event::start("source")).unwrap();
/// upgrade.push(Event::data("source", "1", "catalog", json!({"sku": "A-1"}))).unwrap();
/// upgrade.push(Event::end("source")).unwrap();
/// upgrade.flush().unwrap();
///
/// let start = output.try_recv().unwrap();
/// assert_eq!(start.depth, 1);
/// ```
#[derive(Debug)]
pub struct MapChannel<F> {
    channel: Channel,
    map: F,
    mapped: u64,
}

impl<F> MapChannel<F>
where
    F: FnMut(Value) -> Value,
{
    pub fn new(name: impl Into<String>, map: F) -> (Self, EventReceiver) {
        let (channel, receiver) = Channel::new(name, Value::Null);
        let map_channel = Self {
            channel,
            map,
            mapped: 0,
        };
        (map_channel, receiver)
    }

    pub fn channel(&self) -> &Channel { &self.channel }

    pub fn push(&mut self, event: Event) -> Result<()> {
        if let Accepted::Data { id, domain, record } = self.channel.accept(event)? {
            let record = (self.map)(record);
            self.mapped += 1;
            self.channel
                .emitter()
                .emit(Payload::Data { id, domain, record });
        }
        Ok(())
    }

    pub fn flush(mut self) -> Result<u64> {
        self.channel
            .finish(serde_json::json!({ "records": self.mapped }))?;
        Ok(self.mapped)
    }

    /// Consumes `input` to the end, then flushes.
    pub async fn run<I>(mut self, input: I) -> Result<u64>
    where
        I: Stream<Item = Event>,
    {
        futures_util::pin_mut!(input);
        while let Some(event) = input.next().await {
            self.push(event)?;
        }
        self.flush()
    }
}
