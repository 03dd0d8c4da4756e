//! End-to-end behavior of write channels fed from event streams.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use ferry_stream::data::{
    BufferOptions, Dispatch, Event, EventKind, Payload, RateOptions, WriteOptions, WriteOutcome,
};
use ferry_stream::effects::{BpsSink, MapChannel, NullSink, Sink, WriteChannel, into_stream};
use ferry_stream::StreamError;
use futures_util::stream;
use parking_lot::Mutex;
use serde_json::json;
use tokio::time::Instant;

fn source_events(count: u64) -> Vec<Event> {
    let mut events = vec![Event::start("source")];
    events.extend(
        (0..count).map(|id| Event::data("source", id.to_string(), "catalog", json!({"id": id}))),
    );
    events.push(Event::end("source"));
    events
}

fn capped(records: u64) -> WriteOptions {
    WriteOptions::default().buffer(BufferOptions::default().records_per_request(Some(records)))
}

fn collect(mut receiver: ferry_stream::effects::EventReceiver) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

/// Records the instant of every write call.
#[derive(Clone, Default)]
struct Clocked {
    calls: Arc<Mutex<Vec<Instant>>>,
}

impl Sink for Clocked {
    type Error = Infallible;

    async fn write(&self, dispatch: &Dispatch) -> Result<WriteOutcome, Infallible> {
        self.calls.lock().push(Instant::now());
        Ok(WriteOutcome::accepted(dispatch))
    }
}

#[tokio::test]
async fn test_ten_records_in_batches_of_four() {
    let (upload, output) = WriteChannel::new("upload", NullSink, capped(4));
    let totals = upload.run(stream::iter(source_events(10))).await.unwrap();
    assert_eq!(totals.successful.records, 10);

    let events = collect(output);
    assert_eq!(events.first().map(Event::kind), Some(EventKind::Start));
    assert_eq!(events.last().map(Event::kind), Some(EventKind::End));

    let requests: Vec<_> = events
        .iter()
        .filter_map(|event| match &event.payload {
            Payload::Request(request) => Some(request.clone()),
            _ => None,
        })
        .collect();
    let sizes: Vec<u64> = requests.iter().map(|r| r.records).collect();
    let offsets: Vec<u64> = requests.iter().map(|r| r.record_offset).collect();
    let indices: Vec<u64> = requests.iter().map(|r| r.index).collect();
    assert_eq!(sizes, vec![4, 4, 2]);
    assert_eq!(offsets, vec![0, 4, 8]);
    assert_eq!(indices, vec![0, 1, 2]);

    let Payload::End { results } = &events.last().unwrap().payload else {
        panic!("expected end");
    };
    let own = results.iter().find(|meta| meta.channel == "upload").unwrap();
    assert_eq!(own.values["successful"]["records"], 10);
}

#[tokio::test]
async fn test_request_indices_are_contiguous() {
    let (upload, output) = WriteChannel::new("upload", NullSink, capped(3));
    upload.run(stream::iter(source_events(20))).await.unwrap();

    let events = collect(output);
    let mut responses: Vec<u64> = events
        .iter()
        .filter_map(|event| match &event.payload {
            Payload::Response(response) => Some(response.index),
            _ => None,
        })
        .collect();
    responses.sort_unstable();
    // ceil(20 / 3)
    assert_eq!(responses, (0..7).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_data_before_start_is_fatal() {
    let (upload, _output) = WriteChannel::new("upload", NullSink, capped(3));
    let events = vec![Event::data("source", "1", "catalog", json!({}))];
    let err = upload.run(stream::iter(events)).await.unwrap_err();
    assert!(matches!(err, StreamError::BeforeStart { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_writes_stay_within_rate() {
    let writes_per_second = 2.0;
    let sink = Clocked::default();
    let calls = Arc::clone(&sink.calls);
    let options = capped(1).rate(RateOptions::default().writes_per_second(writes_per_second));

    let (upload, _output) = WriteChannel::new("upload", sink, options);
    upload.run(stream::iter(source_events(8))).await.unwrap();

    let mut calls = calls.lock().clone();
    calls.sort();
    assert_eq!(calls.len(), 8);
    let first = calls[0];
    for (n, at) in calls.iter().enumerate() {
        let elapsed = at.duration_since(first) + Duration::from_secs(1);
        let floor = Duration::from_secs_f64(n as f64 / writes_per_second);
        assert!(elapsed >= floor, "write {n} at {elapsed:?}, expected at least {floor:?}");
    }
    // pacing actually kicked in
    assert!(calls[7].duration_since(first) >= Duration::from_secs(2));
}

/// Takes two seconds per write.
struct Sluggish;

impl Sink for Sluggish {
    type Error = Infallible;

    async fn write(&self, dispatch: &Dispatch) -> Result<WriteOutcome, Infallible> {
        tokio::time::sleep(Duration::from_secs(2)).await;
        Ok(WriteOutcome::accepted(dispatch))
    }
}

async fn timed_upload(rate: RateOptions) -> (Duration, Vec<Event>) {
    let options = capped(1).rate(rate);
    let (upload, output) = WriteChannel::new("upload", BpsSink::new(Sluggish), options);
    let start = Instant::now();
    let totals = upload.run(stream::iter(source_events(20))).await.unwrap();
    assert_eq!(totals.successful.records, 20);
    (start.elapsed(), collect(output))
}

#[tokio::test(start_paused = true)]
async fn test_adaptive_pacing_follows_observed_speed() {
    // 100 records/s is never reached, so only the observed speed can hold writes back
    let (configured, events) =
        timed_upload(RateOptions::default().records_per_second(100.0)).await;
    assert!(configured < Duration::from_secs(5), "configured run took {configured:?}");
    assert!(!events.iter().any(|event| event.kind() == EventKind::Pulse));

    // after two samples the service looks like 0.5 records/s
    let (adaptive, events) =
        timed_upload(RateOptions::default().records_per_second(100.0).adaptive(2)).await;
    // the first 15 writes complete at 2s; at 0.5 records/s the 16th is held to 30s
    assert!(adaptive >= Duration::from_secs(30), "adaptive run took {adaptive:?}");
    assert!(events.iter().any(|event| event.kind() == EventKind::Pulse));
}

#[tokio::test]
async fn test_nested_channels_accumulate_meta() {
    let (upgrade, upgraded) = MapChannel::new("upgrade", |mut record: serde_json::Value| {
        record["upgraded"] = json!(true);
        record
    });
    assert_eq!(upgrade.run(stream::iter(source_events(5))).await.unwrap(), 5);

    let (upload, output) = WriteChannel::new("upload", NullSink, capped(2));
    let totals = upload.run(into_stream(upgraded)).await.unwrap();
    assert_eq!(totals.writes, 3);

    let events = collect(output);
    let start = &events[0];
    assert_eq!(start.depth, 2);
    let Payload::Start { options } = &start.payload else {
        panic!("expected start");
    };
    let channels: Vec<_> = options.iter().map(|meta| meta.channel.as_str()).collect();
    assert_eq!(channels, ["upgrade", "upload"]);

    let Payload::End { results } = &events.last().unwrap().payload else {
        panic!("expected end");
    };
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].values["records"], 5);
}

#[tokio::test]
async fn test_events_serialize_for_renderers() {
    let (upload, output) = WriteChannel::new("upload", NullSink, capped(5));
    upload.run(stream::iter(source_events(5))).await.unwrap();

    for event in collect(output) {
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["channel"], "upload");
        assert!(value["type"].is_string());
    }
}
