use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use ferry_stream::JsonBuffer;
use ferry_stream::data::BufferOptions;
use serde_json::json;

fn bench_buffer_push(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer_push");
    let records: Vec<_> = (0..1000)
        .map(|i| {
            json!({
                "id": i,
                "sku": format!("SKU-{i:05}"),
                "title": "Ferry test record",
                "price": 12.5,
            })
        })
        .collect();

    for cap in [10u64, 100, 1000] {
        group.throughput(Throughput::Elements(records.len() as u64));
        group.bench_with_input(BenchmarkId::new("records_per_request", cap), &cap, |b, &cap| {
            b.iter(|| {
                let options = BufferOptions::default().records_per_request(Some(cap));
                let mut buffer = JsonBuffer::new(options);
                let mut dispatched = 0;
                for record in &records {
                    dispatched += buffer.push(black_box(record)).unwrap().len();
                }
                dispatched += usize::from(buffer.flush().is_some());
                black_box(dispatched)
            });
        });
    }

    group.finish();
}

fn bench_byte_capped(c: &mut Criterion) {
    let record = json!({"body": "x".repeat(2048)});
    c.bench_function("buffer_push_byte_capped", |b| {
        b.iter(|| {
            let options = BufferOptions::default()
                .records_per_request(None)
                .bytes_per_request(Some(64 * 1024));
            let mut buffer = JsonBuffer::new(options);
            for _ in 0..200 {
                black_box(buffer.push(&record).unwrap());
            }
        });
    });
}

criterion_group!(benches, bench_buffer_push, bench_byte_capped);
criterion_main!(benches);
