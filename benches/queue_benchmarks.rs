//! Queue benchmarks against the in-memory store

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use courier::{MemoryStore, PushRequest, Queue};
use serde_json::json;
use std::hint::black_box;
use std::sync::Arc;

fn push_pop_benchmark(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let queue = Queue::new(Arc::new(MemoryStore::new()));

    let mut group = c.benchmark_group("queue");
    group.throughput(Throughput::Elements(1));

    group.bench_function("push_pop_ack", |b| {
        b.to_async(&rt).iter(|| async {
            let id = queue
                .push(PushRequest::new(json!({"event": "donation.created", "amount": 25})))
                .await
                .unwrap()
                .id;
            let message = queue.pop().await.unwrap();
            queue.ack(black_box(id)).await.unwrap();
            black_box(message)
        });
    });

    group.bench_function("push_idempotent_duplicate", |b| {
        rt.block_on(async {
            queue
                .push(PushRequest::new(json!(1)).idempotency_key("bench"))
                .await
                .unwrap();
        });
        b.to_async(&rt).iter(|| async {
            black_box(
                queue
                    .push(PushRequest::new(json!(1)).idempotency_key("bench"))
                    .await
                    .unwrap(),
            )
        });
    });

    group.finish();
}

fn stats_benchmark(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let queue = Queue::new(Arc::new(MemoryStore::new()));

    rt.block_on(async {
        for n in 0..1_000 {
            queue
                .push(PushRequest::new(json!({"n": n})).delay_seconds(n % 2 * 3_600))
                .await
                .unwrap();
        }
    });

    c.bench_function("stats_with_1000_messages", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(queue.stats().await.unwrap()) });
    });
}

criterion_group!(benches, push_pop_benchmark, stats_benchmark);
criterion_main!(benches);
