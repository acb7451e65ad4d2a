//! Hot-path benchmarks

use std::time::Duration;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use perfmux::stats::{LatencySummary, TestResult};
use perfmux::{SessionMessage, TestId, TestParam, TestProtocol, TestType};

fn bench_result_add(c: &mut Criterion) {
    let result = TestResult::new();

    c.bench_function("result_add_cumulative", |b| {
        b.iter(|| {
            result.add_cumulative(black_box(1400));
        })
    });
}

fn bench_latency_summary(c: &mut Criterion) {
    let samples: Vec<Duration> = (0..1000u64)
        .map(|i| Duration::from_nanos((i * 7919) % 100_000))
        .collect();

    c.bench_function("latency_summary_1000", |b| {
        b.iter(|| {
            let mut batch = samples.clone();
            LatencySummary::from_samples(black_box(&mut batch))
        })
    });
}

fn bench_message_serialize(c: &mut Criterion) {
    let msg = SessionMessage::syn(TestParam::new(TestId::new(
        TestProtocol::Tcp,
        TestType::Bandwidth,
    )));

    c.bench_function("message_serialize", |b| {
        b.iter(|| black_box(&msg).serialize())
    });
}

fn bench_message_deserialize(c: &mut Criterion) {
    let json = SessionMessage::syn(TestParam::new(TestId::new(
        TestProtocol::Tcp,
        TestType::Latency,
    )))
    .serialize()
    .unwrap();

    c.bench_function("message_deserialize", |b| {
        b.iter(|| SessionMessage::deserialize(black_box(&json)))
    });
}

criterion_group!(
    benches,
    bench_result_add,
    bench_latency_summary,
    bench_message_serialize,
    bench_message_deserialize
);
criterion_main!(benches);
