//! Throughput benchmarks for zerobase.
//!
//! These benchmarks measure publish cost and delivery rate through a node.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::{Duration, Instant};
use zerobase_bench::loopback_node;
use zerobase_core::{Node, PublisherConfig, SubscriberConfig};
use zerobase_transport::{
    Endpoint, InprocTransport, IoContext, PubSocket, SocketOptions, SubSocket, Transport,
};

/// Benchmark `Publisher::send` with no matching subscriber.
fn bench_send_unmatched(c: &mut Criterion) {
    let mut group = c.benchmark_group("send_unmatched");

    let (node, _rx) = loopback_node("inproc://bench-unmatched", "never");

    for size in [64usize, 1024, 65536] {
        let payload = Bytes::from(vec![0u8; size]);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.iter(|| node.send(black_box(payload.clone()), "bench/topic"));
        });
    }

    group.finish();
    node.stop().unwrap();
}

/// Benchmark publish-to-handler delivery through a loopback node.
fn bench_delivery(c: &mut Criterion) {
    let mut group = c.benchmark_group("delivery");

    let (node, rx) = loopback_node("inproc://bench-delivery", "bench");
    let payload = Bytes::from(vec![0u8; 64]);

    group.throughput(Throughput::Elements(1));
    group.bench_function("64B", |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();
            for _ in 0..iters {
                node.send(payload.clone(), "bench").unwrap();
                rx.recv_timeout(Duration::from_secs(1)).unwrap();
            }
            start.elapsed()
        });
    });

    group.finish();
    node.stop().unwrap();
}

/// Benchmark fan-out of one publish to many inproc subscribers.
fn bench_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout");
    let io = IoContext::new(1, SocketOptions::default()).unwrap();

    for size in [1usize, 10, 100] {
        let endpoint = Endpoint::inproc(format!("bench-fanout-{size}"));
        let mut publisher = InprocTransport.bind(&io, &endpoint).unwrap();
        let mut subscribers: Vec<_> = (0..size)
            .map(|_| {
                InprocTransport
                    .connect(&io, &endpoint, &["fan".to_string()])
                    .unwrap()
            })
            .collect();
        let payload = Bytes::from(vec![0u8; 64]);

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                publisher.send("fan", &payload).unwrap();
                io.handle().block_on(async {
                    for subscriber in &mut subscribers {
                        subscriber.recv().await.unwrap();
                    }
                });
            });
        });

        publisher.close();
    }

    group.finish();
}

/// Benchmark node start/stop cost.
fn bench_lifecycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("lifecycle");
    group.sample_size(20);

    group.bench_function("start_stop", |b| {
        b.iter(|| {
            let node = Node::builder()
                .with_publisher(PublisherConfig::new("inproc://bench-lifecycle"))
                .with_subscriber(SubscriberConfig::new("inproc://bench-lifecycle", ["A"]))
                .poll_timeout(Duration::from_millis(1))
                .build();
            node.start().unwrap();
            node.stop().unwrap();
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_send_unmatched,
    bench_delivery,
    bench_fanout,
    bench_lifecycle,
);
criterion_main!(benches);
