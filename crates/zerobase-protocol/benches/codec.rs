//! Framing cost for publish frames of increasing payload size.

use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use zerobase_protocol::{codec, Frame};

const SIZES: [usize; 4] = [16, 256, 4096, 65536];

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish_encode");
    for size in SIZES {
        let frame = Frame::publish("sensors/imu", vec![0xabu8; size]);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &frame, |b, frame| {
            let mut buf = BytesMut::with_capacity(size + 64);
            b.iter(|| {
                buf.clear();
                codec::encode_into(black_box(frame), &mut buf).unwrap();
            })
        });
    }
    group.finish();
}

fn bench_stream_decode(c: &mut Criterion) {
    const BATCH: usize = 64;

    let mut group = c.benchmark_group("publish_stream_decode");
    for size in SIZES {
        let mut wire = BytesMut::new();
        for _ in 0..BATCH {
            codec::encode_into(&Frame::publish("sensors/imu", vec![0u8; size]), &mut wire).unwrap();
        }
        let wire = wire.freeze();

        group.throughput(Throughput::Bytes((size * BATCH) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &wire, |b, wire| {
            b.iter(|| {
                let mut buf = BytesMut::from(&wire[..]);
                let mut frames = 0;
                while let Some(frame) = codec::decode_from(&mut buf).unwrap() {
                    black_box(frame);
                    frames += 1;
                }
                assert_eq!(frames, BATCH);
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encode, bench_stream_decode);
criterion_main!(benches);
