//! Codec benchmarks for tableau-protocol.
//!
//! `updateShapes` carries the whole table on every mutation, so the
//! interesting input is a full shape list rather than a small payload.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tableau_protocol::{codec, ops, Frame, Geometry, Point, Shape};

fn shapes_frame(count: usize) -> Frame {
    let shapes: Vec<Shape> = (0..count)
        .map(|i| {
            let f = i as f64;
            Shape::new(
                i as u64,
                Geometry::Dot {
                    points: (0..16).map(|p| Point::new(f + p as f64, f * 2.0)).collect(),
                    size: 3.0,
                    color: "#336699".into(),
                },
            )
        })
        .collect();
    let value = serde_json::to_value(shapes).unwrap();
    Frame::call(ops::server::UPDATE_SHAPES, vec![value])
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_update_shapes");
    for count in [10usize, 100, 1000] {
        let frame = shapes_frame(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("msgpack", count), &frame, |b, frame| {
            b.iter(|| codec::encode(black_box(frame)))
        });
        group.bench_with_input(BenchmarkId::new("json", count), &frame, |b, frame| {
            b.iter(|| codec::encode_json(black_box(frame)))
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let frame = shapes_frame(100);
    let encoded = codec::encode(&frame).unwrap();

    let mut group = c.benchmark_group("decode_update_shapes");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("msgpack_100", |b| {
        b.iter(|| codec::decode(black_box(&encoded)))
    });
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
