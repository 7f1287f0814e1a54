//! Codec benchmarks for dndex-relay-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use dndex_relay_protocol::codec;

fn chat_frame(text_len: usize) -> Vec<u8> {
    format!(
        r#"{{"type":"chat","name":"Mira","text":"{}"}}"#,
        "x".repeat(text_len)
    )
    .into_bytes()
}

fn bench_decode_small(c: &mut Criterion) {
    let frame = chat_frame(64);

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(frame.len() as u64));
    group.bench_function("small_64B", |b| b.iter(|| codec::decode(black_box(&frame))));
    group.finish();
}

fn bench_encode_small(c: &mut Criterion) {
    let envelope = codec::decode(&chat_frame(64)).unwrap();

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(64));
    group.bench_function("small_64B", |b| b.iter(|| codec::encode(black_box(&envelope))));
    group.finish();
}

fn bench_restamp_roundtrip(c: &mut Criterion) {
    let frame = chat_frame(256);

    c.bench_function("restamp_roundtrip_256B", |b| {
        b.iter(|| {
            let mut envelope = codec::decode(black_box(&frame)).unwrap();
            envelope.restamp_room("table-42");
            codec::encode(black_box(&envelope)).unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_decode_small,
    bench_encode_small,
    bench_restamp_roundtrip
);
criterion_main!(benches);
