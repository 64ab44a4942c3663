use bytes::{Bytes, BytesMut};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use frame_server::core::codec::{encode_frame, FrameCodec};
use tokio_util::codec::{Decoder, Encoder};

#[allow(clippy::unwrap_used)]
fn bench_frame_encode_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encode_decode");
    let payload_sizes = [64usize, 512, 4096, 65536, 512 * 1024];

    for &size in &payload_sizes {
        let payload = Bytes::from(vec![0u8; size]);
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_function(format!("encode_{size}b"), |b| {
            b.iter_batched(
                || BytesMut::with_capacity(size + 8),
                |mut buf| {
                    let mut codec = FrameCodec::default();
                    codec.encode(payload.clone(), &mut buf).unwrap();
                },
                BatchSize::SmallInput,
            )
        });

        let wire = encode_frame(&payload);
        group.bench_function(format!("decode_{size}b"), |b| {
            b.iter_batched(
                || BytesMut::from(&wire[..]),
                |mut buf| {
                    let mut codec = FrameCodec::default();
                    assert!(codec.decode(&mut buf).unwrap().is_some());
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

/// Many small frames arriving in fixed-size reads, as the connection reader sees them
#[allow(clippy::unwrap_used)]
fn bench_chunked_stream(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunked_stream");
    let mut stream = Vec::new();
    for i in 0..1000u32 {
        stream.extend_from_slice(&encode_frame(&i.to_be_bytes().repeat(16)));
    }
    group.throughput(Throughput::Bytes(stream.len() as u64));

    for chunk in [64usize, 1024, 16 * 1024] {
        group.bench_function(format!("chunk_{chunk}b"), |b| {
            b.iter(|| {
                let mut codec = FrameCodec::default();
                let mut buf = BytesMut::with_capacity(chunk);
                let mut frames = 0;
                for piece in stream.chunks(chunk) {
                    buf.extend_from_slice(piece);
                    while codec.decode(&mut buf).unwrap().is_some() {
                        frames += 1;
                    }
                }
                assert_eq!(frames, 1000);
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_frame_encode_decode, bench_chunked_stream);
criterion_main!(benches);
