use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use net_session::core::{frame_into, unframe, FramingBuffer};

const MAX: usize = 1024 * 1024;

#[allow(clippy::unwrap_used)]
fn bench_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame");

    for &size in &[16usize, 256, 4096, 65536] {
        let payload = vec![0xA5u8; size];
        let mut out = Vec::with_capacity(size + 4);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("frame_into_{size}b"), |b| {
            b.iter(|| {
                out.clear();
                frame_into(black_box(&payload), &mut out).unwrap();
            })
        });
    }

    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_unframe(c: &mut Criterion) {
    let mut group = c.benchmark_group("unframe");

    // 64 back-to-back frames of 100 bytes each
    let mut stream = Vec::new();
    let mut frame = Vec::new();
    for i in 0..64u8 {
        frame_into(&[i; 100], &mut frame).unwrap();
        stream.extend_from_slice(&frame);
    }
    group.throughput(Throughput::Bytes(stream.len() as u64));

    for &chunk_size in &[7usize, 64, 1500, stream.len()] {
        group.bench_function(format!("chunks_of_{chunk_size}"), |b| {
            b.iter_batched(
                FramingBuffer::new,
                |mut state| {
                    let mut messages = 0usize;
                    for chunk in stream.chunks(chunk_size) {
                        let ok = unframe(chunk, &mut state, MAX, |payload| {
                            messages += black_box(payload).len();
                        });
                        assert!(ok);
                    }
                    messages
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_frame, bench_unframe);
criterion_main!(benches);
