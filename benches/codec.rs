//! 와이어 코덱 / MD5 벤치마크
//!
//! 실행: `cargo bench --bench codec`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use swft::chunk::split_into_chunks;
use swft::digest::bytes_digest;
use swft::message::decode;
use swft::CHUNK_SIZE;

fn test_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

/// 청크 데이터그램 인코딩/디코딩
fn bench_chunk_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunk_codec");
    let data = test_data(CHUNK_SIZE);
    let chunk = split_into_chunks("bench.bin", &data).unwrap().remove(0);
    let encoded = chunk.to_bytes();

    group.throughput(Throughput::Bytes(CHUNK_SIZE as u64));
    group.bench_function("encode", |b| b.iter(|| black_box(chunk.to_bytes())));
    group.bench_function("decode", |b| b.iter(|| black_box(decode(&encoded))));
    group.finish();
}

fn bench_md5(c: &mut Criterion) {
    let mut group = c.benchmark_group("md5");

    for size in [CHUNK_SIZE, 1024 * 1024, 16 * 1024 * 1024] {
        let data = test_data(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| black_box(bytes_digest(data)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_chunk_codec, bench_md5);
criterion_main!(benches);
