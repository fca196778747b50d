//! Cache-aside benchmarks.
//!
//! Run with: cargo bench --bench cache

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use telescope::cache::{codec, CacheAside, CompressionPolicy, InMemoryBackend};
use telescope::Deadline;
use tokio::runtime::Runtime;

#[derive(Serialize, Deserialize)]
struct Observation {
  id: i64,
  target: String,
  samples: Vec<f64>,
}

fn create_runtime() -> Runtime {
  tokio::runtime::Builder::new_current_thread()
    .enable_all()
    .build()
    .unwrap()
}

fn payload(len: usize) -> Vec<u8> {
  "telescope observation log 望远镜 "
    .bytes()
    .cycle()
    .take(len)
    .collect()
}

fn bench_compression(c: &mut Criterion) {
  let policy = CompressionPolicy::default();
  let mut group = c.benchmark_group("compression");

  for len in [8 * 1024, 64 * 1024, 512 * 1024] {
    let input = payload(len);
    let packed = policy.compress(&input).unwrap();
    group.throughput(Throughput::Bytes(len as u64));

    group.bench_with_input(BenchmarkId::new("compress", len), &input, |b, input| {
      b.iter(|| black_box(policy.compress(input).unwrap()));
    });
    group.bench_with_input(BenchmarkId::new("decompress", len), &packed, |b, packed| {
      b.iter(|| black_box(policy.decompress(packed.clone()).unwrap()));
    });
  }

  group.finish();
}

fn bench_codec(c: &mut Criterion) {
  let value = Observation {
    id: 42,
    target: "NGC 224".into(),
    samples: (0..256).map(|i| i as f64 * 0.5).collect(),
  };
  let bytes = codec::encode(&value).unwrap();

  let mut group = c.benchmark_group("codec");
  group.bench_function("encode", |b| {
    b.iter(|| black_box(codec::encode(&value).unwrap()));
  });
  group.bench_function("decode", |b| {
    b.iter(|| black_box(codec::decode::<Observation>(&bytes).unwrap()));
  });
  group.finish();
}

fn bench_cache_aside(c: &mut Criterion) {
  let rt = create_runtime();
  let cache = CacheAside::new(Arc::new(InMemoryBackend::new()), CompressionPolicy::default());
  let deadline = Deadline::never();

  let mut group = c.benchmark_group("cache_aside");
  for len in [512, 16 * 1024] {
    let value = payload(len);
    rt.block_on(cache.update_bytes("bench", value.clone(), None, deadline))
      .unwrap();

    group.bench_with_input(BenchmarkId::new("update_bytes", len), &value, |b, value| {
      b.iter(|| {
        rt.block_on(cache.update_bytes("bench", value.clone(), None, deadline))
          .unwrap();
      });
    });
    group.bench_function(BenchmarkId::new("read_bytes", len), |b| {
      b.iter(|| black_box(rt.block_on(cache.read_bytes("bench", deadline)).unwrap()));
    });
  }
  group.finish();
}

criterion_group!(benches, bench_compression, bench_codec, bench_cache_aside);
criterion_main!(benches);
