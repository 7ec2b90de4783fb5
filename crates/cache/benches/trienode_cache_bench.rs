//! Throughput benchmarks for the trie node cache strategies
//!
//! Run with: cargo bench -p trienode-cache --bench trienode_cache_bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::prelude::*;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::thread;
use trienode_cache::{CacheType, NodeCache, NodeKey, TrieNodeCache, TrieNodeCacheConfig};

const STRATEGIES: [CacheType; 3] = [CacheType::Lru, CacheType::Fast, CacheType::Hybrid];

/// Deterministic content-addressed keys
fn generate_keys(count: usize) -> Vec<NodeKey> {
    (0..count as u64)
        .map(|i| NodeKey::new(Sha256::digest(i.to_le_bytes()).into()))
        .collect()
}

fn generate_value(size: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..size).map(|_| rng.gen()).collect()
}

fn open(cache_type: CacheType, max_bytes: u64) -> NodeCache {
    let config = TrieNodeCacheConfig::builder()
        .with_cache_type(cache_type)
        .with_max_bytes(max_bytes)
        .with_shard_count(64)
        .with_stats_interval(None)
        .build()
        .unwrap();
    NodeCache::open(config).unwrap()
}

fn bench_set(c: &mut Criterion) {
    let keys = generate_keys(100_000);
    let mut group = c.benchmark_group("set");

    for size in [64usize, 256, 1024] {
        let value = generate_value(size, 7);
        group.throughput(Throughput::Bytes(size as u64));
        for cache_type in STRATEGIES {
            let cache = open(cache_type, 64 * 1024 * 1024);
            let mut i = 0;
            group.bench_with_input(BenchmarkId::new(cache_type.to_string(), size), &size, |b, _| {
                b.iter(|| {
                    cache.set(&keys[i % keys.len()], &value);
                    i += 1;
                });
            });
        }
    }
    group.finish();
}

fn bench_get_hot(c: &mut Criterion) {
    let keys = generate_keys(10_000);
    let value = generate_value(256, 11);
    let mut group = c.benchmark_group("get_hot");
    group.throughput(Throughput::Elements(1));

    for cache_type in STRATEGIES {
        let cache = open(cache_type, 64 * 1024 * 1024);
        for key in &keys {
            cache.set(key, &value);
        }
        let mut i = 0;
        group.bench_function(cache_type.to_string(), |b| {
            b.iter(|| {
                black_box(cache.get(&keys[i % keys.len()]));
                i += 1;
            });
        });
    }
    group.finish();
}

fn bench_get_into(c: &mut Criterion) {
    let keys = generate_keys(10_000);
    let value = generate_value(256, 13);
    let cache = trienode_cache::FastByteCache::new(64 * 1024 * 1024, 64).unwrap();
    for key in &keys {
        cache.set(key, &value);
    }

    let mut buf = Vec::with_capacity(4096);
    let mut i = 0;
    c.bench_function("fast_get_into", |b| {
        b.iter(|| {
            buf.clear();
            black_box(cache.get_into(&keys[i % keys.len()], &mut buf));
            i += 1;
        });
    });
}

fn bench_concurrent_mixed(c: &mut Criterion) {
    let keys = Arc::new(generate_keys(50_000));
    let value = Arc::new(generate_value(256, 17));
    let mut group = c.benchmark_group("concurrent_mixed");
    group.sample_size(20);

    for cache_type in STRATEGIES {
        let cache = Arc::new(open(cache_type, 64 * 1024 * 1024));
        group.bench_function(cache_type.to_string(), |b| {
            b.iter(|| {
                let handles: Vec<_> = (0..4)
                    .map(|t| {
                        let cache = Arc::clone(&cache);
                        let keys = Arc::clone(&keys);
                        let value = Arc::clone(&value);
                        thread::spawn(move || {
                            for i in (t..keys.len()).step_by(4).take(2_000) {
                                let key = &keys[i];
                                if cache.get(key).is_none() {
                                    cache.set(key, &value);
                                }
                            }
                        })
                    })
                    .collect();
                for handle in handles {
                    handle.join().unwrap();
                }
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_set,
    bench_get_hot,
    bench_get_into,
    bench_concurrent_mixed
);
criterion_main!(benches);
