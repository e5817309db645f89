use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use newsdesk_cache::{
    CacheConfig, CacheManager, MemoryStore, OptimisticConfig, OptimisticManager, RemoteError,
    SetOptions, UpdateOptions,
};
use std::hint::black_box;
use std::sync::Arc;
use tokio::runtime::Runtime;

mod common;
use common::{BenchArticle, BenchConfig, KeyGenerator};

fn in_memory_cache(max_size: usize) -> CacheManager {
    CacheManager::new(CacheConfig {
        max_size,
        persist: false,
        sync_across_instances: false,
        ..Default::default()
    })
}

fn populate(cache: &CacheManager, keys: &[String]) {
    for (i, key) in keys.iter().enumerate() {
        let article = BenchArticle::new(i as u64);
        let tags = article.tags();
        cache.set(key.clone(), article, SetOptions::new().tags(tags));
    }
}

/// Benchmark 1: Hot Cache (all hits, typed read path)
fn bench_hot_get(c: &mut Criterion, config: &BenchConfig) {
    let mut group = c.benchmark_group("hot_get");
    group.sample_size(config.sample_size);

    let key_gen = KeyGenerator::new(config.num_keys);
    let cache = in_memory_cache(config.num_keys);
    populate(&cache, &key_gen.sequential());
    let reads = key_gen.zipf_random(1_000);

    group.throughput(Throughput::Elements(reads.len() as u64));
    group.bench_function("typed", |b| {
        b.iter(|| {
            for key in &reads {
                black_box(cache.get::<BenchArticle>(key));
            }
        });
    });

    // Entries loaded from storage only have their JSON form.
    let store = MemoryStore::new();
    let persisted = CacheManager::builder(CacheConfig {
        max_size: config.num_keys,
        sync_across_instances: false,
        ..Default::default()
    })
    .store(Arc::new(store.clone()))
    .build();
    populate(&persisted, &key_gen.sequential()[..config.num_keys.min(1_000)]);
    let reloaded = CacheManager::builder(CacheConfig {
        max_size: config.num_keys,
        sync_across_instances: false,
        ..Default::default()
    })
    .store(Arc::new(store))
    .build();
    reloaded.reload_from_storage();
    let reload_keys = key_gen.sequential()[..config.num_keys.min(1_000)].to_vec();

    group.bench_function("deserialized", |b| {
        b.iter(|| {
            for key in &reload_keys {
                black_box(reloaded.get::<BenchArticle>(key));
            }
        });
    });

    group.finish();
}

/// Benchmark 2: Writes into a full cache (every insert evicts)
fn bench_set_with_eviction(c: &mut Criterion, config: &BenchConfig) {
    let mut group = c.benchmark_group("set_with_eviction");
    group.sample_size(config.sample_size);

    for max_size in [100, 1_000, 10_000] {
        let cache = in_memory_cache(max_size);
        let keys = KeyGenerator::new(max_size).sequential();
        populate(&cache, &keys);
        let mut next = max_size as u64;

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(max_size), &max_size, |b, _| {
            b.iter(|| {
                next += 1;
                cache.set(
                    format!("article:fresh-{}", next),
                    BenchArticle::new(next),
                    SetOptions::new(),
                );
            });
        });
    }

    group.finish();
}

/// Benchmark 3: Tag invalidation over a populated cache
fn bench_tag_invalidation(c: &mut Criterion, config: &BenchConfig) {
    let mut group = c.benchmark_group("tag_invalidation");
    group.sample_size(config.sample_size.min(50));

    let keys = KeyGenerator::new(config.num_keys).sequential();
    group.bench_function("single_category", |b| {
        b.iter_batched(
            || {
                let cache = in_memory_cache(config.num_keys);
                populate(&cache, &keys);
                cache
            },
            |cache| black_box(cache.invalidate_by_tag("category-3")),
            criterion::BatchSize::LargeInput,
        );
    });

    group.finish();
}

/// Benchmark 4: Optimistic update lifecycle with an immediately successful remote
fn bench_optimistic_roundtrip(c: &mut Criterion, config: &BenchConfig) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("optimistic_roundtrip");
    group.sample_size(config.sample_size);

    let optimistic = OptimisticManager::new(OptimisticConfig::default());
    group.bench_function("update_execute", |b| {
        b.to_async(&rt).iter(|| {
            let optimistic = optimistic.clone();
            async move {
                let id = optimistic.update(
                    BenchArticle::new(2),
                    BenchArticle::new(1),
                    UpdateOptions::new(),
                );
                let confirmed = optimistic
                    .execute(&id, |article| async move { Ok::<_, RemoteError>(article) })
                    .await;
                black_box(confirmed);
                optimistic.clear();
            }
        });
    });

    group.finish();
}

fn run_benchmarks(c: &mut Criterion) {
    let config = BenchConfig::new();

    eprintln!("\n=== Running Benchmarks ===\n");

    bench_hot_get(c, &config);
    bench_set_with_eviction(c, &config);
    bench_tag_invalidation(c, &config);
    bench_optimistic_roundtrip(c, &config);
}

criterion_group!(benches, run_benchmarks);
criterion_main!(benches);
