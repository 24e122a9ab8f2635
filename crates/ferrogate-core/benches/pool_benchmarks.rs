use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ferrogate_core::cache::BoundedCache;
use ferrogate_core::egress::{ConnectionPool, Connector, PoolConfig, Route, TransportError};
use ferrogate_core::session::{SessionCacheConfig, SessionId, SessionRecord, SessionStore};
use std::time::Duration;
use tokio::runtime::Runtime;

struct NoopConnector;

#[async_trait]
impl Connector for NoopConnector {
    type Connection = u64;

    async fn connect(&self, _route: &Route) -> Result<u64, TransportError> {
        Ok(0)
    }
}

fn bench_cache_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_put");

    for capacity in [100usize, 1000, 10000].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(capacity),
            capacity,
            |b, &capacity| {
                let cache = BoundedCache::new(capacity, Duration::from_secs(60));
                // Fill to capacity so every put evicts
                for i in 0..capacity {
                    cache.put(i as u64, i as u64);
                }
                let mut next = capacity as u64;
                b.iter(|| {
                    cache.put(black_box(next), next);
                    next += 1;
                });
            },
        );
    }

    group.finish();
}

fn bench_cache_get(c: &mut Criterion) {
    let cache = BoundedCache::new(1000, Duration::from_secs(60));
    for i in 0..1000u64 {
        cache.put(i, i);
    }

    c.bench_function("cache_get_hit", |b| {
        b.iter(|| cache.get(black_box(&500)));
    });
    c.bench_function("cache_get_miss", |b| {
        b.iter(|| cache.get(black_box(&9999)));
    });
}

fn bench_session_store(c: &mut Criterion) {
    let store = SessionStore::new(&SessionCacheConfig::default());
    let record = SessionRecord::new(
        SessionId::from(&b"bench-session"[..]),
        "bench-peer".to_string(),
        0x1301,
        vec![0u8; 48],
    );
    store.put(&record);

    c.bench_function("session_put", |b| {
        b.iter(|| store.put(black_box(&record)));
    });
    c.bench_function("session_get_ticket", |b| {
        b.iter(|| store.get(black_box(record.id())));
    });
}

fn bench_pool_acquire_release(c: &mut Criterion) {
    let rt = Runtime::new().expect("Failed to create runtime");
    let route = Route::new("http", "upstream.example", 8080);

    c.bench_function("pool_acquire_reuse", |b| {
        let pool = rt.block_on(async { ConnectionPool::new(NoopConnector, PoolConfig::default()) });
        // Warm the pool so the loop measures the reuse path
        rt.block_on(async {
            let conn = pool.acquire(&route).await.expect("Failed to acquire");
            conn.release(None);
        });

        b.iter(|| {
            rt.block_on(async {
                let conn = pool.acquire(black_box(&route)).await.expect("Failed to acquire");
                conn.release(None);
            });
        });
    });

    c.bench_function("pool_acquire_fresh", |b| {
        let pool = rt.block_on(async {
            ConnectionPool::new(
                NoopConnector,
                PoolConfig {
                    reuse_connections: false,
                    ..PoolConfig::default()
                },
            )
        });

        b.iter(|| {
            rt.block_on(async {
                let conn = pool.acquire(black_box(&route)).await.expect("Failed to acquire");
                conn.release(None);
            });
        });
    });
}

criterion_group!(
    benches,
    bench_cache_put,
    bench_cache_get,
    bench_session_store,
    bench_pool_acquire_release
);
criterion_main!(benches);
