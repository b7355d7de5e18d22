//! Integration tests for the cache-consistency engine over the in-memory
//! key-value store and store of record.

use std::sync::Arc;
use std::time::Duration;

use flashsale_core::{CoreError, RetryPolicy};
use flashsale_db_memory::InMemoryStorage;
use flashsale_server::cache::{CacheEngine, CacheRead, RebuildPolicy, ShopCatalog, TtlPolicy};
use flashsale_server::config::CacheConfig;
use flashsale_server::kv::{KvStore, MemoryKv};
use flashsale_server::lock::DistributedLock;
use flashsale_storage::{Shop, ShopStore};
use time::macros::datetime;

struct Fixture {
    kv: Arc<MemoryKv>,
    store: Arc<InMemoryStorage>,
    engine: Arc<CacheEngine>,
    catalog: ShopCatalog,
}

fn shop(id: u64, name: &str) -> Shop {
    Shop {
        id,
        name: name.into(),
        type_id: 1,
        area: None,
        address: "88 Harbour Rd".into(),
        avg_price: 12000,
        score: 47,
        open_hours: None,
        updated_at: datetime!(2025-06-01 00:00:00 UTC),
    }
}

fn config() -> CacheConfig {
    CacheConfig {
        rebuild_workers: 2,
        mutex_retry: RetryPolicy::new(50, Duration::from_millis(10), Duration::from_millis(20)),
        rebuild_retry: RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(1)),
        ..CacheConfig::default()
    }
}

async fn fixture() -> Fixture {
    let kv = Arc::new(MemoryKv::new());
    let store = Arc::new(InMemoryStorage::new());
    store.upsert_shop(&shop(1, "Harbour Noodles")).await.unwrap();
    let engine = Arc::new(CacheEngine::new(
        kv.clone(),
        DistributedLock::new(kv.clone()),
        &config(),
    ));
    let catalog = ShopCatalog::new(engine.clone(), store.clone());
    Fixture {
        kv,
        store,
        engine,
        catalog,
    }
}

/// Caches shop 1 as already logically expired.
async fn seed_stale(f: &Fixture) {
    let stale = f.store.get_shop(1).await.unwrap().unwrap();
    f.engine
        .put("shop", 1, &stale, TtlPolicy::Logical(Duration::ZERO))
        .await
        .unwrap();
    f.store.reset_counters();
}

#[tokio::test]
async fn test_cache_aside_caches_value() {
    let f = fixture().await;
    for _ in 0..5 {
        let shop = f.catalog.require(1, RebuildPolicy::CacheAside).await.unwrap();
        assert_eq!(shop.name, "Harbour Noodles");
    }
    assert_eq!(f.store.shop_reads(), 1);
    assert!(f.kv.ttl("cache:shop:1").is_some());
}

#[tokio::test]
async fn test_absent_marker_absorbs_repeated_misses() {
    let f = fixture().await;
    for _ in 0..5 {
        let read = f.catalog.read(404, RebuildPolicy::CacheAside).await.unwrap();
        assert_eq!(read, CacheRead::Missing);
    }
    assert_eq!(f.store.shop_reads(), 1);
    let ttl = f.kv.ttl("cache:shop:404").unwrap();
    assert!(ttl <= Duration::from_secs(120));
}

#[tokio::test]
async fn test_store_error_reaches_cache_aside_caller() {
    let f = fixture().await;
    f.store.set_fail_reads(true);
    let err = f
        .catalog
        .read(1, RebuildPolicy::CacheAside)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::TransientStore { .. }));
}

#[tokio::test]
async fn test_kv_outage_fails_open_to_store() {
    let f = fixture().await;
    f.kv.set_unavailable(true);

    let shop = f.catalog.require(1, RebuildPolicy::CacheAside).await.unwrap();
    assert_eq!(shop.id, 1);
    let shop = f.catalog.require(1, RebuildPolicy::MutexRebuild).await.unwrap();
    assert_eq!(shop.id, 1);
    assert_eq!(
        f.catalog.read(1, RebuildPolicy::LogicalExpiry).await.unwrap(),
        CacheRead::Missing
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mutex_rebuild_loads_once_under_contention() {
    let f = fixture().await;
    f.store.set_read_delay(Duration::from_millis(30));

    let reads: Vec<_> = (0..16)
        .map(|_| {
            let catalog = f.catalog.clone();
            tokio::spawn(async move { catalog.require(1, RebuildPolicy::MutexRebuild).await })
        })
        .collect();
    for read in reads {
        assert_eq!(read.await.unwrap().unwrap().name, "Harbour Noodles");
    }

    assert_eq!(f.store.shop_reads(), 1);
    assert!(f.kv.get("lock:shop:1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_mutex_rebuild_gives_up_when_lock_never_frees() {
    let f = fixture().await;
    let lock = DistributedLock::new(f.kv.clone());
    let _held = lock
        .try_acquire("lock:shop:1", Duration::from_secs(60))
        .await
        .unwrap()
        .unwrap();

    let err = f
        .catalog
        .read(1, RebuildPolicy::MutexRebuild)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::LockUnavailable { .. }));
    assert_eq!(f.store.shop_reads(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stale_reads_schedule_exactly_one_rebuild() {
    let f = fixture().await;
    seed_stale(&f).await;
    f.store.upsert_shop(&shop(1, "Harbour Noodles II")).await.unwrap();
    f.store.set_read_delay(Duration::from_millis(100));

    let reads: Vec<_> = (0..32)
        .map(|_| {
            let catalog = f.catalog.clone();
            tokio::spawn(async move { catalog.read(1, RebuildPolicy::LogicalExpiry).await })
        })
        .collect();
    for read in reads {
        let read = read.await.unwrap().unwrap();
        assert!(read.into_option().is_some());
    }

    f.engine.shutdown().await;
    let stats = f.engine.rebuild_stats();
    assert_eq!(stats.scheduled, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(f.store.shop_reads(), 1);

    match f.catalog.read(1, RebuildPolicy::LogicalExpiry).await.unwrap() {
        CacheRead::Fresh(shop) => assert_eq!(shop.name, "Harbour Noodles II"),
        other => panic!("expected a fresh entry, got {other:?}"),
    }
    assert!(f.kv.ttl("cache:shop:1").is_none());
}

#[tokio::test]
async fn test_stale_value_returned_while_lock_held_elsewhere() {
    let f = fixture().await;
    seed_stale(&f).await;
    f.store.set_read_delay(Duration::from_secs(5));

    let lock = DistributedLock::new(f.kv.clone());
    let held = lock
        .try_acquire("lock:shop:1", Duration::from_secs(10))
        .await
        .unwrap()
        .unwrap();

    let started = std::time::Instant::now();
    let read = f.catalog.read(1, RebuildPolicy::LogicalExpiry).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(read.is_stale());
    assert_eq!(f.engine.rebuild_stats().scheduled, 0);
    assert_eq!(f.store.shop_reads(), 0);

    assert!(held.release().await.unwrap());
}

#[tokio::test]
async fn test_failed_rebuild_keeps_stale_value_and_frees_lock() {
    let f = fixture().await;
    seed_stale(&f).await;
    f.store.set_fail_reads(true);

    let read = f.catalog.read(1, RebuildPolicy::LogicalExpiry).await.unwrap();
    assert!(read.is_stale());

    f.engine.shutdown().await;
    assert_eq!(f.engine.rebuild_stats().completed, 1);
    // Both attempts of the rebuild retry policy hit the store.
    assert_eq!(f.store.shop_reads(), 2);

    for _ in 0..10 {
        if f.kv.get("lock:shop:1").await.unwrap().is_none() {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert!(f.kv.get("lock:shop:1").await.unwrap().is_none());
    assert!(
        f.catalog
            .read(1, RebuildPolicy::LogicalExpiry)
            .await
            .unwrap()
            .is_stale()
    );
}

#[tokio::test]
async fn test_update_then_preload_refreshes_logical_entry() {
    let f = fixture().await;
    f.catalog.preload(&[1]).await.unwrap();

    f.catalog.update(&shop(1, "Harbour Grill")).await.unwrap();
    assert_eq!(
        f.catalog.read(1, RebuildPolicy::LogicalExpiry).await.unwrap(),
        CacheRead::Missing
    );

    f.catalog.preload(&[1]).await.unwrap();
    match f.catalog.read(1, RebuildPolicy::LogicalExpiry).await.unwrap() {
        CacheRead::Fresh(shop) => assert_eq!(shop.name, "Harbour Grill"),
        other => panic!("expected a fresh entry, got {other:?}"),
    }
}
