//! End-to-end flash-sale flow: publication, atomic admission, queueing and
//! durable persistence, against the in-memory backends.

use std::sync::Arc;
use std::time::Duration;

use flashsale_core::{CoreError, IneligibleReason, RetryPolicy, UserContext};
use flashsale_db_memory::InMemoryStorage;
use flashsale_server::config::AppConfig;
use flashsale_server::kv::MemoryKv;
use flashsale_server::lock::DistributedLock;
use flashsale_server::{FlashsaleServer, ServerBuilder, Stores};
use flashsale_storage::{OrderStore, SeckillVoucher};
use time::OffsetDateTime;

async fn server(config: AppConfig) -> (Arc<InMemoryStorage>, FlashsaleServer) {
    let storage = Arc::new(InMemoryStorage::new());
    let server = ServerBuilder::new()
        .with_config(config)
        .with_stores(Stores::memory(storage.clone()))
        .build()
        .await
        .unwrap();
    (storage, server)
}

fn open_voucher(voucher_id: u64, stock: i64) -> SeckillVoucher {
    let now = OffsetDateTime::now_utc();
    SeckillVoucher {
        voucher_id,
        stock,
        begin_time: now - time::Duration::hours(1),
        end_time: now + time::Duration::hours(1),
    }
}

fn outcome(result: &Result<u64, CoreError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(CoreError::NotEligible(IneligibleReason::SoldOut)) => "sold_out",
        Err(CoreError::NotEligible(IneligibleReason::Duplicate)) => "duplicate",
        Err(other) => panic!("unexpected admission error: {other}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_users_never_oversell() {
    let (storage, server) = server(AppConfig::default()).await;
    server
        .admission()
        .publish_voucher(&open_voucher(1, 5))
        .await
        .unwrap();

    let attempts: Vec<_> = (1..=10)
        .map(|user_id| {
            let admission = server.admission().clone();
            tokio::spawn(async move { admission.admit(&UserContext::new(user_id), 1).await })
        })
        .collect();
    let mut ok = 0;
    let mut sold_out = 0;
    for attempt in attempts {
        match outcome(&attempt.await.unwrap()) {
            "ok" => ok += 1,
            "sold_out" => sold_out += 1,
            other => panic!("unexpected outcome {other}"),
        }
    }
    assert_eq!((ok, sold_out), (5, 5));

    let stats = server.shutdown().await;
    assert_eq!(stats.persisted, 5);
    assert_eq!(stats.failed, 0);
    assert_eq!(storage.count_orders(1).await.unwrap(), 5);
    assert_eq!(storage.voucher_stock(1).await, Some(0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_user_twice_gets_one_order() {
    let (storage, server) = server(AppConfig::default()).await;
    server
        .admission()
        .publish_voucher(&open_voucher(2, 1))
        .await
        .unwrap();

    let attempts: Vec<_> = (0..2)
        .map(|_| {
            let admission = server.admission().clone();
            tokio::spawn(async move { admission.admit(&UserContext::new(42), 2).await })
        })
        .collect();
    let mut outcomes = Vec::new();
    for attempt in attempts {
        outcomes.push(outcome(&attempt.await.unwrap()));
    }
    outcomes.sort_unstable();
    assert_eq!(outcomes, vec!["duplicate", "ok"]);

    server.shutdown().await;
    assert_eq!(storage.count_orders(2).await.unwrap(), 1);
    assert!(storage.find_order(42, 2).await.unwrap().is_some());
}

#[tokio::test]
async fn test_accepted_order_id_is_the_persisted_one() {
    let (storage, server) = server(AppConfig::default()).await;
    server
        .admission()
        .publish_voucher(&open_voucher(3, 10))
        .await
        .unwrap();

    let order_id = server
        .admission()
        .admit(&UserContext::new(7), 3)
        .await
        .unwrap();
    server.shutdown().await;

    let order = storage.find_order(7, 3).await.unwrap().unwrap();
    assert_eq!(order.order_id, order_id);
}

#[tokio::test]
async fn test_window_and_existence_checks() {
    let (_, server) = server(AppConfig::default()).await;
    let admission = server.admission().clone();
    let now = OffsetDateTime::now_utc();

    admission
        .publish_voucher(&SeckillVoucher {
            voucher_id: 10,
            stock: 5,
            begin_time: now + time::Duration::hours(1),
            end_time: now + time::Duration::hours(2),
        })
        .await
        .unwrap();
    admission
        .publish_voucher(&SeckillVoucher {
            voucher_id: 11,
            stock: 5,
            begin_time: now - time::Duration::hours(2),
            end_time: now - time::Duration::hours(1),
        })
        .await
        .unwrap();

    let user = UserContext::new(1);
    assert_eq!(
        admission.admit(&user, 10).await.unwrap_err(),
        CoreError::NotEligible(IneligibleReason::NotStarted)
    );
    assert_eq!(
        admission.admit(&user, 11).await.unwrap_err(),
        CoreError::NotEligible(IneligibleReason::Ended)
    );
    assert!(matches!(
        admission.admit(&user, 99).await.unwrap_err(),
        CoreError::NotFound { .. }
    ));

    let stats = server.shutdown().await;
    assert_eq!(stats.processed(), 0);
}

#[tokio::test]
async fn test_publication_after_not_found_lookup() {
    let (_, server) = server(AppConfig::default()).await;
    let admission = server.admission().clone();
    let user = UserContext::new(1);

    assert!(matches!(
        admission.admit(&user, 12).await.unwrap_err(),
        CoreError::NotFound { .. }
    ));
    admission.publish_voucher(&open_voucher(12, 1)).await.unwrap();
    assert!(admission.admit(&user, 12).await.is_ok());

    assert!(matches!(
        admission.publish_voucher(&open_voucher(12, 1)).await.unwrap_err(),
        CoreError::Conflict { .. }
    ));
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_full_queue_applies_backpressure_without_reserving() {
    let mut config = AppConfig::default();
    config.seckill.queue_capacity = 1;
    config.seckill.worker_retry =
        RetryPolicy::new(500, Duration::from_millis(5), Duration::from_millis(5));
    let (storage, server) = server(config).await;
    let admission = server.admission().clone();
    admission.publish_voucher(&open_voucher(4, 10)).await.unwrap();

    // Park the worker on user 1's order lock.
    let lock = DistributedLock::new(server.kv().clone());
    let held = lock
        .try_acquire_for("order", 1, Duration::from_secs(60))
        .await
        .unwrap()
        .unwrap();

    admission.admit(&UserContext::new(1), 4).await.unwrap();
    while admission.queue_depth() > 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    admission.admit(&UserContext::new(2), 4).await.unwrap();

    let err = admission.admit(&UserContext::new(3), 4).await.unwrap_err();
    assert!(matches!(err, CoreError::Backpressure { capacity: 1 }));
    assert!(err.is_retryable());

    held.release().await.unwrap();
    while admission.queue_depth() > 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    // The rejected attempt left no reservation behind.
    admission.admit(&UserContext::new(3), 4).await.unwrap();

    let stats = server.shutdown().await;
    assert_eq!(stats.persisted, 3);
    assert_eq!(storage.voucher_stock(4).await, Some(7));
}

#[tokio::test]
async fn test_admission_after_shutdown_is_transient() {
    let (_, server) = server(AppConfig::default()).await;
    let admission = server.admission().clone();
    admission.publish_voucher(&open_voucher(5, 3)).await.unwrap();
    server.shutdown().await;

    let err = admission.admit(&UserContext::new(1), 5).await.unwrap_err();
    assert!(matches!(err, CoreError::TransientStore { .. }));
}

#[tokio::test]
async fn test_failed_seeding_withdraws_voucher_for_republish() {
    let storage = Arc::new(InMemoryStorage::new());
    let kv = Arc::new(MemoryKv::new());
    let server = ServerBuilder::new()
        .with_kv(kv.clone())
        .with_stores(Stores::memory(storage.clone()))
        .build()
        .await
        .unwrap();

    kv.set_unavailable(true);
    let err = server
        .admission()
        .publish_voucher(&open_voucher(6, 5))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::TransientStore { .. }));
    assert_eq!(storage.voucher_stock(6).await, None);

    kv.set_unavailable(false);
    server
        .admission()
        .publish_voucher(&open_voucher(6, 5))
        .await
        .unwrap();
    let result = server.admission().admit(&UserContext::new(1), 6).await;
    assert_eq!(outcome(&result), "ok");

    let stats = server.shutdown().await;
    assert_eq!(stats.persisted, 1);
    assert_eq!(storage.voucher_stock(6).await, Some(4));
}
