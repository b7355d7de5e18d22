//! Distributed lock ownership and id uniqueness over a shared store.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use flashsale_server::config::IdConfig;
use flashsale_server::id_worker::{IdGenerator, decompose};
use flashsale_server::kv::{KvStore, MemoryKv};
use flashsale_server::lock::DistributedLock;

#[tokio::test(start_paused = true)]
async fn test_expired_holder_cannot_release_new_owner() {
    let kv = Arc::new(MemoryKv::new());
    let process_a = DistributedLock::new(kv.clone());
    let process_b = DistributedLock::new(kv.clone());

    let a = process_a
        .try_acquire("lock:shop:1", Duration::from_secs(10))
        .await
        .unwrap()
        .unwrap();
    let token_a = a.token().unwrap().clone();

    tokio::time::advance(Duration::from_secs(11)).await;

    let b = process_b
        .try_acquire("lock:shop:1", Duration::from_secs(10))
        .await
        .unwrap()
        .expect("expired lock is free again");
    let token_b = b.token().unwrap().clone();
    assert_ne!(token_a.owner_id, token_b.owner_id);

    assert!(!process_a.release(&token_a).await.unwrap());
    assert!(!a.release().await.unwrap());
    assert_eq!(
        kv.get("lock:shop:1").await.unwrap(),
        Some(token_b.owner_id.clone().into_bytes())
    );

    assert!(b.release().await.unwrap());
    assert!(kv.get("lock:shop:1").await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_only_one_concurrent_acquirer_wins() {
    let kv = Arc::new(MemoryKv::new());
    let attempts: Vec<_> = (0..32)
        .map(|_| {
            let lock = DistributedLock::new(kv.clone());
            tokio::spawn(async move {
                lock.try_acquire("lock:order:9", Duration::from_secs(30))
                    .await
                    .unwrap()
            })
        })
        .collect();

    // Keep every guard alive until all attempts have finished.
    let mut guards = Vec::new();
    for attempt in attempts {
        guards.push(attempt.await.unwrap());
    }
    assert_eq!(guards.iter().filter(|g| g.is_some()).count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_generators_sharing_a_store_never_collide() {
    let kv = Arc::new(MemoryKv::new());
    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let ids = IdGenerator::new(kv.clone(), &IdConfig::default());
            tokio::spawn(async move {
                let mut issued = Vec::with_capacity(100);
                for _ in 0..100 {
                    issued.push(ids.next_id("order").await.unwrap());
                }
                issued
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for task in tasks {
        let issued = task.await.unwrap();
        assert!(issued.windows(2).all(|w| w[0] < w[1]));
        for id in issued {
            assert!(decompose(id).1 >= 1);
            assert!(seen.insert(id), "duplicate id {id}");
        }
    }
    assert_eq!(seen.len(), 800);
}
