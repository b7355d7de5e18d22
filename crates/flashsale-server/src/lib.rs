//! Cache-consistency engine and flash-sale admission pipeline.
//!
//! - [`cache`]: read-through caching with cache-aside, mutex-guarded and
//!   logical-expiry rebuild policies
//! - [`lock`]: token-verified distributed locks
//! - [`id_worker`]: time-sortable 64-bit ids from a shared counter
//! - [`seckill`]: atomic admission plus a single durable order worker
//! - [`kv`]: the Redis / in-memory key-value store all of the above share

pub mod cache;
pub mod config;
pub mod id_worker;
pub mod kv;
pub mod lock;
pub mod metrics;
pub mod observability;
pub mod seckill;
pub mod server;

use std::sync::Arc;

pub use cache::{CacheEngine, CacheRead, RebuildPolicy, ShopCatalog, TtlPolicy};
pub use config::{AppConfig, RedisConfig};
pub use id_worker::IdGenerator;
pub use kv::{KvStore, MemoryKv, RedisKv};
pub use lock::{DistributedLock, LockGuard, LockToken};
pub use seckill::{OrderWorker, OrderWorkerHandle, SeckillAdmission, WorkerStats};
pub use server::{FlashsaleServer, ServerBuilder, Stores};

/// Creates the key-value backend from configuration.
///
/// Falls back to a process-local store when Redis is disabled or
/// unreachable; locks and stock counters are then only valid within this
/// process.
pub async fn create_kv_backend(config: &RedisConfig) -> Arc<dyn KvStore> {
    if !config.enabled {
        tracing::info!("Redis disabled, using in-memory key-value store");
        return Arc::new(MemoryKv::new());
    }

    tracing::info!(url = %config.url, "Connecting to Redis");

    let redis = match RedisKv::from_config(config) {
        Ok(redis) => redis,
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to create Redis pool. Falling back to in-memory store."
            );
            return Arc::new(MemoryKv::new());
        }
    };

    match redis.ping().await {
        Ok(()) => {
            tracing::info!("Connected to Redis");
            Arc::new(redis)
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to connect to Redis. Falling back to in-memory store."
            );
            Arc::new(MemoryKv::new())
        }
    }
}
