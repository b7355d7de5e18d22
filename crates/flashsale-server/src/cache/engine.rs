//! Read-through cache over the key-value store with three rebuild policies.
//!
//! ## Policies
//!
//! | Policy | Miss | Expiry | Protects against |
//! |--------|------|--------|------------------|
//! | `CacheAside` | load, cache value or absent marker | physical TTL | penetration |
//! | `MutexRebuild` | one loader per key, others back off | physical TTL | breakdown |
//! | `LogicalExpiry` | reported as missing, never loads inline | logical, rebuilt in background | avalanche |
//!
//! Cache-store failures on read count as a miss. Store-of-record failures
//! reach the caller under the first two policies and only the background
//! rebuild under the third.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use flashsale_core::{CoreError, Result, RetryPolicy, millis_after, now_millis};
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::entry::CacheRecord;
use super::rebuild::{RebuildPool, RebuildStats, RebuildTask};
use crate::config::CacheConfig;
use crate::kv::{KvStore, keys};
use crate::lock::{DistributedLock, LockGuard};
use crate::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildPolicy {
    CacheAside,
    MutexRebuild,
    LogicalExpiry,
}

/// Outcome of a cached read.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheRead<T> {
    Fresh(T),
    /// Logically expired; a rebuild may be in flight.
    Stale(T),
    /// Absent in the store of record, or not cached under `LogicalExpiry`.
    Missing,
}

impl<T> CacheRead<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Fresh(value) | Self::Stale(value) => Some(value),
            Self::Missing => None,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale(_))
    }
}

/// How long a value written with [`CacheEngine::put`] stays valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlPolicy {
    /// Physical expiry in the key-value store.
    Physical(Duration),
    /// No physical expiry; stale after the given window.
    Logical(Duration),
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub ttl: Duration,
    pub null_ttl: Duration,
    pub lock_ttl: Duration,
    pub logical_ttl: Duration,
    pub mutex_retry: RetryPolicy,
    pub rebuild_retry: RetryPolicy,
}

impl From<&CacheConfig> for CacheSettings {
    fn from(config: &CacheConfig) -> Self {
        Self {
            ttl: config.ttl(),
            null_ttl: config.null_ttl(),
            lock_ttl: config.lock_ttl(),
            logical_ttl: config.logical_ttl(),
            mutex_retry: config.mutex_retry,
            rebuild_retry: config.rebuild_retry,
        }
    }
}

pub struct CacheEngine {
    kv: Arc<dyn KvStore>,
    lock: DistributedLock,
    pool: RebuildPool,
    settings: CacheSettings,
}

impl std::fmt::Debug for CacheEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEngine")
            .field("backend", &self.kv.backend())
            .field("settings", &self.settings)
            .field("pool", &self.pool)
            .finish()
    }
}

impl CacheEngine {
    /// Builds the engine and starts its rebuild pool on the current runtime.
    pub fn new(kv: Arc<dyn KvStore>, lock: DistributedLock, config: &CacheConfig) -> Self {
        Self {
            kv,
            lock,
            pool: RebuildPool::start(config.rebuild_workers, config.rebuild_queue),
            settings: CacheSettings::from(config),
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn rebuild_stats(&self) -> RebuildStats {
        self.pool.stats()
    }

    /// Default [`TtlPolicy`] for values cached under `policy`.
    pub fn ttl_for(&self, policy: RebuildPolicy) -> TtlPolicy {
        match policy {
            RebuildPolicy::LogicalExpiry => TtlPolicy::Logical(self.settings.logical_ttl),
            RebuildPolicy::CacheAside | RebuildPolicy::MutexRebuild => {
                TtlPolicy::Physical(self.settings.ttl)
            }
        }
    }

    /// Reads `cache:<entity>:<id>` under `policy`, calling `loader` against
    /// the store of record when a rebuild is needed.
    pub async fn get<T, F, Fut>(
        &self,
        entity: &str,
        id: impl Display,
        policy: RebuildPolicy,
        loader: F,
    ) -> Result<CacheRead<T>>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<T>>> + Send + 'static,
    {
        let key = keys::cache(entity, &id);
        match policy {
            RebuildPolicy::CacheAside => self.get_cache_aside(entity, &key, &loader).await,
            RebuildPolicy::MutexRebuild => {
                let lock_key = keys::lock(entity, &id);
                self.get_with_mutex(entity, &key, &lock_key, &loader).await
            }
            RebuildPolicy::LogicalExpiry => {
                let lock_key = keys::lock(entity, &id);
                self.get_logical(entity, &key, &lock_key, loader).await
            }
        }
    }

    /// Writes a value directly.
    pub async fn put<T: Serialize>(
        &self,
        entity: &str,
        id: impl Display,
        value: &T,
        ttl: TtlPolicy,
    ) -> Result<()> {
        let key = keys::cache(entity, id);
        let (record, physical) = match ttl {
            TtlPolicy::Physical(ttl) => (CacheRecord::value(value), Some(ttl)),
            TtlPolicy::Logical(window) => (
                CacheRecord::logical(value, millis_after(now_millis(), window)),
                None,
            ),
        };
        store_record(self.kv.as_ref(), &key, &record, physical).await
    }

    /// Drops the cached entry; returns whether one existed.
    pub async fn invalidate(&self, entity: &str, id: impl Display) -> Result<bool> {
        let key = keys::cache(entity, id);
        let removed = self.kv.del(&key).await?;
        tracing::debug!(key = %key, removed, "cache invalidated");
        Ok(removed)
    }

    /// Stops scheduling rebuilds and waits for in-flight ones.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }

    async fn read_record<T: DeserializeOwned>(&self, key: &str) -> Result<Option<CacheRecord<T>>> {
        match self.kv.get(key).await {
            Ok(Some(bytes)) => CacheRecord::decode(&bytes).map(Some),
            Ok(None) => Ok(None),
            Err(e) => {
                tracing::warn!(key, error = %e, "cache read failed, treating as miss");
                metrics::record_cache_store_error("get");
                Ok(None)
            }
        }
    }

    async fn get_cache_aside<T, F, Fut>(
        &self,
        entity: &str,
        key: &str,
        loader: &F,
    ) -> Result<CacheRead<T>>
    where
        T: Serialize + DeserializeOwned,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        if let Some(record) = self.read_record(key).await? {
            return Ok(hit(entity, record));
        }
        metrics::record_cache_miss(entity);
        self.load_and_populate(key, loader).await
    }

    async fn get_with_mutex<T, F, Fut>(
        &self,
        entity: &str,
        key: &str,
        lock_key: &str,
        loader: &F,
    ) -> Result<CacheRead<T>>
    where
        T: Serialize + DeserializeOwned,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        let attempt = move || self.mutex_attempt(entity, key, lock_key, loader);
        self.settings
            .mutex_retry
            .run("cache_mutex_rebuild", attempt)
            .await
    }

    async fn mutex_attempt<T, F, Fut>(
        &self,
        entity: &str,
        key: &str,
        lock_key: &str,
        loader: &F,
    ) -> Result<CacheRead<T>>
    where
        T: Serialize + DeserializeOwned,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        if let Some(record) = self.read_record(key).await? {
            return Ok(hit(entity, record));
        }
        match self.lock.try_acquire(lock_key, self.settings.lock_ttl).await {
            Ok(Some(guard)) => {
                let result = self.rebuild_locked(entity, key, loader).await;
                release(guard).await;
                result
            }
            Ok(None) => Err(CoreError::lock_unavailable(lock_key)),
            Err(e) => {
                // No lock service means no coordination; read through.
                tracing::warn!(key, error = %e, "rebuild lock unavailable, reading through");
                metrics::record_cache_store_error("lock");
                metrics::record_cache_miss(entity);
                self.load_and_populate(key, loader).await
            }
        }
    }

    /// Runs under the rebuild lock.
    async fn rebuild_locked<T, F, Fut>(
        &self,
        entity: &str,
        key: &str,
        loader: &F,
    ) -> Result<CacheRead<T>>
    where
        T: Serialize + DeserializeOwned,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        // A previous holder may have just populated the key.
        if let Some(record) = self.read_record(key).await? {
            return Ok(hit(entity, record));
        }
        metrics::record_cache_miss(entity);
        let result = self.load_and_populate(key, loader).await;
        metrics::record_cache_rebuild(
            entity,
            match &result {
                Ok(CacheRead::Missing) => "absent",
                Ok(_) => "ok",
                Err(_) => "failed",
            },
        );
        result
    }

    async fn load_and_populate<T, F, Fut>(&self, key: &str, loader: &F) -> Result<CacheRead<T>>
    where
        T: Serialize,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        match loader().await? {
            Some(value) => {
                let written = store_record(
                    self.kv.as_ref(),
                    key,
                    &CacheRecord::value(&value),
                    Some(self.settings.ttl),
                )
                .await;
                tolerate_store_failure(key, written)?;
                Ok(CacheRead::Fresh(value))
            }
            None => {
                let written = store_record(
                    self.kv.as_ref(),
                    key,
                    &CacheRecord::<T>::Absent,
                    Some(self.settings.null_ttl),
                )
                .await;
                tolerate_store_failure(key, written)?;
                Ok(CacheRead::Missing)
            }
        }
    }

    async fn get_logical<T, F, Fut>(
        &self,
        entity: &str,
        key: &str,
        lock_key: &str,
        loader: F,
    ) -> Result<CacheRead<T>>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<T>>> + Send + 'static,
    {
        let Some(record) = self.read_record::<T>(key).await? else {
            metrics::record_cache_miss(entity);
            return Ok(CacheRead::Missing);
        };
        let stale = record.is_stale(now_millis());
        let value = match record {
            CacheRecord::Absent => return Ok(hit(entity, CacheRecord::Absent)),
            CacheRecord::Value { value, .. } => value,
        };
        if !stale {
            metrics::record_cache_hit(entity, "value");
            return Ok(CacheRead::Fresh(value));
        }
        metrics::record_cache_hit(entity, "stale");

        let guard = match self.lock.try_acquire(lock_key, self.settings.lock_ttl).await {
            Ok(Some(guard)) => guard,
            Ok(None) => return Ok(CacheRead::Stale(value)),
            Err(e) => {
                tracing::warn!(key, error = %e, "rebuild lock unavailable, serving stale value");
                metrics::record_cache_store_error("lock");
                return Ok(CacheRead::Stale(value));
            }
        };

        // A rebuild may have finished between the first read and the lock.
        if let Ok(Some(current)) = self.read_record::<T>(key).await {
            if !current.is_stale(now_millis()) {
                release(guard).await;
                return Ok(hit(entity, current));
            }
        }

        let task = self.rebuild_task(entity, key, guard, loader);
        if self.pool.schedule(task).is_err() {
            // Dropping the task drops its guard, which releases the lock.
            metrics::record_cache_rebuild(entity, "skipped");
            tracing::warn!(key, "rebuild queue unavailable, serving stale value");
        }
        Ok(CacheRead::Stale(value))
    }

    fn rebuild_task<T, F, Fut>(
        &self,
        entity: &str,
        key: &str,
        guard: LockGuard,
        loader: F,
    ) -> RebuildTask
    where
        T: Serialize + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<T>>> + Send + 'static,
    {
        let kv = self.kv.clone();
        let settings = self.settings.clone();
        let entity = entity.to_string();
        let task_key = key.to_string();

        let job = async move {
            let outcome = rebuild_logical(kv.as_ref(), &task_key, &settings, &loader).await;
            match &outcome {
                Ok(found) => {
                    metrics::record_cache_rebuild(&entity, if *found { "ok" } else { "absent" });
                    tracing::debug!(key = %task_key, found, "logical-expiry rebuild finished");
                }
                Err(e) => {
                    metrics::record_cache_rebuild(&entity, "failed");
                    tracing::warn!(
                        key = %task_key,
                        error = %e,
                        category = %e.category(),
                        "logical-expiry rebuild failed, stale value kept"
                    );
                }
            }
            release(guard).await;
        }
        .boxed();

        RebuildTask::new(key, job)
    }
}

/// Reloads one logically expiring entry. Returns whether the entity exists.
async fn rebuild_logical<T, F, Fut>(
    kv: &dyn KvStore,
    key: &str,
    settings: &CacheSettings,
    loader: &F,
) -> Result<bool>
where
    T: Serialize,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let loaded = settings
        .rebuild_retry
        .run("cache_logical_rebuild", loader)
        .await?;
    match loaded {
        Some(value) => {
            let expiry = millis_after(now_millis(), settings.logical_ttl);
            store_record(kv, key, &CacheRecord::logical(&value, expiry), None).await?;
            Ok(true)
        }
        None => {
            store_record(kv, key, &CacheRecord::<T>::Absent, Some(settings.null_ttl)).await?;
            Ok(false)
        }
    }
}

async fn store_record<T: Serialize>(
    kv: &dyn KvStore,
    key: &str,
    record: &CacheRecord<T>,
    ttl: Option<Duration>,
) -> Result<()> {
    let bytes = record.encode()?;
    kv.set(key, &bytes, ttl).await?;
    Ok(())
}

/// Populating the cache after a load is best effort; transient store
/// failures are logged and the loaded value is still returned.
fn tolerate_store_failure(key: &str, written: Result<()>) -> Result<()> {
    match written {
        Err(e) if e.is_retryable() => {
            tracing::warn!(key, error = %e, "cache write failed");
            metrics::record_cache_store_error("set");
            Ok(())
        }
        other => other,
    }
}

fn hit<T>(entity: &str, record: CacheRecord<T>) -> CacheRead<T> {
    match record {
        CacheRecord::Value { value, .. } => {
            metrics::record_cache_hit(entity, "value");
            CacheRead::Fresh(value)
        }
        CacheRecord::Absent => {
            metrics::record_cache_hit(entity, "absent");
            CacheRead::Missing
        }
    }
}

async fn release(guard: LockGuard) {
    if let Err(e) = guard.release().await {
        tracing::warn!(error = %e, "failed to release rebuild lock");
    }
}
