//! Distributed mutual exclusion over the key-value store.
//!
//! A lock is a key in the `lock:<resource>:<id>` namespace holding the
//! owner token of whoever acquired it. Acquisition is a single set-if-absent
//! with expiry; release is a single compare-and-delete, so a holder whose
//! lock already expired can never delete a lock that somebody else now owns.
//!
//! There is no lease renewal. A critical section that outlives the TTL
//! silently loses the lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use flashsale_core::Result;

use crate::kv::{KvStore, keys};

/// Identity of one successful acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    pub key: String,
    pub owner_id: String,
    pub ttl: Duration,
}

/// Factory for lock acquisitions against a shared store.
#[derive(Clone)]
pub struct DistributedLock {
    kv: Arc<dyn KvStore>,
    process_id: Arc<str>,
    attempts: Arc<AtomicU64>,
}

impl std::fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLock")
            .field("backend", &self.kv.backend())
            .field("process_id", &self.process_id)
            .finish()
    }
}

impl DistributedLock {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            process_id: uuid::Uuid::new_v4().simple().to_string().into(),
            attempts: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Owner ids are never reused: process id, attempt counter and a random
    /// suffix.
    fn next_owner_id(&self) -> String {
        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed);
        format!(
            "{}-{}-{:08x}",
            self.process_id,
            attempt,
            rand::random::<u32>()
        )
    }

    /// Non-blocking acquisition of `lock:<resource>:<id>`.
    pub async fn try_acquire_for(
        &self,
        resource: &str,
        id: impl std::fmt::Display,
        ttl: Duration,
    ) -> Result<Option<LockGuard>> {
        self.try_acquire(&keys::lock(resource, id), ttl).await
    }

    /// Non-blocking acquisition of an already namespaced lock key.
    ///
    /// Returns `Ok(None)` when another owner holds the lock.
    pub async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockGuard>> {
        let owner_id = self.next_owner_id();
        if !self.kv.set_nx(key, &owner_id, ttl).await? {
            tracing::trace!(key, "lock busy");
            return Ok(None);
        }
        tracing::trace!(key, owner = %owner_id, "lock acquired");
        Ok(Some(LockGuard {
            kv: self.kv.clone(),
            token: Some(LockToken {
                key: key.to_string(),
                owner_id,
                ttl,
            }),
        }))
    }

    /// Releases the lock only if `token` still owns it.
    ///
    /// Returns `false` when the lock expired or belongs to someone else.
    pub async fn release(&self, token: &LockToken) -> Result<bool> {
        release_token(self.kv.as_ref(), token).await
    }
}

async fn release_token(kv: &dyn KvStore, token: &LockToken) -> Result<bool> {
    let released = kv.compare_and_delete(&token.key, &token.owner_id).await?;
    if !released {
        tracing::debug!(key = %token.key, "lock was no longer owned at release");
    }
    Ok(released)
}

/// A held lock.
///
/// Call [`LockGuard::release`] on every exit path that can await. If the
/// guard is dropped without it (early return, panic, cancellation) the
/// release is spawned onto the current runtime; without a runtime the lock
/// is left to expire.
#[must_use = "dropping the guard releases the lock"]
pub struct LockGuard {
    kv: Arc<dyn KvStore>,
    token: Option<LockToken>,
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").field("token", &self.token).finish()
    }
}

impl LockGuard {
    pub fn token(&self) -> Option<&LockToken> {
        self.token.as_ref()
    }

    pub async fn release(mut self) -> Result<bool> {
        match self.token.take() {
            Some(token) => release_token(self.kv.as_ref(), &token).await,
            None => Ok(false),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let kv = self.kv.clone();
                handle.spawn(async move {
                    if let Err(e) = release_token(kv.as_ref(), &token).await {
                        tracing::warn!(key = %token.key, error = %e, "deferred lock release failed");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(key = %token.key, "lock guard dropped outside a runtime; lock will expire");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    fn lock() -> (Arc<MemoryKv>, DistributedLock) {
        let kv = Arc::new(MemoryKv::new());
        (kv.clone(), DistributedLock::new(kv))
    }

    #[tokio::test]
    async fn test_second_acquire_fails_while_held() {
        let (_, lock) = lock();
        let guard = lock
            .try_acquire_for("shop", 1, Duration::from_secs(10))
            .await
            .unwrap()
            .expect("first acquire succeeds");
        assert_eq!(guard.token().unwrap().key, "lock:shop:1");

        assert!(
            lock.try_acquire_for("shop", 1, Duration::from_secs(10))
                .await
                .unwrap()
                .is_none()
        );
        assert!(guard.release().await.unwrap());
        assert!(
            lock.try_acquire_for("shop", 1, Duration::from_secs(10))
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_owner_ids_are_unique() {
        let (_, lock) = lock();
        let a = lock.next_owner_id();
        let b = lock.next_owner_id();
        assert_ne!(a, b);
        assert!(a.starts_with(&*lock.process_id));
    }

    #[tokio::test]
    async fn test_release_with_foreign_token_is_noop() {
        let (kv, lock) = lock();
        let guard = lock
            .try_acquire("lock:order:7", Duration::from_secs(10))
            .await
            .unwrap()
            .unwrap();

        let forged = LockToken {
            key: "lock:order:7".into(),
            owner_id: "someone-else".into(),
            ttl: Duration::from_secs(10),
        };
        assert!(!lock.release(&forged).await.unwrap());
        assert!(kv.get("lock:order:7").await.unwrap().is_some());

        assert!(guard.release().await.unwrap());
    }

    #[tokio::test]
    async fn test_dropped_guard_releases_in_background() {
        let (kv, lock) = lock();
        {
            let _guard = lock
                .try_acquire("lock:shop:2", Duration::from_secs(10))
                .await
                .unwrap()
                .unwrap();
        }
        // Let the spawned release run.
        for _ in 0..10 {
            if kv.get("lock:shop:2").await.unwrap().is_none() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(kv.get("lock:shop:2").await.unwrap().is_none());
    }

    #[test]
    fn test_guard_dropped_outside_runtime_leaves_lock_to_expire() {
        let (kv, lock) = lock();
        let guard = tokio_test::block_on(lock.try_acquire("lock:shop:4", Duration::from_secs(10)))
            .unwrap()
            .unwrap();
        drop(guard);
        let held = tokio_test::block_on(kv.get("lock:shop:4")).unwrap();
        assert!(held.is_some());
    }

    #[tokio::test]
    async fn test_acquire_surfaces_store_errors() {
        let (kv, lock) = lock();
        kv.set_unavailable(true);
        let err = lock
            .try_acquire("lock:shop:3", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
