//! Process-local key-value backend.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::{KvError, KvResult, KvStore, ReserveCode};

#[derive(Debug, Clone)]
enum Value {
    Bytes(Vec<u8>),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Default)]
struct Keyspace {
    slots: HashMap<String, Slot>,
}

impl Keyspace {
    /// Returns the live slot for `key`, dropping it first if it has expired.
    fn live(&mut self, key: &str) -> Option<&mut Slot> {
        let now = Instant::now();
        if self.slots.get(key).is_some_and(|slot| slot.is_expired(now)) {
            self.slots.remove(key);
        }
        self.slots.get_mut(key)
    }

    fn bytes(&mut self, key: &str) -> KvResult<Option<&Vec<u8>>> {
        match self.live(key) {
            None => Ok(None),
            Some(Slot {
                value: Value::Bytes(bytes),
                ..
            }) => Ok(Some(bytes)),
            Some(_) => Err(KvError::Command(format!(
                "WRONGTYPE key {key} holds a set"
            ))),
        }
    }

    fn integer(&mut self, key: &str) -> KvResult<Option<i64>> {
        match self.bytes(key)? {
            None => Ok(None),
            Some(bytes) => std::str::from_utf8(bytes)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .map(Some)
                .ok_or_else(|| KvError::unexpected(format!("{key} is not an integer"))),
        }
    }
}

/// In-memory [`KvStore`] for single-instance deployments and tests.
///
/// Expiry follows `tokio::time`, so paused-clock tests can step TTLs.
#[derive(Debug, Default)]
pub struct MemoryKv {
    keyspace: Mutex<Keyspace>,
    unavailable: AtomicBool,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails with a connection error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Remaining time to live of `key`, if it exists and has one.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let mut keyspace = self.keyspace.lock();
        let now = Instant::now();
        keyspace
            .live(key)
            .and_then(|slot| slot.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.keyspace
            .lock()
            .slots
            .values()
            .filter(|slot| !slot.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> KvResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(KvError::Connection("memory store marked unavailable".into()));
        }
        Ok(())
    }
}

fn deadline(ttl: Option<Duration>) -> Option<Instant> {
    ttl.map(|ttl| Instant::now() + ttl)
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>> {
        self.check()?;
        let mut keyspace = self.keyspace.lock();
        Ok(keyspace.bytes(key)?.cloned())
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> KvResult<()> {
        self.check()?;
        self.keyspace.lock().slots.insert(
            key.to_string(),
            Slot {
                value: Value::Bytes(value.to_vec()),
                expires_at: deadline(ttl),
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> KvResult<bool> {
        self.check()?;
        let mut keyspace = self.keyspace.lock();
        let existed = keyspace.live(key).is_some();
        keyspace.slots.remove(key);
        Ok(existed)
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> KvResult<bool> {
        self.check()?;
        let mut keyspace = self.keyspace.lock();
        if keyspace.live(key).is_some() {
            return Ok(false);
        }
        keyspace.slots.insert(
            key.to_string(),
            Slot {
                value: Value::Bytes(value.as_bytes().to_vec()),
                expires_at: deadline(Some(ttl)),
            },
        );
        Ok(true)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> KvResult<bool> {
        self.check()?;
        let mut keyspace = self.keyspace.lock();
        let matches = matches!(
            keyspace.live(key),
            Some(Slot { value: Value::Bytes(bytes), .. }) if bytes.as_slice() == expected.as_bytes()
        );
        if matches {
            keyspace.slots.remove(key);
        }
        Ok(matches)
    }

    async fn incr(&self, key: &str, ttl: Duration) -> KvResult<i64> {
        self.check()?;
        let mut keyspace = self.keyspace.lock();
        let next = keyspace
            .integer(key)?
            .unwrap_or(0)
            .checked_add(1)
            .ok_or_else(|| KvError::Command(format!("increment of {key} would overflow")))?;
        keyspace.slots.insert(
            key.to_string(),
            Slot {
                value: Value::Bytes(next.to_string().into_bytes()),
                expires_at: deadline(Some(ttl)),
            },
        );
        Ok(next)
    }

    async fn seckill_reserve(
        &self,
        stock_key: &str,
        buyers_key: &str,
        user: &str,
    ) -> KvResult<ReserveCode> {
        self.check()?;
        let mut keyspace = self.keyspace.lock();

        let already_bought = match keyspace.live(buyers_key) {
            Some(Slot {
                value: Value::Set(members),
                ..
            }) => members.contains(user),
            Some(_) => {
                return Err(KvError::Command(format!(
                    "WRONGTYPE key {buyers_key} is not a set"
                )));
            }
            None => false,
        };
        if already_bought {
            return Ok(ReserveCode::Duplicate);
        }

        let stock = keyspace.integer(stock_key)?.unwrap_or(0);
        if stock <= 0 {
            return Ok(ReserveCode::SoldOut);
        }

        if let Some(slot) = keyspace.live(stock_key) {
            slot.value = Value::Bytes((stock - 1).to_string().into_bytes());
        }
        // Expired or wrong-typed buyer slots were handled above.
        let buyers = keyspace
            .slots
            .entry(buyers_key.to_string())
            .or_insert_with(|| Slot {
                value: Value::Set(HashSet::new()),
                expires_at: None,
            });
        if let Value::Set(members) = &mut buyers.value {
            members.insert(user.to_string());
        }
        Ok(ReserveCode::Ok)
    }

    async fn seckill_seed(&self, stock_key: &str, buyers_key: &str, stock: i64) -> KvResult<()> {
        self.check()?;
        let mut keyspace = self.keyspace.lock();
        keyspace.slots.insert(
            stock_key.to_string(),
            Slot {
                value: Value::Bytes(stock.to_string().into_bytes()),
                expires_at: None,
            },
        );
        keyspace.slots.remove(buyers_key);
        Ok(())
    }

    async fn ping(&self) -> KvResult<()> {
        self.check()
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_set_with_ttl_expires() {
        let kv = MemoryKv::new();
        kv.set("k", b"v", Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(kv.get("k").await.unwrap(), Some(b"v".to_vec()));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(kv.get("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_nx_respects_existing_and_expiry() {
        let kv = MemoryKv::new();
        assert!(kv.set_nx("lock:a", "t1", Duration::from_secs(10)).await.unwrap());
        assert!(!kv.set_nx("lock:a", "t2", Duration::from_secs(10)).await.unwrap());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(kv.set_nx("lock:a", "t2", Duration::from_secs(10)).await.unwrap());
        assert_eq!(kv.get("lock:a").await.unwrap(), Some(b"t2".to_vec()));
    }

    #[tokio::test]
    async fn test_compare_and_delete() {
        let kv = MemoryKv::new();
        kv.set_nx("lock:a", "owner-1", Duration::from_secs(10))
            .await
            .unwrap();

        assert!(!kv.compare_and_delete("lock:a", "owner-2").await.unwrap());
        assert!(kv.get("lock:a").await.unwrap().is_some());
        assert!(kv.compare_and_delete("lock:a", "owner-1").await.unwrap());
        assert!(kv.get("lock:a").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_incr_applies_ttl() {
        let kv = MemoryKv::new();
        assert_eq!(kv.incr("icr:order:1", Duration::from_secs(2)).await.unwrap(), 1);
        assert_eq!(kv.incr("icr:order:1", Duration::from_secs(2)).await.unwrap(), 2);
        assert!(kv.ttl("icr:order:1").is_some());

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(kv.incr("icr:order:1", Duration::from_secs(2)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_incr_rejects_non_integer() {
        let kv = MemoryKv::new();
        kv.set("k", b"abc", None).await.unwrap();
        assert!(matches!(
            kv.incr("k", Duration::from_secs(1)).await,
            Err(KvError::UnexpectedReply(_))
        ));
    }

    #[tokio::test]
    async fn test_reserve_codes() {
        let kv = MemoryKv::new();
        kv.seckill_seed("stock", "buyers", 1).await.unwrap();

        assert_eq!(
            kv.seckill_reserve("stock", "buyers", "u1").await.unwrap(),
            ReserveCode::Ok
        );
        assert_eq!(
            kv.seckill_reserve("stock", "buyers", "u1").await.unwrap(),
            ReserveCode::Duplicate
        );
        assert_eq!(
            kv.seckill_reserve("stock", "buyers", "u2").await.unwrap(),
            ReserveCode::SoldOut
        );
        assert_eq!(kv.get("stock").await.unwrap(), Some(b"0".to_vec()));
    }

    #[tokio::test]
    async fn test_reserve_without_seed_is_sold_out() {
        let kv = MemoryKv::new();
        assert_eq!(
            kv.seckill_reserve("stock", "buyers", "u1").await.unwrap(),
            ReserveCode::SoldOut
        );
    }

    #[tokio::test]
    async fn test_seed_resets_buyers() {
        let kv = MemoryKv::new();
        kv.seckill_seed("stock", "buyers", 2).await.unwrap();
        kv.seckill_reserve("stock", "buyers", "u1").await.unwrap();
        kv.seckill_seed("stock", "buyers", 2).await.unwrap();

        assert_eq!(
            kv.seckill_reserve("stock", "buyers", "u1").await.unwrap(),
            ReserveCode::Ok
        );
    }

    #[tokio::test]
    async fn test_unavailable_fails_every_call() {
        let kv = MemoryKv::new();
        kv.set_unavailable(true);
        assert!(matches!(kv.get("k").await, Err(KvError::Connection(_))));
        assert!(kv.ping().await.is_err());
        kv.set_unavailable(false);
        assert!(kv.ping().await.is_ok());
    }
}
