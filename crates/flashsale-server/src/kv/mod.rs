//! Low-latency key-value store abstraction.
//!
//! ## Backends
//!
//! - **Redis**: shared across instances; atomic operations run as Lua
//!   scripts or MULTI/EXEC pipelines
//! - **Memory**: single-process; every operation runs inside one critical
//!   section, which gives the same atomicity the scripts give on Redis
//!
//! Both backends expose exactly the same semantics, so the lock, the id
//! generator, the cache engine and the admission path are backend-agnostic.

pub mod memory;
pub mod redis_store;

use std::time::Duration;

use async_trait::async_trait;
use flashsale_core::CoreError;

pub use self::memory::MemoryKv;
pub use self::redis_store::{RedisKv, create_redis_pool};

/// Key builders for every namespace the services write.
pub mod keys {
    /// `cache:<entity>:<id>`
    pub fn cache(entity: &str, id: impl std::fmt::Display) -> String {
        format!("cache:{entity}:{id}")
    }

    /// `lock:<resource>:<id>`
    pub fn lock(resource: &str, id: impl std::fmt::Display) -> String {
        format!("lock:{resource}:{id}")
    }

    /// Remaining flash-sale stock for a voucher.
    pub fn seckill_stock(voucher_id: u64) -> String {
        format!("seckill:stock:{voucher_id}")
    }

    /// Set of users that already reserved a voucher.
    pub fn seckill_buyers(voucher_id: u64) -> String {
        format!("seckill:buyers:{voucher_id}")
    }

    /// Per-second sequence counter for an id tag.
    pub fn id_sequence(tag: &str, timestamp: u64) -> String {
        format!("icr:{tag}:{timestamp}")
    }
}

/// Result code of the atomic eligibility script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i64)]
pub enum ReserveCode {
    Ok = 0,
    SoldOut = 1,
    Duplicate = 2,
}

impl ReserveCode {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Ok),
            1 => Some(Self::SoldOut),
            2 => Some(Self::Duplicate),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::SoldOut => "sold_out",
            Self::Duplicate => "duplicate",
        }
    }
}

/// Errors raised by a key-value backend.
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("KV connection error: {0}")]
    Connection(String),

    #[error("KV command error: {0}")]
    Command(String),

    /// The store answered with something no well-formed state can produce.
    #[error("Unexpected KV reply: {0}")]
    UnexpectedReply(String),
}

impl KvError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::UnexpectedReply(message.into())
    }
}

impl From<::redis::RedisError> for KvError {
    fn from(err: ::redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_timeout() {
            Self::Connection(err.to_string())
        } else {
            Self::Command(err.to_string())
        }
    }
}

impl From<deadpool_redis::PoolError> for KvError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        Self::Connection(err.to_string())
    }
}

impl From<KvError> for CoreError {
    fn from(err: KvError) -> Self {
        match err {
            KvError::UnexpectedReply(message) => CoreError::corruption(message),
            other => CoreError::transient(other.to_string()),
        }
    }
}

pub type KvResult<T> = std::result::Result<T, KvError>;

/// Narrow interface to the low-latency store.
///
/// Every method is a single atomic unit on the backend.
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    /// Reads a byte value; expired or missing keys read as `None`.
    async fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>>;

    /// Writes a byte value, with a physical TTL or none.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> KvResult<()>;

    /// Deletes a key, returning whether it existed.
    async fn del(&self, key: &str) -> KvResult<bool>;

    /// Set-if-absent with expiry (`SET key value NX PX ttl`).
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> KvResult<bool>;

    /// Deletes `key` only if it currently holds `expected`.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> KvResult<bool>;

    /// Increments a counter and applies `ttl` in the same atomic unit.
    async fn incr(&self, key: &str, ttl: Duration) -> KvResult<i64>;

    /// Runs the eligibility check: membership in `buyers_key` first, then
    /// stock; on success decrements stock and records the user.
    async fn seckill_reserve(
        &self,
        stock_key: &str,
        buyers_key: &str,
        user: &str,
    ) -> KvResult<ReserveCode>;

    /// Sets stock and clears the purchased-user set atomically.
    async fn seckill_seed(&self, stock_key: &str, buyers_key: &str, stock: i64) -> KvResult<()>;

    async fn ping(&self) -> KvResult<()>;

    /// Backend name for logs and health output.
    fn backend(&self) -> &'static str;
}
