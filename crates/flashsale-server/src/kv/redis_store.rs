//! Redis key-value backend over a deadpool connection pool.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Pool, Runtime};
use redis::{AsyncCommands, Script};

use super::{KvError, KvResult, KvStore, ReserveCode};
use crate::config::RedisConfig;

static UNLOCK_SCRIPT: LazyLock<Script> =
    LazyLock::new(|| Script::new(include_str!("scripts/unlock.lua")));

static SECKILL_SCRIPT: LazyLock<Script> =
    LazyLock::new(|| Script::new(include_str!("scripts/seckill.lua")));

static SEED_SCRIPT: LazyLock<Script> =
    LazyLock::new(|| Script::new(include_str!("scripts/seed.lua")));

/// Creates a deadpool Redis pool from configuration.
///
/// The pool is lazy; call [`KvStore::ping`] to verify connectivity.
pub fn create_redis_pool(config: &RedisConfig) -> KvResult<Pool> {
    let mut redis_config = deadpool_redis::Config::from_url(&config.url);
    let timeout = Some(Duration::from_millis(config.timeout_ms));
    let mut pool_config = redis_config.pool.unwrap_or_default();
    pool_config.max_size = config.pool_size;
    pool_config.timeouts.wait = timeout;
    pool_config.timeouts.create = timeout;
    pool_config.timeouts.recycle = timeout;
    redis_config.pool = Some(pool_config);

    redis_config
        .create_pool(Some(Runtime::Tokio1))
        .map_err(|e| KvError::Connection(format!("failed to create Redis pool: {e}")))
}

fn millis(ttl: Duration) -> u64 {
    // PX 0 is rejected by Redis.
    (ttl.as_millis() as u64).max(1)
}

/// [`KvStore`] backed by Redis.
#[derive(Clone)]
pub struct RedisKv {
    pool: Pool,
}

impl std::fmt::Debug for RedisKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisKv")
            .field("status", &self.pool.status())
            .finish()
    }
}

impl RedisKv {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn from_config(config: &RedisConfig) -> KvResult<Self> {
        Ok(Self::new(create_redis_pool(config)?))
    }

    async fn conn(&self) -> KvResult<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>> {
        let mut conn = self.conn().await?;
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> KvResult<()> {
        let mut conn = self.conn().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(millis(ttl));
        }
        let _: () = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> KvResult<bool> {
        let mut conn = self.conn().await?;
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> KvResult<bool> {
        let mut conn = self.conn().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> KvResult<bool> {
        let mut conn = self.conn().await?;
        let removed: i64 = UNLOCK_SCRIPT
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed == 1)
    }

    async fn incr(&self, key: &str, ttl: Duration) -> KvResult<i64> {
        let mut conn = self.conn().await?;
        let (value,): (i64,) = redis::pipe()
            .atomic()
            .incr(key, 1)
            .pexpire(key, millis(ttl) as i64)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn seckill_reserve(
        &self,
        stock_key: &str,
        buyers_key: &str,
        user: &str,
    ) -> KvResult<ReserveCode> {
        let mut conn = self.conn().await?;
        let code: i64 = SECKILL_SCRIPT
            .key(stock_key)
            .key(buyers_key)
            .arg(user)
            .invoke_async(&mut conn)
            .await?;
        ReserveCode::from_code(code)
            .ok_or_else(|| KvError::unexpected(format!("unknown reserve code {code}")))
    }

    async fn seckill_seed(&self, stock_key: &str, buyers_key: &str, stock: i64) -> KvResult<()> {
        let mut conn = self.conn().await?;
        let _: i64 = SEED_SCRIPT
            .key(stock_key)
            .key(buyers_key)
            .arg(stock)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn ping(&self) -> KvResult<()> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
