use std::net::SocketAddr;
use std::time::Duration;

use flashsale_core::RetryPolicy;
use flashsale_db_postgres::PostgresConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub redis: RedisConfig,
    /// Store of record; the in-memory store is used when absent.
    #[serde(default)]
    pub postgres: Option<PostgresConfig>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub seckill: SeckillConfig,
    #[serde(default)]
    pub id: IdConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.redis.enabled && self.redis.url.trim().is_empty() {
            return Err("redis.enabled=true requires redis.url".into());
        }
        if self.redis.pool_size == 0 {
            return Err("redis.pool_size must be > 0".into());
        }
        if let Some(pg) = &self.postgres {
            if pg.url.trim().is_empty() {
                return Err("postgres.url must not be empty".into());
            }
            if pg.pool_size == 0 {
                return Err("postgres.pool_size must be > 0".into());
            }
        }
        // Cache validations
        if self.cache.ttl_secs == 0 || self.cache.logical_ttl_secs == 0 {
            return Err("cache TTLs must be > 0".into());
        }
        if self.cache.null_ttl_secs == 0 {
            return Err("cache.null_ttl_secs must be > 0".into());
        }
        if self.cache.lock_ttl_secs == 0 {
            return Err("cache.lock_ttl_secs must be > 0".into());
        }
        if self.cache.rebuild_workers == 0 || self.cache.rebuild_queue == 0 {
            return Err("cache.rebuild_workers and cache.rebuild_queue must be > 0".into());
        }
        if self.cache.mutex_retry.max_attempts == 0 {
            return Err("cache.mutex_retry.max_attempts must be > 0".into());
        }
        // Seckill validations
        if self.seckill.queue_capacity == 0 {
            return Err("seckill.queue_capacity must be > 0".into());
        }
        if self.seckill.order_lock_ttl_secs == 0 {
            return Err("seckill.order_lock_ttl_secs must be > 0".into());
        }
        if self.seckill.worker_retry.max_attempts == 0 {
            return Err("seckill.worker_retry.max_attempts must be > 0".into());
        }
        // Id validations
        if self.id.epoch_secs > u32::MAX as u64 {
            return Err("id.epoch_secs must fit in 32 bits".into());
        }
        if self.id.sequence_key_ttl_secs == 0 {
            return Err("id.sequence_key_ttl_secs must be > 0".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }
}

/// Redis configuration for the shared key-value store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Use Redis; falls back to the in-memory store when disabled or unreachable
    #[serde(default = "default_redis_enabled")]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_redis_enabled() -> bool {
    false
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    16
}

fn default_redis_timeout_ms() -> u64 {
    2000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: default_redis_enabled(),
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
        }
    }
}

/// Cache-consistency engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Physical TTL of cached values (policies 1 and 2)
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    /// Physical TTL of the absent marker
    #[serde(default = "default_null_ttl_secs")]
    pub null_ttl_secs: u64,
    /// TTL of the per-key rebuild lock
    #[serde(default = "default_cache_lock_ttl_secs")]
    pub lock_ttl_secs: u64,
    /// Logical expiry window for policy 3 entries
    #[serde(default = "default_logical_ttl_secs")]
    pub logical_ttl_secs: u64,
    /// Rebuild pool size
    #[serde(default = "default_rebuild_workers")]
    pub rebuild_workers: usize,
    /// Pending rebuild tasks before new ones are skipped
    #[serde(default = "default_rebuild_queue")]
    pub rebuild_queue: usize,
    /// Backoff for readers that lose the rebuild lock under policy 2
    #[serde(default = "default_mutex_retry")]
    pub mutex_retry: RetryPolicy,
    /// Retry policy for store reads inside a rebuild
    #[serde(default)]
    pub rebuild_retry: RetryPolicy,
}

fn default_cache_ttl_secs() -> u64 {
    30 * 60
}

fn default_null_ttl_secs() -> u64 {
    2 * 60
}

fn default_cache_lock_ttl_secs() -> u64 {
    10
}

fn default_logical_ttl_secs() -> u64 {
    20
}

fn default_rebuild_workers() -> usize {
    10
}

fn default_rebuild_queue() -> usize {
    1024
}

fn default_mutex_retry() -> RetryPolicy {
    RetryPolicy::new(20, Duration::from_millis(50), Duration::from_millis(400))
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl_secs(),
            null_ttl_secs: default_null_ttl_secs(),
            lock_ttl_secs: default_cache_lock_ttl_secs(),
            logical_ttl_secs: default_logical_ttl_secs(),
            rebuild_workers: default_rebuild_workers(),
            rebuild_queue: default_rebuild_queue(),
            mutex_retry: default_mutex_retry(),
            rebuild_retry: RetryPolicy::default(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn null_ttl(&self) -> Duration {
        Duration::from_secs(self.null_ttl_secs)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn logical_ttl(&self) -> Duration {
        Duration::from_secs(self.logical_ttl_secs)
    }
}

/// Flash-sale admission and order worker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeckillConfig {
    /// Max outstanding unpersisted orders before producers receive backpressure
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// TTL of the worker's per-user lock
    #[serde(default = "default_order_lock_ttl_secs")]
    pub order_lock_ttl_secs: u64,
    /// Retry policy for lock contention and transient store errors in the worker
    #[serde(default)]
    pub worker_retry: RetryPolicy,
}

fn default_queue_capacity() -> usize {
    1024 * 1024
}

fn default_order_lock_ttl_secs() -> u64 {
    1200
}

impl Default for SeckillConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            order_lock_ttl_secs: default_order_lock_ttl_secs(),
            worker_retry: RetryPolicy::default(),
        }
    }
}

impl SeckillConfig {
    pub fn order_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.order_lock_ttl_secs)
    }
}

/// Id generator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdConfig {
    /// Custom epoch, in seconds since the Unix epoch
    #[serde(default = "default_epoch_secs")]
    pub epoch_secs: u64,
    /// TTL of each per-second sequence counter
    #[serde(default = "default_sequence_key_ttl_secs")]
    pub sequence_key_ttl_secs: u64,
}

fn default_epoch_secs() -> u64 {
    // 2022-01-01T00:00:00Z
    1_640_995_200
}

fn default_sequence_key_ttl_secs() -> u64 {
    10
}

impl Default for IdConfig {
    fn default() -> Self {
        Self {
            epoch_secs: default_epoch_secs(),
            sequence_key_ttl_secs: default_sequence_key_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MetricsConfig {
    /// Install the Prometheus recorder
    #[serde(default)]
    pub enabled: bool,
    /// Serve `/metrics` on this address, e.g. `0.0.0.0:9000`
    #[serde(default)]
    pub listen: Option<SocketAddr>,
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_PATH: &str = "flashsale.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_PATH));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., FLASHSALE__SECKILL__QUEUE_CAPACITY=4096
        builder = builder.add_source(
            Environment::with_prefix("FLASHSALE")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
