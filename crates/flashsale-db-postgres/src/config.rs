//! Settings for the PostgreSQL store of record.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PostgresError;

/// `[postgres]` section. Any field left out takes its default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    /// e.g. `postgres://shop:secret@db:5432/flashsale`
    pub url: String,

    /// Upper bound on pooled connections. The order worker holds one at a
    /// time; the rest serve cache rebuilds.
    pub pool_size: u32,

    /// Connections kept open while idle. Unset means a quarter of `pool_size`.
    pub min_connections: Option<u32>,

    /// How long a caller waits for a pooled connection, in milliseconds.
    pub connect_timeout_ms: u64,

    /// Idle connections above `min_connections` are closed after this many
    /// milliseconds.
    pub idle_timeout_ms: Option<u64>,

    /// Apply the embedded schema when the store starts.
    pub run_migrations: bool,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/flashsale".into(),
            pool_size: 10,
            min_connections: None,
            connect_timeout_ms: 5000,
            idle_timeout_ms: Some(300_000),
            run_migrations: true,
        }
    }
}

impl PostgresConfig {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_pool_size(mut self, size: u32) -> Self {
        self.pool_size = size;
        self
    }

    #[must_use]
    pub fn with_connect_timeout_ms(mut self, timeout: u64) -> Self {
        self.connect_timeout_ms = timeout;
        self
    }

    #[must_use]
    pub fn with_run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    /// Idle floor for the pool, never below one and never above `pool_size`.
    pub fn min_idle(&self) -> u32 {
        self.min_connections
            .unwrap_or(self.pool_size / 4)
            .clamp(1, self.pool_size.max(1))
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }

    /// Rejects settings the pool cannot start with.
    pub fn validate(&self) -> Result<(), PostgresError> {
        if !(self.url.starts_with("postgres://") || self.url.starts_with("postgresql://")) {
            return Err(PostgresError::config(
                "postgres.url must start with postgres:// or postgresql://",
            ));
        }
        if self.pool_size == 0 {
            return Err(PostgresError::config("postgres.pool_size must be > 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_keeps_unset_defaults() {
        let config = PostgresConfig::new("postgres://shop:secret@db:5432/flashsale")
            .with_pool_size(20)
            .with_connect_timeout_ms(10000)
            .with_run_migrations(false);

        assert_eq!(config.pool_size, 20);
        assert_eq!(config.acquire_timeout(), Duration::from_secs(10));
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(300)));
        assert!(!config.run_migrations);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_min_idle_bounds() {
        assert_eq!(PostgresConfig::default().min_idle(), 2);
        assert_eq!(PostgresConfig::default().with_pool_size(2).min_idle(), 1);

        let mut config = PostgresConfig::default().with_pool_size(4);
        config.min_connections = Some(16);
        assert_eq!(config.min_idle(), 4);
    }

    #[test]
    fn test_validate_rejects_unusable_settings() {
        let err = PostgresConfig::new("mysql://db/flashsale").validate().unwrap_err();
        assert!(err.to_string().contains("postgres.url"));

        let err = PostgresConfig::default().with_pool_size(0).validate().unwrap_err();
        assert!(err.to_string().contains("pool_size"));
    }

    #[test]
    fn test_partial_section_uses_defaults() {
        let config: PostgresConfig =
            serde_json::from_str(r#"{"url": "postgres://db/flashsale"}"#).unwrap();
        assert_eq!(config.url, "postgres://db/flashsale");
        assert_eq!(config.pool_size, 10);
        assert!(config.run_migrations);
    }
}
