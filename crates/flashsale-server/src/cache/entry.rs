//! Self-describing cache record stored under `cache:<entity>:<id>`.

use flashsale_core::{CoreError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// What a cache key holds.
///
/// Encoded with MessagePack using field names, so records stay readable to
/// any consumer that knows the layout, not only to this process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheRecord<T> {
    /// A cached value. `logical_expiry` (Unix millis) is set only for
    /// logically expiring entries, which carry no physical TTL.
    Value {
        value: T,
        logical_expiry: Option<i64>,
    },
    /// The store of record has no such entity.
    Absent,
}

impl<T> CacheRecord<T> {
    pub fn value(value: T) -> Self {
        Self::Value {
            value,
            logical_expiry: None,
        }
    }

    pub fn logical(value: T, logical_expiry: i64) -> Self {
        Self::Value {
            value,
            logical_expiry: Some(logical_expiry),
        }
    }

    /// A record is stale once its logical expiry is at or before `now_millis`.
    /// Records without a logical expiry never go stale.
    pub fn is_stale(&self, now_millis: i64) -> bool {
        match self {
            Self::Value {
                logical_expiry: Some(at),
                ..
            } => *at <= now_millis,
            _ => false,
        }
    }
}

impl<T: Serialize> CacheRecord<T> {
    pub fn encode(&self) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(self)
            .map_err(|e| CoreError::corruption(format!("failed to encode cache record: {e}")))
    }
}

impl<T: DeserializeOwned> CacheRecord<T> {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        rmp_serde::from_slice(bytes)
            .map_err(|e| CoreError::corruption(format!("failed to decode cache record: {e}")))
    }
}
