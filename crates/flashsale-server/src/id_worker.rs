//! Globally unique, time-sortable 64-bit identifiers.
//!
//! Layout, most significant bit first:
//!
//! ```text
//! | 32 bits: seconds since the configured epoch | 32 bits: per-second sequence |
//! ```
//!
//! The sequence comes from `INCR icr:<tag>:<seconds>` in the shared store, so
//! every instance draws from the same counter and a restarted process never
//! reissues a `(seconds, sequence)` pair for the same tag. Counter keys expire
//! a few seconds after their second has passed.

use std::sync::Arc;
use std::time::Duration;

use flashsale_core::{CoreError, Result, now_utc};
use time::OffsetDateTime;

use crate::config::IdConfig;
use crate::kv::{KvStore, keys};

pub const SEQUENCE_BITS: u32 = 32;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

#[derive(Clone)]
pub struct IdGenerator {
    kv: Arc<dyn KvStore>,
    epoch_secs: i64,
    key_ttl: Duration,
}

impl std::fmt::Debug for IdGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdGenerator")
            .field("epoch_secs", &self.epoch_secs)
            .field("key_ttl", &self.key_ttl)
            .finish()
    }
}

impl IdGenerator {
    pub fn new(kv: Arc<dyn KvStore>, config: &IdConfig) -> Self {
        Self {
            kv,
            epoch_secs: config.epoch_secs as i64,
            key_ttl: Duration::from_secs(config.sequence_key_ttl_secs),
        }
    }

    /// Next identifier for `tag` (e.g. `"order"`).
    pub async fn next_id(&self, tag: &str) -> Result<u64> {
        self.next_id_at(tag, now_utc()).await
    }

    async fn next_id_at(&self, tag: &str, now: OffsetDateTime) -> Result<u64> {
        let timestamp = self.timestamp_segment(now)?;
        let sequence = self
            .kv
            .incr(&keys::id_sequence(tag, timestamp), self.key_ttl)
            .await?;

        let sequence = u64::try_from(sequence)
            .ok()
            .filter(|s| *s >= 1)
            .ok_or_else(|| CoreError::corruption(format!("id sequence for {tag} is {sequence}")))?;
        if sequence > SEQUENCE_MASK {
            return Err(CoreError::transient(format!(
                "id sequence for {tag} exhausted in second {timestamp}"
            )));
        }
        Ok(compose(timestamp, sequence))
    }

    fn timestamp_segment(&self, now: OffsetDateTime) -> Result<u64> {
        let elapsed = now.unix_timestamp() - self.epoch_secs;
        u64::try_from(elapsed)
            .ok()
            .filter(|secs| *secs <= u32::MAX as u64)
            .ok_or_else(|| {
                CoreError::configuration(format!(
                    "clock {} is outside the 32-bit window of epoch {}",
                    now.unix_timestamp(),
                    self.epoch_secs
                ))
            })
    }

    /// Wall-clock second an identifier was issued in.
    pub fn issued_at(&self, id: u64) -> Option<OffsetDateTime> {
        let (timestamp, _) = decompose(id);
        OffsetDateTime::from_unix_timestamp(self.epoch_secs + timestamp as i64).ok()
    }
}

pub fn compose(timestamp: u64, sequence: u64) -> u64 {
    (timestamp << SEQUENCE_BITS) | (sequence & SEQUENCE_MASK)
}

/// Splits an id into `(timestamp, sequence)`.
pub fn decompose(id: u64) -> (u64, u64) {
    (id >> SEQUENCE_BITS, id & SEQUENCE_MASK)
}
