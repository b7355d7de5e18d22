//! Entities owned by the store of record.

use flashsale_core::IneligibleReason;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A shop listing; the hot read-side entity served through the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shop {
    pub id: u64,
    pub name: String,
    pub type_id: u64,
    pub area: Option<String>,
    pub address: String,
    /// Average price per person, in cents.
    pub avg_price: i64,
    /// Rating multiplied by ten (e.g. 47 = 4.7).
    pub score: i32,
    pub open_hours: Option<String>,
    pub updated_at: OffsetDateTime,
}

/// A flash-sale voucher with finite stock and a sale window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeckillVoucher {
    pub voucher_id: u64,
    /// Remaining stock; never negative in the store of record.
    pub stock: i64,
    pub begin_time: OffsetDateTime,
    pub end_time: OffsetDateTime,
}

impl SeckillVoucher {
    /// Check whether the sale window is open at `now`.
    ///
    /// `begin_time` is inclusive and `end_time` exclusive.
    pub fn check_window(&self, now: OffsetDateTime) -> Result<(), IneligibleReason> {
        if now < self.begin_time {
            return Err(IneligibleReason::NotStarted);
        }
        if now >= self.end_time {
            return Err(IneligibleReason::Ended);
        }
        Ok(())
    }
}

/// A lightweight order handed from the admission path to the order worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderDescriptor {
    pub order_id: u64,
    pub user_id: u64,
    pub voucher_id: u64,
    pub created_at: OffsetDateTime,
}

/// A durably persisted voucher order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoucherOrder {
    pub order_id: u64,
    pub user_id: u64,
    pub voucher_id: u64,
    pub created_at: OffsetDateTime,
    pub persisted_at: OffsetDateTime,
}

impl VoucherOrder {
    pub fn from_descriptor(order: &OrderDescriptor, persisted_at: OffsetDateTime) -> Self {
        Self {
            order_id: order.order_id,
            user_id: order.user_id,
            voucher_id: order.voucher_id,
            created_at: order.created_at,
            persisted_at,
        }
    }
}

/// Result of the guarded durable write of one order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PersistOutcome {
    /// Stock decremented and the order row inserted in one transaction.
    Persisted,
    /// The `(user_id, voucher_id)` uniqueness constraint rejected the insert.
    Duplicate,
    /// The conditional decrement matched no row (`stock > 0` was false).
    SoldOut,
}

impl PersistOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Persisted => "persisted",
            Self::Duplicate => "duplicate",
            Self::SoldOut => "sold_out",
        }
    }
}
