//! Fast-path admission for flash-sale purchases.
//!
//! ```text
//! CHECKING -> REJECTED(reason)
//!          -> ADMITTED -> ENQUEUED -> (order worker) PERSISTED | FAILED
//! ```
//!
//! Eligibility is decided by one atomic script in the key-value store; the
//! store of record is only written later by the order worker. A crash
//! between the two leaves a reservation without a durable order.

use std::sync::Arc;

use flashsale_core::{CoreError, IneligibleReason, Result, UserContext, now_utc};
use flashsale_storage::{OrderDescriptor, SeckillVoucher, VoucherStore};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::cache::{CacheEngine, RebuildPolicy};
use crate::id_worker::IdGenerator;
use crate::kv::{KvStore, ReserveCode, keys};
use crate::metrics;

pub const VOUCHER_ENTITY: &str = "voucher";
pub const ORDER_ID_TAG: &str = "order";

pub struct SeckillAdmission {
    kv: Arc<dyn KvStore>,
    vouchers: Arc<dyn VoucherStore>,
    engine: Arc<CacheEngine>,
    ids: IdGenerator,
    queue: mpsc::Sender<OrderDescriptor>,
}

impl std::fmt::Debug for SeckillAdmission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeckillAdmission")
            .field("backend", &self.kv.backend())
            .field("queue_capacity", &self.queue.max_capacity())
            .field("queue_depth", &self.queue_depth())
            .finish()
    }
}

impl SeckillAdmission {
    pub fn new(
        kv: Arc<dyn KvStore>,
        vouchers: Arc<dyn VoucherStore>,
        engine: Arc<CacheEngine>,
        ids: IdGenerator,
        queue: mpsc::Sender<OrderDescriptor>,
    ) -> Self {
        Self {
            kv,
            vouchers,
            engine,
            ids,
            queue,
        }
    }

    /// Orders admitted but not yet taken by the worker.
    pub fn queue_depth(&self) -> usize {
        self.queue.max_capacity() - self.queue.capacity()
    }

    /// Persists a voucher and seeds its stock counter and purchased set.
    ///
    /// Re-publishing an id is a `Conflict`; the fast-path state is left as is.
    /// If seeding fails the durable voucher is deleted again, so the
    /// publication can be retried.
    pub async fn publish_voucher(&self, voucher: &SeckillVoucher) -> Result<()> {
        if voucher.stock < 0 {
            return Err(CoreError::invalid_input(format!(
                "voucher {} has negative stock {}",
                voucher.voucher_id, voucher.stock
            )));
        }
        self.vouchers.create_voucher(voucher).await?;
        let seeded = self
            .kv
            .seckill_seed(
                &keys::seckill_stock(voucher.voucher_id),
                &keys::seckill_buyers(voucher.voucher_id),
                voucher.stock,
            )
            .await;
        if let Err(e) = seeded {
            tracing::warn!(
                voucher_id = voucher.voucher_id,
                error = %e,
                "stock seeding failed, withdrawing voucher"
            );
            if let Err(undo) = self.vouchers.delete_voucher(voucher.voucher_id).await {
                tracing::error!(
                    voucher_id = voucher.voucher_id,
                    error = %undo,
                    "failed to withdraw unseeded voucher"
                );
            }
            return Err(e.into());
        }
        // An absent marker may be cached from lookups before publication.
        self.engine
            .invalidate(VOUCHER_ENTITY, voucher.voucher_id)
            .await?;
        tracing::info!(
            voucher_id = voucher.voucher_id,
            stock = voucher.stock,
            "voucher published"
        );
        Ok(())
    }

    /// Runs the eligibility check for `user` and, on success, enqueues the
    /// order and returns its pre-generated id.
    ///
    /// Acceptance means the reservation is recorded and queued, not yet
    /// durable.
    pub async fn admit(&self, user: &UserContext, voucher_id: u64) -> Result<u64> {
        let result = self.try_admit(user, voucher_id).await;
        metrics::record_admission(admission_outcome(&result));
        match &result {
            Ok(order_id) => tracing::debug!(
                order_id,
                user_id = user.user_id,
                voucher_id,
                "admission accepted"
            ),
            Err(e) => tracing::debug!(
                user_id = user.user_id,
                voucher_id,
                error = %e,
                "admission rejected"
            ),
        }
        result
    }

    async fn try_admit(&self, user: &UserContext, voucher_id: u64) -> Result<u64> {
        let voucher = self.voucher(voucher_id).await?;
        voucher
            .check_window(now_utc())
            .map_err(CoreError::NotEligible)?;

        // Hold a queue slot before reserving so a full queue never strands a
        // reservation.
        let permit = match self.queue.try_reserve() {
            Ok(permit) => permit,
            Err(TrySendError::Full(())) => {
                return Err(CoreError::Backpressure {
                    capacity: self.queue.max_capacity(),
                });
            }
            Err(TrySendError::Closed(())) => {
                return Err(CoreError::transient("order queue is closed"));
            }
        };

        let order_id = self.ids.next_id(ORDER_ID_TAG).await?;

        let code = self
            .kv
            .seckill_reserve(
                &keys::seckill_stock(voucher_id),
                &keys::seckill_buyers(voucher_id),
                &user.user_id.to_string(),
            )
            .await?;
        match code {
            ReserveCode::Ok => {}
            ReserveCode::SoldOut => return Err(CoreError::NotEligible(IneligibleReason::SoldOut)),
            ReserveCode::Duplicate => {
                return Err(CoreError::NotEligible(IneligibleReason::Duplicate));
            }
        }

        permit.send(OrderDescriptor {
            order_id,
            user_id: user.user_id,
            voucher_id,
            created_at: now_utc(),
        });
        metrics::set_queue_depth(self.queue_depth());
        Ok(order_id)
    }

    async fn voucher(&self, voucher_id: u64) -> Result<SeckillVoucher> {
        let vouchers = self.vouchers.clone();
        self.engine
            .get(
                VOUCHER_ENTITY,
                voucher_id,
                RebuildPolicy::CacheAside,
                move || {
                    let vouchers = vouchers.clone();
                    async move {
                        vouchers
                            .get_voucher(voucher_id)
                            .await
                            .map_err(CoreError::from)
                    }
                },
            )
            .await?
            .into_option()
            .ok_or_else(|| CoreError::not_found(VOUCHER_ENTITY, voucher_id))
    }
}

fn admission_outcome(result: &Result<u64>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(CoreError::NotEligible(reason)) => reason.as_str(),
        Err(CoreError::NotFound { .. }) => "not_found",
        Err(CoreError::Backpressure { .. }) => "backpressure",
        Err(_) => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_labels() {
        assert_eq!(admission_outcome(&Ok(1)), "ok");
        assert_eq!(
            admission_outcome(&Err(CoreError::NotEligible(IneligibleReason::SoldOut))),
            "sold_out"
        );
        assert_eq!(
            admission_outcome(&Err(CoreError::Backpressure { capacity: 1 })),
            "backpressure"
        );
        assert_eq!(
            admission_outcome(&Err(CoreError::transient("boom"))),
            "error"
        );
    }
}
