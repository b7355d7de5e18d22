//! Voucher order queries, including the guarded transactional write.

use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_core::query_scalar::query_scalar;
use sqlx_postgres::{PgPool, PgTransaction};
use time::OffsetDateTime;
use tracing::debug;

use flashsale_storage::{OrderDescriptor, PersistOutcome, StorageError, VoucherOrder};

use super::{from_db_id, to_db_id};
use crate::error::query_error;

/// Decrements stock and inserts the order in one transaction.
///
/// The decrement only matches rows with `stock > 0`. The insert uses
/// `ON CONFLICT DO NOTHING`, so a unique violation on either the order id
/// or `(user_id, voucher_id)` shows up as zero affected rows and the whole
/// transaction is rolled back.
pub async fn persist(
    pool: &PgPool,
    order: &OrderDescriptor,
) -> Result<PersistOutcome, StorageError> {
    let voucher_id = to_db_id("voucher", order.voucher_id)?;
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| query_error("Failed to begin order transaction", e))?;

    let decremented = query(
        "UPDATE seckill_voucher SET stock = stock - 1 WHERE voucher_id = $1 AND stock > 0",
    )
    .bind(voucher_id)
    .execute(&mut *tx)
    .await
    .map_err(|e| query_error("Failed to decrement stock", e))?
    .rows_affected();

    if decremented == 0 {
        let exists = voucher_exists(&mut tx, voucher_id).await?;
        rollback(tx).await?;
        if !exists {
            return Err(StorageError::not_found("voucher", order.voucher_id));
        }
        debug!(order_id = order.order_id, "conditional decrement matched no row");
        return Ok(PersistOutcome::SoldOut);
    }

    let inserted = query(
        r#"INSERT INTO voucher_order (id, user_id, voucher_id, created_at)
           VALUES ($1, $2, $3, $4)
           ON CONFLICT DO NOTHING"#,
    )
    .bind(to_db_id("order", order.order_id)?)
    .bind(to_db_id("user", order.user_id)?)
    .bind(voucher_id)
    .bind(order.created_at)
    .execute(&mut *tx)
    .await
    .map_err(|e| query_error("Failed to insert order", e))?
    .rows_affected();

    if inserted == 0 {
        rollback(tx).await?;
        debug!(order_id = order.order_id, "unique constraint rejected order");
        return Ok(PersistOutcome::Duplicate);
    }

    tx.commit().await.map_err(|e| {
        StorageError::transaction_error(format!("Failed to commit order transaction: {e}"))
    })?;
    Ok(PersistOutcome::Persisted)
}

async fn voucher_exists(tx: &mut PgTransaction<'_>, voucher_id: i64) -> Result<bool, StorageError> {
    let found: Option<i64> =
        query_scalar("SELECT voucher_id FROM seckill_voucher WHERE voucher_id = $1")
            .bind(voucher_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| query_error("Failed to read voucher", e))?;
    Ok(found.is_some())
}

async fn rollback(tx: PgTransaction<'_>) -> Result<(), StorageError> {
    tx.rollback().await.map_err(|e| {
        StorageError::transaction_error(format!("Failed to rollback order transaction: {e}"))
    })
}

pub async fn find(
    pool: &PgPool,
    user_id: u64,
    voucher_id: u64,
) -> Result<Option<VoucherOrder>, StorageError> {
    let row: Option<(i64, i64, i64, OffsetDateTime, OffsetDateTime)> = query_as(
        r#"SELECT id, user_id, voucher_id, created_at, persisted_at
           FROM voucher_order WHERE user_id = $1 AND voucher_id = $2"#,
    )
    .bind(to_db_id("user", user_id)?)
    .bind(to_db_id("voucher", voucher_id)?)
    .fetch_optional(pool)
    .await
    .map_err(|e| query_error("Failed to read order", e))?;

    row.map(|(id, user_id, voucher_id, created_at, persisted_at)| {
        Ok(VoucherOrder {
            order_id: from_db_id("order", id)?,
            user_id: from_db_id("user", user_id)?,
            voucher_id: from_db_id("voucher", voucher_id)?,
            created_at,
            persisted_at,
        })
    })
    .transpose()
}

pub async fn count(pool: &PgPool, voucher_id: u64) -> Result<u64, StorageError> {
    let count: i64 = query_scalar("SELECT COUNT(*) FROM voucher_order WHERE voucher_id = $1")
        .bind(to_db_id("voucher", voucher_id)?)
        .fetch_one(pool)
        .await
        .map_err(|e| query_error("Failed to count orders", e))?;
    from_db_id("order count", count)
}
