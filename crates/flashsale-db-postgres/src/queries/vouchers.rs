//! Flash-sale voucher queries.

use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_postgres::PgPool;
use time::OffsetDateTime;

use flashsale_storage::{SeckillVoucher, StorageError};

use super::{from_db_id, to_db_id};
use crate::error::{is_foreign_key_violation, is_unique_violation, query_error};

pub async fn get(pool: &PgPool, voucher_id: u64) -> Result<Option<SeckillVoucher>, StorageError> {
    let row: Option<(i64, i64, OffsetDateTime, OffsetDateTime)> = query_as(
        "SELECT voucher_id, stock, begin_time, end_time FROM seckill_voucher WHERE voucher_id = $1",
    )
    .bind(to_db_id("voucher", voucher_id)?)
    .fetch_optional(pool)
    .await
    .map_err(|e| query_error("Failed to read voucher", e))?;

    row.map(|(id, stock, begin_time, end_time)| {
        Ok(SeckillVoucher {
            voucher_id: from_db_id("voucher", id)?,
            stock,
            begin_time,
            end_time,
        })
    })
    .transpose()
}

pub async fn create(pool: &PgPool, voucher: &SeckillVoucher) -> Result<(), StorageError> {
    query(
        r#"INSERT INTO seckill_voucher (voucher_id, stock, begin_time, end_time)
           VALUES ($1, $2, $3, $4)"#,
    )
    .bind(to_db_id("voucher", voucher.voucher_id)?)
    .bind(voucher.stock)
    .bind(voucher.begin_time)
    .bind(voucher.end_time)
    .execute(pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            StorageError::already_exists("voucher", voucher.voucher_id)
        } else {
            query_error("Failed to create voucher", e)
        }
    })?;
    Ok(())
}

/// Deletes a voucher; the order foreign key refuses it once orders exist.
pub async fn delete(pool: &PgPool, voucher_id: u64) -> Result<bool, StorageError> {
    let result = query("DELETE FROM seckill_voucher WHERE voucher_id = $1")
        .bind(to_db_id("voucher", voucher_id)?)
        .execute(pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                StorageError::invalid_input(format!("voucher {voucher_id} already has orders"))
            } else {
                query_error("Failed to delete voucher", e)
            }
        })?;
    Ok(result.rows_affected() > 0)
}
