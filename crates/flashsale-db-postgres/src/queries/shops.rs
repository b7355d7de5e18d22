//! Shop queries.

use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_postgres::PgPool;
use time::OffsetDateTime;

use flashsale_storage::{Shop, StorageError};

use super::{from_db_id, to_db_id};
use crate::error::query_error;

type ShopRow = (
    i64,
    String,
    i64,
    Option<String>,
    String,
    i64,
    i32,
    Option<String>,
    OffsetDateTime,
);

fn row_to_shop(row: ShopRow) -> Result<Shop, StorageError> {
    let (id, name, type_id, area, address, avg_price, score, open_hours, updated_at) = row;
    Ok(Shop {
        id: from_db_id("shop", id)?,
        name,
        type_id: from_db_id("shop type", type_id)?,
        area,
        address,
        avg_price,
        score,
        open_hours,
        updated_at,
    })
}

pub async fn get(pool: &PgPool, id: u64) -> Result<Option<Shop>, StorageError> {
    let row: Option<ShopRow> = query_as(
        r#"SELECT id, name, type_id, area, address, avg_price, score, open_hours, updated_at
           FROM shop WHERE id = $1"#,
    )
    .bind(to_db_id("shop", id)?)
    .fetch_optional(pool)
    .await
    .map_err(|e| query_error("Failed to read shop", e))?;

    row.map(row_to_shop).transpose()
}

pub async fn upsert(pool: &PgPool, shop: &Shop) -> Result<(), StorageError> {
    query(
        r#"INSERT INTO shop (id, name, type_id, area, address, avg_price, score, open_hours, updated_at)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
           ON CONFLICT (id) DO UPDATE SET
               name = EXCLUDED.name,
               type_id = EXCLUDED.type_id,
               area = EXCLUDED.area,
               address = EXCLUDED.address,
               avg_price = EXCLUDED.avg_price,
               score = EXCLUDED.score,
               open_hours = EXCLUDED.open_hours,
               updated_at = EXCLUDED.updated_at"#,
    )
    .bind(to_db_id("shop", shop.id)?)
    .bind(&shop.name)
    .bind(to_db_id("shop type", shop.type_id)?)
    .bind(&shop.area)
    .bind(&shop.address)
    .bind(shop.avg_price)
    .bind(shop.score)
    .bind(&shop.open_hours)
    .bind(shop.updated_at)
    .execute(pool)
    .await
    .map_err(|e| query_error("Failed to upsert shop", e))?;
    Ok(())
}

pub async fn update(pool: &PgPool, shop: &Shop) -> Result<(), StorageError> {
    let result = query(
        r#"UPDATE shop SET name = $2, type_id = $3, area = $4, address = $5,
               avg_price = $6, score = $7, open_hours = $8, updated_at = $9
           WHERE id = $1"#,
    )
    .bind(to_db_id("shop", shop.id)?)
    .bind(&shop.name)
    .bind(to_db_id("shop type", shop.type_id)?)
    .bind(&shop.area)
    .bind(&shop.address)
    .bind(shop.avg_price)
    .bind(shop.score)
    .bind(&shop.open_hours)
    .bind(shop.updated_at)
    .execute(pool)
    .await
    .map_err(|e| query_error("Failed to update shop", e))?;

    if result.rows_affected() == 0 {
        return Err(StorageError::not_found("shop", shop.id));
    }
    Ok(())
}
