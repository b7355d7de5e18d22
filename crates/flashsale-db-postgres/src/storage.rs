//! PostgreSQL implementation of the store-of-record traits.

use async_trait::async_trait;
use sqlx_postgres::PgPool;

use flashsale_storage::{
    OrderDescriptor, OrderStore, PersistOutcome, SeckillVoucher, Shop, ShopStore, StorageError,
    VoucherOrder, VoucherStore,
};

use crate::config::PostgresConfig;
use crate::{migrations, pool, queries};

/// PostgreSQL store of record.
#[derive(Debug, Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    /// Creates a new `PostgresStorage` with the given configuration.
    ///
    /// This will create a connection pool and run migrations when
    /// `run_migrations` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection pool cannot be created
    /// or if migrations fail.
    pub async fn new(config: PostgresConfig) -> Result<Self, StorageError> {
        let pool = pool::create_pool(&config).await?;

        if config.run_migrations {
            migrations::run(&pool).await?;
        }

        Ok(Self { pool })
    }

    /// Creates a `PostgresStorage` from an existing pool. Migrations are not run.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ShopStore for PostgresStorage {
    async fn get_shop(&self, id: u64) -> Result<Option<Shop>, StorageError> {
        queries::shops::get(&self.pool, id).await
    }

    async fn upsert_shop(&self, shop: &Shop) -> Result<(), StorageError> {
        queries::shops::upsert(&self.pool, shop).await
    }

    async fn update_shop(&self, shop: &Shop) -> Result<(), StorageError> {
        queries::shops::update(&self.pool, shop).await
    }
}

#[async_trait]
impl VoucherStore for PostgresStorage {
    async fn get_voucher(&self, voucher_id: u64) -> Result<Option<SeckillVoucher>, StorageError> {
        queries::vouchers::get(&self.pool, voucher_id).await
    }

    async fn create_voucher(&self, voucher: &SeckillVoucher) -> Result<(), StorageError> {
        queries::vouchers::create(&self.pool, voucher).await
    }

    async fn delete_voucher(&self, voucher_id: u64) -> Result<bool, StorageError> {
        queries::vouchers::delete(&self.pool, voucher_id).await
    }
}

#[async_trait]
impl OrderStore for PostgresStorage {
    async fn persist_order(&self, order: &OrderDescriptor) -> Result<PersistOutcome, StorageError> {
        queries::orders::persist(&self.pool, order).await
    }

    async fn find_order(
        &self,
        user_id: u64,
        voucher_id: u64,
    ) -> Result<Option<VoucherOrder>, StorageError> {
        queries::orders::find(&self.pool, user_id, voucher_id).await
    }

    async fn count_orders(&self, voucher_id: u64) -> Result<u64, StorageError> {
        queries::orders::count(&self.pool, voucher_id).await
    }
}
