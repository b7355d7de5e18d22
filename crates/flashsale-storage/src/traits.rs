//! Store-of-record traits.
//!
//! Backends implement these for the durable side of the system; the cache
//! engine and the order worker only ever talk to these traits.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::types::{OrderDescriptor, PersistOutcome, SeckillVoucher, Shop, VoucherOrder};

/// Durable storage for shop listings.
///
/// # Example
///
/// ```ignore
/// use flashsale_storage::{ShopStore, StorageError, Shop};
///
/// async fn load(store: &dyn ShopStore, id: u64) -> Result<Shop, StorageError> {
///     store
///         .get_shop(id)
///         .await?
///         .ok_or_else(|| StorageError::not_found("shop", id))
/// }
/// ```
#[async_trait]
pub trait ShopStore: Send + Sync {
    /// Reads a shop by id.
    ///
    /// Returns `None` if the shop does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error only for infrastructure issues, not for missing shops.
    async fn get_shop(&self, id: u64) -> Result<Option<Shop>, StorageError>;

    /// Inserts or replaces a shop.
    async fn upsert_shop(&self, shop: &Shop) -> Result<(), StorageError>;

    /// Updates an existing shop.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the shop does not exist.
    async fn update_shop(&self, shop: &Shop) -> Result<(), StorageError>;
}

/// Durable storage for flash-sale vouchers.
#[async_trait]
pub trait VoucherStore: Send + Sync {
    /// Reads a voucher, including its current durable stock.
    async fn get_voucher(&self, voucher_id: u64) -> Result<Option<SeckillVoucher>, StorageError>;

    /// Creates a voucher.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::AlreadyExists` if the voucher id is taken.
    async fn create_voucher(&self, voucher: &SeckillVoucher) -> Result<(), StorageError>;

    /// Removes a voucher that has no orders yet. Returns whether it existed.
    ///
    /// Used to undo a publication whose fast-path seeding failed.
    async fn delete_voucher(&self, voucher_id: u64) -> Result<bool, StorageError>;
}

/// Durable storage for voucher orders.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persists one order in a single transaction.
    ///
    /// The transaction decrements the voucher's stock only where
    /// `stock > 0` and inserts the order row under the
    /// `(user_id, voucher_id)` uniqueness constraint. Either both happen
    /// or neither does.
    ///
    /// Returns [`PersistOutcome::SoldOut`] when the conditional decrement
    /// matched nothing and [`PersistOutcome::Duplicate`] when the unique
    /// constraint rejected the row.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the voucher does not exist,
    /// and a connection or transaction error for infrastructure faults.
    async fn persist_order(&self, order: &OrderDescriptor) -> Result<PersistOutcome, StorageError>;

    /// Finds the order a user holds for a voucher, if any.
    async fn find_order(
        &self,
        user_id: u64,
        voucher_id: u64,
    ) -> Result<Option<VoucherOrder>, StorageError>;

    /// Counts persisted orders for a voucher.
    async fn count_orders(&self, voucher_id: u64) -> Result<u64, StorageError>;
}
