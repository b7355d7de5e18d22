//! In-memory store-of-record backend for the flash-sale services.
//!
//! This crate implements the `ShopStore`, `VoucherStore` and `OrderStore`
//! traits from `flashsale-storage`. Shops live in a papaya lock-free map;
//! vouchers and orders share one ledger behind a mutex so the guarded order
//! write is atomic, the same way a database transaction would be.
//!
//! The backend also counts shop reads and can inject faults or latency,
//! which the cache engine tests rely on.
//!
//! # Example
//!
//! ```ignore
//! use flashsale_db_memory::InMemoryStorage;
//! use flashsale_storage::ShopStore;
//!
//! let storage = InMemoryStorage::new();
//! storage.upsert_shop(&shop).await?;
//! assert_eq!(storage.get_shop(shop.id).await?, Some(shop));
//! ```

mod store_impl;
pub mod storage;

pub use flashsale_storage::{OrderStore, ShopStore, StorageError, VoucherStore};
pub use storage::InMemoryStorage;

/// Creates a new shareable in-memory storage instance.
pub fn create_storage() -> std::sync::Arc<InMemoryStorage> {
    std::sync::Arc::new(InMemoryStorage::new())
}
