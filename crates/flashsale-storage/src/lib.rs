//! # flashsale-storage
//!
//! Store-of-record abstraction for the flash-sale services.
//!
//! This crate defines the traits and types that durable backends implement.
//! Implementations live in separate crates (`flashsale-db-memory`,
//! `flashsale-db-postgres`).
//!
//! ## Overview
//!
//! - [`ShopStore`]: the hot read-side entity, served through the cache engine
//! - [`VoucherStore`]: flash-sale vouchers with durable stock
//! - [`OrderStore`]: the guarded transactional order write
//!
//! ## Example
//!
//! ```ignore
//! use flashsale_storage::{OrderStore, PersistOutcome};
//!
//! match store.persist_order(&order).await? {
//!     PersistOutcome::Persisted => {}
//!     PersistOutcome::Duplicate | PersistOutcome::SoldOut => { /* already settled */ }
//! }
//! ```

mod error;
mod traits;
mod types;

pub use error::StorageError;
pub use traits::{OrderStore, ShopStore, VoucherStore};
pub use types::{OrderDescriptor, PersistOutcome, SeckillVoucher, Shop, VoucherOrder};
