//! Cache-consistency engine and its consumers.

pub mod engine;
pub mod entry;
pub mod rebuild;
pub mod shop;

pub use engine::{CacheEngine, CacheRead, CacheSettings, RebuildPolicy, TtlPolicy};
pub use entry::CacheRecord;
pub use rebuild::{RebuildPool, RebuildStats, RebuildTask};
pub use shop::{SHOP_ENTITY, ShopCatalog};
