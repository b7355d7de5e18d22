//! Cached read side for shop listings.

use std::sync::Arc;

use flashsale_core::{CoreError, Result};
use flashsale_storage::{Shop, ShopStore};

use super::engine::{CacheEngine, CacheRead, RebuildPolicy};

pub const SHOP_ENTITY: &str = "shop";

#[derive(Clone)]
pub struct ShopCatalog {
    engine: Arc<CacheEngine>,
    store: Arc<dyn ShopStore>,
}

impl std::fmt::Debug for ShopCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShopCatalog")
            .field("engine", &self.engine)
            .finish()
    }
}

impl ShopCatalog {
    pub fn new(engine: Arc<CacheEngine>, store: Arc<dyn ShopStore>) -> Self {
        Self { engine, store }
    }

    /// Reads `cache:shop:<id>` under `policy`.
    ///
    /// `Missing` means the shop does not exist, or, under
    /// [`RebuildPolicy::LogicalExpiry`], that the key was never preloaded.
    pub async fn read(&self, id: u64, policy: RebuildPolicy) -> Result<CacheRead<Shop>> {
        let store = self.store.clone();
        self.engine
            .get(SHOP_ENTITY, id, policy, move || {
                let store = store.clone();
                async move { store.get_shop(id).await.map_err(CoreError::from) }
            })
            .await
    }

    pub async fn get(&self, id: u64, policy: RebuildPolicy) -> Result<Option<Shop>> {
        Ok(self.read(id, policy).await?.into_option())
    }

    /// Like [`get`](Self::get) but a missing shop is `NotFound`.
    pub async fn require(&self, id: u64, policy: RebuildPolicy) -> Result<Shop> {
        self.get(id, policy)
            .await?
            .ok_or_else(|| CoreError::not_found(SHOP_ENTITY, id))
    }

    /// Writes the store of record, then drops the cached copy.
    ///
    /// Logically expiring keys are gone after this too and need
    /// [`preload`](Self::preload) again.
    pub async fn update(&self, shop: &Shop) -> Result<()> {
        self.store.update_shop(shop).await?;
        self.engine.invalidate(SHOP_ENTITY, shop.id).await?;
        tracing::debug!(shop_id = shop.id, "shop updated, cache invalidated");
        Ok(())
    }

    /// Warms logically expiring entries from the store of record. Returns how
    /// many shops were found and cached.
    pub async fn preload(&self, ids: &[u64]) -> Result<usize> {
        let ttl = self.engine.ttl_for(RebuildPolicy::LogicalExpiry);
        let mut loaded = 0;
        for &id in ids {
            match self.store.get_shop(id).await? {
                Some(shop) => {
                    self.engine.put(SHOP_ENTITY, id, &shop, ttl).await?;
                    loaded += 1;
                }
                None => tracing::warn!(shop_id = id, "preload skipped missing shop"),
            }
        }
        tracing::info!(requested = ids.len(), loaded, "shop cache preloaded");
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::kv::MemoryKv;
    use crate::lock::DistributedLock;
    use flashsale_db_memory::InMemoryStorage;
    use time::macros::datetime;

    fn shop(id: u64, name: &str) -> Shop {
        Shop {
            id,
            name: name.into(),
            type_id: 1,
            area: Some("Downtown".into()),
            address: "1 Main St".into(),
            avg_price: 8000,
            score: 45,
            open_hours: Some("10:00-22:00".into()),
            updated_at: datetime!(2025-06-01 00:00:00 UTC),
        }
    }

    async fn catalog() -> (Arc<InMemoryStorage>, ShopCatalog) {
        let kv = Arc::new(MemoryKv::new());
        let engine = Arc::new(CacheEngine::new(
            kv.clone(),
            DistributedLock::new(kv),
            &CacheConfig::default(),
        ));
        let store = Arc::new(InMemoryStorage::new());
        store.upsert_shop(&shop(1, "Tea House")).await.unwrap();
        (store.clone(), ShopCatalog::new(engine, store))
    }

    #[tokio::test]
    async fn test_update_invalidates_cached_copy() {
        let (store, catalog) = catalog().await;
        let first = catalog.require(1, RebuildPolicy::CacheAside).await.unwrap();
        assert_eq!(first.name, "Tea House");

        catalog.update(&shop(1, "Tea Palace")).await.unwrap();
        let reads_before = store.shop_reads();
        let second = catalog.require(1, RebuildPolicy::CacheAside).await.unwrap();
        assert_eq!(second.name, "Tea Palace");
        assert_eq!(store.shop_reads(), reads_before + 1);
    }

    #[tokio::test]
    async fn test_update_of_unknown_shop_fails() {
        let (_, catalog) = catalog().await;
        let err = catalog.update(&shop(99, "Ghost")).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_preload_then_logical_read_hits() {
        let (store, catalog) = catalog().await;
        assert_eq!(catalog.preload(&[1, 2]).await.unwrap(), 1);

        let reads = store.shop_reads();
        let read = catalog.read(1, RebuildPolicy::LogicalExpiry).await.unwrap();
        assert!(matches!(read, CacheRead::Fresh(ref s) if s.id == 1));
        assert_eq!(store.shop_reads(), reads);

        assert_eq!(
            catalog.read(2, RebuildPolicy::LogicalExpiry).await.unwrap(),
            CacheRead::Missing
        );
    }

    #[tokio::test]
    async fn test_require_missing_is_not_found() {
        let (_, catalog) = catalog().await;
        let err = catalog
            .require(42, RebuildPolicy::MutexRebuild)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }
}
