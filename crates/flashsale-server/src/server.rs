//! Assembly of the services from configuration.

use std::sync::Arc;

use flashsale_db_memory::InMemoryStorage;
use flashsale_db_postgres::PostgresStorage;
use flashsale_storage::{OrderStore, ShopStore, VoucherStore};

use crate::cache::{CacheEngine, ShopCatalog};
use crate::config::AppConfig;
use crate::create_kv_backend;
use crate::id_worker::IdGenerator;
use crate::kv::KvStore;
use crate::lock::DistributedLock;
use crate::seckill::{self, OrderWorkerHandle, SeckillAdmission, WorkerStats};

/// Store-of-record handles. One backend usually implements all three.
#[derive(Clone)]
pub struct Stores {
    pub shops: Arc<dyn ShopStore>,
    pub vouchers: Arc<dyn VoucherStore>,
    pub orders: Arc<dyn OrderStore>,
}

impl Stores {
    pub fn memory(storage: Arc<InMemoryStorage>) -> Self {
        Self {
            shops: storage.clone(),
            vouchers: storage.clone(),
            orders: storage,
        }
    }

    pub fn postgres(storage: Arc<PostgresStorage>) -> Self {
        Self {
            shops: storage.clone(),
            vouchers: storage.clone(),
            orders: storage,
        }
    }

    /// PostgreSQL when configured, in-memory otherwise.
    pub async fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        match &config.postgres {
            Some(pg) => {
                let storage = flashsale_db_postgres::create_storage(pg.clone()).await?;
                tracing::info!("Using PostgreSQL store of record");
                Ok(Self::postgres(storage))
            }
            None => {
                tracing::info!("No PostgreSQL configured, using in-memory store of record");
                Ok(Self::memory(flashsale_db_memory::create_storage()))
            }
        }
    }
}

#[derive(Default)]
pub struct ServerBuilder {
    config: AppConfig,
    kv: Option<Arc<dyn KvStore>>,
    stores: Option<Stores>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    /// Use this key-value store instead of connecting per `config.redis`.
    pub fn with_kv(mut self, kv: Arc<dyn KvStore>) -> Self {
        self.kv = Some(kv);
        self
    }

    /// Use these stores instead of opening the configured backend.
    pub fn with_stores(mut self, stores: Stores) -> Self {
        self.stores = Some(stores);
        self
    }

    /// Connects the backends and starts the rebuild pool and order worker.
    pub async fn build(self) -> anyhow::Result<FlashsaleServer> {
        self.config
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

        let kv = match self.kv {
            Some(kv) => kv,
            None => create_kv_backend(&self.config.redis).await,
        };
        let stores = match self.stores {
            Some(stores) => stores,
            None => Stores::from_config(&self.config).await?,
        };

        let lock = DistributedLock::new(kv.clone());
        let engine = Arc::new(CacheEngine::new(
            kv.clone(),
            lock.clone(),
            &self.config.cache,
        ));
        let catalog = ShopCatalog::new(engine.clone(), stores.shops.clone());
        let ids = IdGenerator::new(kv.clone(), &self.config.id);
        let (admission, worker) = seckill::pipeline(
            kv.clone(),
            stores.vouchers.clone(),
            stores.orders.clone(),
            engine.clone(),
            ids.clone(),
            lock,
            &self.config.seckill,
        );

        tracing::info!(
            kv_backend = kv.backend(),
            queue_capacity = self.config.seckill.queue_capacity,
            rebuild_workers = self.config.cache.rebuild_workers,
            "flash-sale services started"
        );

        Ok(FlashsaleServer {
            kv,
            stores,
            engine,
            catalog,
            ids,
            admission: Arc::new(admission),
            worker,
        })
    }
}

/// The running services.
pub struct FlashsaleServer {
    kv: Arc<dyn KvStore>,
    stores: Stores,
    engine: Arc<CacheEngine>,
    catalog: ShopCatalog,
    ids: IdGenerator,
    admission: Arc<SeckillAdmission>,
    worker: OrderWorkerHandle,
}

impl FlashsaleServer {
    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.kv
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn engine(&self) -> &Arc<CacheEngine> {
        &self.engine
    }

    pub fn catalog(&self) -> &ShopCatalog {
        &self.catalog
    }

    pub fn ids(&self) -> &IdGenerator {
        &self.ids
    }

    pub fn admission(&self) -> &Arc<SeckillAdmission> {
        &self.admission
    }

    pub fn worker_stats(&self) -> WorkerStats {
        self.worker.stats()
    }

    /// Serves until Ctrl+C, then shuts down.
    pub async fn run(self) -> anyhow::Result<WorkerStats> {
        shutdown_signal().await;
        Ok(self.shutdown().await)
    }

    /// Drains the order queue first, then the rebuild pool.
    pub async fn shutdown(self) -> WorkerStats {
        let stats = self.worker.shutdown().await;
        self.engine.shutdown().await;
        tracing::info!(
            persisted = stats.persisted,
            failed = stats.failed,
            "flash-sale services stopped"
        );
        if let Some(snapshot) = crate::metrics::render_metrics() {
            tracing::debug!(metrics = %snapshot, "final metrics snapshot");
        }
        stats
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
