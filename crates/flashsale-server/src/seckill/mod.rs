//! Flash-sale admission and durable order persistence.

pub mod admission;
pub mod worker;

use std::sync::Arc;

use flashsale_storage::{OrderStore, VoucherStore};
use tokio::sync::mpsc;

use crate::cache::CacheEngine;
use crate::config::SeckillConfig;
use crate::id_worker::IdGenerator;
use crate::kv::KvStore;
use crate::lock::DistributedLock;

pub use admission::{ORDER_ID_TAG, SeckillAdmission, VOUCHER_ENTITY};
pub use worker::{OrderWorker, OrderWorkerHandle, WorkerStats};

/// Wires admission and its order worker around one bounded queue of
/// `config.queue_capacity` descriptors and starts the worker.
pub fn pipeline(
    kv: Arc<dyn KvStore>,
    vouchers: Arc<dyn VoucherStore>,
    orders: Arc<dyn OrderStore>,
    engine: Arc<CacheEngine>,
    ids: IdGenerator,
    lock: DistributedLock,
    config: &SeckillConfig,
) -> (SeckillAdmission, OrderWorkerHandle) {
    let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
    let worker = OrderWorker::new(lock, orders, config).spawn(rx);
    let admission = SeckillAdmission::new(kv, vouchers, engine, ids, tx);
    (admission, worker)
}
