//! The single consumer that makes admitted orders durable.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use flashsale_core::{CoreError, Result, RetryPolicy};
use flashsale_storage::{OrderDescriptor, OrderStore, PersistOutcome};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::SeckillConfig;
use crate::kv::keys;
use crate::lock::DistributedLock;
use crate::metrics;

const ORDER_LOCK_RESOURCE: &str = "order";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkerStats {
    pub persisted: u64,
    pub duplicate: u64,
    pub sold_out: u64,
    pub failed: u64,
}

impl WorkerStats {
    pub fn processed(&self) -> u64 {
        self.persisted + self.duplicate + self.sold_out + self.failed
    }
}

#[derive(Debug, Default)]
struct Counters {
    persisted: AtomicU64,
    duplicate: AtomicU64,
    sold_out: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            persisted: self.persisted.load(Ordering::SeqCst),
            duplicate: self.duplicate.load(Ordering::SeqCst),
            sold_out: self.sold_out.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }
}

/// Drains the order queue in FIFO order, one descriptor at a time.
///
/// Each order is written under a per-user lock by
/// [`OrderStore::persist_order`], whose transaction is guarded by the
/// `(user_id, voucher_id)` uniqueness constraint and a `stock > 0`
/// conditional decrement. A failed order is logged and counted; the loop
/// moves on to the next one.
pub struct OrderWorker {
    lock: DistributedLock,
    orders: Arc<dyn OrderStore>,
    lock_ttl: Duration,
    retry: RetryPolicy,
    counters: Arc<Counters>,
}

impl OrderWorker {
    pub fn new(lock: DistributedLock, orders: Arc<dyn OrderStore>, config: &SeckillConfig) -> Self {
        Self {
            lock,
            orders,
            lock_ttl: config.order_lock_ttl(),
            retry: config.worker_retry,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Starts consuming `queue` on the current runtime.
    pub fn spawn(self, queue: mpsc::Receiver<OrderDescriptor>) -> OrderWorkerHandle {
        let (stop_tx, stop_rx) = oneshot::channel();
        let counters = self.counters.clone();
        let task = tokio::spawn(self.run(queue, stop_rx));
        OrderWorkerHandle {
            stop: Some(stop_tx),
            task: Some(task),
            counters,
        }
    }

    async fn run(self, mut queue: mpsc::Receiver<OrderDescriptor>, mut stop: oneshot::Receiver<()>) {
        tracing::info!("order worker started");
        let mut stopping = false;
        loop {
            tokio::select! {
                biased;
                _ = &mut stop, if !stopping => {
                    // Refuse new sends; what is buffered or already reserved
                    // still drains below.
                    queue.close();
                    stopping = true;
                }
                next = queue.recv() => match next {
                    Some(order) => self.process(order).await,
                    None => break,
                },
            }
        }
        let stats = self.counters.snapshot();
        tracing::info!(
            persisted = stats.persisted,
            duplicate = stats.duplicate,
            sold_out = stats.sold_out,
            failed = stats.failed,
            "order worker stopped"
        );
    }

    async fn process(&self, order: OrderDescriptor) {
        let result = self
            .retry
            .run("persist_order", || self.persist_once(&order))
            .await;

        match &result {
            Ok(PersistOutcome::Persisted) => {
                self.counters.persisted.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(
                    order_id = order.order_id,
                    user_id = order.user_id,
                    voucher_id = order.voucher_id,
                    "order persisted"
                );
            }
            Ok(PersistOutcome::Duplicate) => {
                self.counters.duplicate.fetch_add(1, Ordering::SeqCst);
                tracing::warn!(
                    order_id = order.order_id,
                    user_id = order.user_id,
                    voucher_id = order.voucher_id,
                    "order rejected by uniqueness constraint"
                );
            }
            Ok(PersistOutcome::SoldOut) => {
                self.counters.sold_out.fetch_add(1, Ordering::SeqCst);
                tracing::warn!(
                    order_id = order.order_id,
                    user_id = order.user_id,
                    voucher_id = order.voucher_id,
                    "order rejected by durable stock guard"
                );
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
                tracing::error!(
                    order_id = order.order_id,
                    user_id = order.user_id,
                    voucher_id = order.voucher_id,
                    created_at = %order.created_at,
                    error = %e,
                    category = ?e.category(),
                    "order persistence failed"
                );
            }
        }
        metrics::record_order(match &result {
            Ok(outcome) => outcome.as_str(),
            Err(_) => "failed",
        });
    }

    async fn persist_once(&self, order: &OrderDescriptor) -> Result<PersistOutcome> {
        let guard = self
            .lock
            .try_acquire_for(ORDER_LOCK_RESOURCE, order.user_id, self.lock_ttl)
            .await?
            .ok_or_else(|| {
                CoreError::lock_unavailable(keys::lock(ORDER_LOCK_RESOURCE, order.user_id))
            })?;

        let result = self
            .orders
            .persist_order(order)
            .await
            .map_err(CoreError::from);

        if let Err(e) = guard.release().await {
            tracing::warn!(user_id = order.user_id, error = %e, "failed to release order lock");
        }
        result
    }
}

/// Owner of a running [`OrderWorker`].
pub struct OrderWorkerHandle {
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl std::fmt::Debug for OrderWorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderWorkerHandle")
            .field("running", &self.task.is_some())
            .field("stats", &self.stats())
            .finish()
    }
}

impl OrderWorkerHandle {
    pub fn stats(&self) -> WorkerStats {
        self.counters.snapshot()
    }

    /// Stops intake, drains every queued order and waits for the worker.
    pub async fn shutdown(mut self) -> WorkerStats {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "order worker ended abnormally");
            }
        }
        self.counters.snapshot()
    }
}
