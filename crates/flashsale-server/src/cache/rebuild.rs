//! Bounded pool of cache rebuild workers.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One scheduled rebuild. The future owns everything it needs, including
/// the lock guard it must release.
pub struct RebuildTask {
    pub key: String,
    pub job: BoxFuture<'static, ()>,
}

impl RebuildTask {
    pub fn new(key: impl Into<String>, job: BoxFuture<'static, ()>) -> Self {
        Self {
            key: key.into(),
            job,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    scheduled: AtomicU64,
    completed: AtomicU64,
    panicked: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RebuildStats {
    pub scheduled: u64,
    pub completed: u64,
    pub panicked: u64,
}

/// Fixed set of tokio workers fed by a bounded channel.
///
/// `shutdown` stops intake, lets workers drain what is queued and joins them.
pub struct RebuildPool {
    sender: Mutex<Option<mpsc::Sender<RebuildTask>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl std::fmt::Debug for RebuildPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RebuildPool")
            .field("workers", &self.workers.lock().len())
            .field("stats", &self.stats())
            .finish()
    }
}

impl RebuildPool {
    /// Spawns `workers` tasks on the current runtime.
    pub fn start(workers: usize, queue: usize) -> Self {
        let (tx, rx) = mpsc::channel::<RebuildTask>(queue.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let counters = Arc::new(Counters::default());

        let handles: Vec<JoinHandle<()>> = (0..workers.max(1))
            .map(|worker| {
                let rx = rx.clone();
                let counters = counters.clone();
                tokio::spawn(async move {
                    loop {
                        let next = rx.lock().await.recv().await;
                        let Some(task) = next else { break };
                        let outcome = AssertUnwindSafe(task.job).catch_unwind().await;
                        if outcome.is_err() {
                            counters.panicked.fetch_add(1, Ordering::SeqCst);
                            tracing::error!(worker, key = %task.key, "cache rebuild panicked");
                        }
                        counters.completed.fetch_add(1, Ordering::SeqCst);
                    }
                    tracing::debug!(worker, "cache rebuild worker stopped");
                })
            })
            .collect();

        Self {
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
            counters,
        }
    }

    /// Queues a rebuild without waiting. Hands the task back if the queue is
    /// full or the pool is shut down.
    pub fn schedule(&self, task: RebuildTask) -> Result<(), RebuildTask> {
        let sender = self.sender.lock().clone();
        let Some(sender) = sender else {
            return Err(task);
        };
        match sender.try_send(task) {
            Ok(()) => {
                self.counters.scheduled.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(task))
            | Err(mpsc::error::TrySendError::Closed(task)) => Err(task),
        }
    }

    pub fn stats(&self) -> RebuildStats {
        RebuildStats {
            scheduled: self.counters.scheduled.load(Ordering::SeqCst),
            completed: self.counters.completed.load(Ordering::SeqCst),
            panicked: self.counters.panicked.load(Ordering::SeqCst),
        }
    }

    /// Stops intake, drains queued rebuilds and joins the workers.
    pub async fn shutdown(&self) {
        self.sender.lock().take();
        let handles = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "cache rebuild worker ended abnormally");
            }
        }
    }
}
