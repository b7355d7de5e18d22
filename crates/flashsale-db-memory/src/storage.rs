use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use flashsale_storage::{SeckillVoucher, Shop, StorageError, VoucherOrder};
use papaya::HashMap as PapayaHashMap;
use tokio::sync::Mutex;

/// Vouchers and their orders, mutated together under one lock.
#[derive(Debug, Default)]
pub(crate) struct Ledger {
    pub(crate) vouchers: HashMap<u64, SeckillVoucher>,
    /// Keyed by `(user_id, voucher_id)`; the key is the uniqueness constraint.
    pub(crate) orders: HashMap<(u64, u64), VoucherOrder>,
    pub(crate) order_ids: HashSet<u64>,
}

/// In-memory store of record.
///
/// This storage implementation provides:
/// - Lock-free concurrent shop access via papaya::HashMap
/// - An atomic conditional-decrement-plus-insert for orders
/// - Read counting, fault injection and artificial latency for tests
#[derive(Debug)]
pub struct InMemoryStorage {
    pub(crate) shops: Arc<PapayaHashMap<u64, Shop>>,
    pub(crate) ledger: Arc<Mutex<Ledger>>,
    shop_reads: AtomicU64,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    read_delay_ms: AtomicU64,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            shops: Arc::new(PapayaHashMap::new()),
            ledger: Arc::new(Mutex::new(Ledger::default())),
            shop_reads: AtomicU64::new(0),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            read_delay_ms: AtomicU64::new(0),
        }
    }

    /// Number of `get_shop` calls that reached this backend.
    pub fn shop_reads(&self) -> u64 {
        self.shop_reads.load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        self.shop_reads.store(0, Ordering::SeqCst);
    }

    /// Make every subsequent read fail with a connection error.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent write fail with a connection error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Delay every shop read by `delay`.
    pub fn set_read_delay(&self, delay: Duration) {
        self.read_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Current durable stock of a voucher.
    pub async fn voucher_stock(&self, voucher_id: u64) -> Option<i64> {
        let ledger = self.ledger.lock().await;
        ledger.vouchers.get(&voucher_id).map(|v| v.stock)
    }

    pub(crate) async fn before_shop_read(&self) -> Result<(), StorageError> {
        self.shop_reads.fetch_add(1, Ordering::SeqCst);
        let delay = self.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.check_read()
    }

    pub(crate) fn check_read(&self) -> Result<(), StorageError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::connection_error("injected read failure"));
        }
        Ok(())
    }

    pub(crate) fn check_write(&self) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::connection_error("injected write failure"));
        }
        Ok(())
    }
}
