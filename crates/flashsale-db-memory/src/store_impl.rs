//! Store trait implementations for [`InMemoryStorage`].

use async_trait::async_trait;
use time::OffsetDateTime;

use flashsale_storage::{
    OrderDescriptor, OrderStore, PersistOutcome, SeckillVoucher, Shop, ShopStore, StorageError,
    VoucherOrder, VoucherStore,
};

use crate::storage::InMemoryStorage;

#[async_trait]
impl ShopStore for InMemoryStorage {
    async fn get_shop(&self, id: u64) -> Result<Option<Shop>, StorageError> {
        self.before_shop_read().await?;
        let guard = self.shops.pin();
        Ok(guard.get(&id).cloned())
    }

    async fn upsert_shop(&self, shop: &Shop) -> Result<(), StorageError> {
        self.check_write()?;
        self.shops.pin().insert(shop.id, shop.clone());
        Ok(())
    }

    async fn update_shop(&self, shop: &Shop) -> Result<(), StorageError> {
        self.check_write()?;
        let guard = self.shops.pin();
        if guard.get(&shop.id).is_none() {
            return Err(StorageError::not_found("shop", shop.id));
        }
        guard.insert(shop.id, shop.clone());
        Ok(())
    }
}

#[async_trait]
impl VoucherStore for InMemoryStorage {
    async fn get_voucher(&self, voucher_id: u64) -> Result<Option<SeckillVoucher>, StorageError> {
        self.check_read()?;
        let ledger = self.ledger.lock().await;
        Ok(ledger.vouchers.get(&voucher_id).cloned())
    }

    async fn create_voucher(&self, voucher: &SeckillVoucher) -> Result<(), StorageError> {
        self.check_write()?;
        if voucher.stock < 0 {
            return Err(StorageError::corrupted(format!(
                "voucher {} created with negative stock {}",
                voucher.voucher_id, voucher.stock
            )));
        }
        let mut ledger = self.ledger.lock().await;
        if ledger.vouchers.contains_key(&voucher.voucher_id) {
            return Err(StorageError::already_exists("voucher", voucher.voucher_id));
        }
        ledger.vouchers.insert(voucher.voucher_id, voucher.clone());
        Ok(())
    }

    async fn delete_voucher(&self, voucher_id: u64) -> Result<bool, StorageError> {
        self.check_write()?;
        let mut ledger = self.ledger.lock().await;
        if ledger.orders.keys().any(|(_, v)| *v == voucher_id) {
            return Err(StorageError::invalid_input(format!(
                "voucher {voucher_id} already has orders"
            )));
        }
        Ok(ledger.vouchers.remove(&voucher_id).is_some())
    }
}

#[async_trait]
impl OrderStore for InMemoryStorage {
    async fn persist_order(&self, order: &OrderDescriptor) -> Result<PersistOutcome, StorageError> {
        self.check_write()?;
        let mut ledger = self.ledger.lock().await;

        let stock = ledger
            .vouchers
            .get(&order.voucher_id)
            .map(|v| v.stock)
            .ok_or_else(|| StorageError::not_found("voucher", order.voucher_id))?;

        // Same order as the SQL path: conditional decrement, then the insert
        // that may trip the unique constraint and roll the decrement back.
        if stock <= 0 {
            return Ok(PersistOutcome::SoldOut);
        }
        let key = (order.user_id, order.voucher_id);
        if ledger.orders.contains_key(&key) || ledger.order_ids.contains(&order.order_id) {
            return Ok(PersistOutcome::Duplicate);
        }

        if let Some(voucher) = ledger.vouchers.get_mut(&order.voucher_id) {
            voucher.stock -= 1;
        }
        ledger.order_ids.insert(order.order_id);
        ledger.orders.insert(
            key,
            VoucherOrder::from_descriptor(order, OffsetDateTime::now_utc()),
        );
        Ok(PersistOutcome::Persisted)
    }

    async fn find_order(
        &self,
        user_id: u64,
        voucher_id: u64,
    ) -> Result<Option<VoucherOrder>, StorageError> {
        self.check_read()?;
        let ledger = self.ledger.lock().await;
        Ok(ledger.orders.get(&(user_id, voucher_id)).cloned())
    }

    async fn count_orders(&self, voucher_id: u64) -> Result<u64, StorageError> {
        self.check_read()?;
        let ledger = self.ledger.lock().await;
        Ok(ledger
            .orders
            .values()
            .filter(|o| o.voucher_id == voucher_id)
            .count() as u64)
    }
}
