use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use uuid::Uuid;

use poehali_core::repository::{ClaimReceipt, OrderRepository};
use poehali_core::{bounded, Clock, OrderError};
use poehali_shared::{NewTransferOrder, OrderStatus, TransferOrder, MAX_AMOUNT};

#[derive(Debug, Clone, Copy)]
pub struct ClaimRules {
    /// Page size of the driver feed
    pub available_limit: i64,
}

impl Default for ClaimRules {
    fn default() -> Self {
        Self { available_limit: 20 }
    }
}

/// Transfer order intake and the claim-once race between drivers
pub struct ClaimEngine {
    orders: Arc<dyn OrderRepository>,
    clock: Arc<dyn Clock>,
    rules: ClaimRules,
    timeout: Duration,
}

impl ClaimEngine {
    pub fn new(orders: Arc<dyn OrderRepository>, clock: Arc<dyn Clock>, rules: ClaimRules, timeout: Duration) -> Self {
        Self { orders, clock, rules, timeout }
    }

    pub async fn create_order(&self, new_order: NewTransferOrder) -> Result<TransferOrder, OrderError> {
        let now = self.clock.now();

        if new_order.route_from.trim().is_empty() || new_order.route_to.trim().is_empty() {
            return Err(OrderError::Validation("route_from and route_to are required".into()));
        }
        if new_order.passenger_name.trim().is_empty() || new_order.passenger_phone.expose().trim().is_empty() {
            return Err(OrderError::Validation("passenger name and phone are required".into()));
        }
        if new_order.passengers_count < 1 {
            return Err(OrderError::Validation("passengers_count must be at least 1".into()));
        }
        if !(0..=MAX_AMOUNT).contains(&new_order.price) {
            return Err(OrderError::Validation(format!("price must be between 0 and {}", MAX_AMOUNT)));
        }
        if new_order.pickup_at <= now {
            return Err(OrderError::Validation("pickup_at must be in the future".into()));
        }

        let order = TransferOrder::new(new_order, now);
        bounded(self.timeout, self.orders.insert_order(&order)).await?;

        info!(order_id = %order.id, price = order.price, "Transfer order created");
        Ok(order)
    }

    pub async fn get_order(&self, id: Uuid) -> Result<TransferOrder, OrderError> {
        bounded(self.timeout, self.orders.get_order(id))
            .await?
            .ok_or(OrderError::NotFound)
    }

    /// Unassigned `new` orders, oldest first. Unlocked and possibly stale;
    /// the claim itself is what decides.
    pub async fn list_available(&self) -> Result<Vec<TransferOrder>, OrderError> {
        Ok(bounded(self.timeout, self.orders.list_available(self.rules.available_limit)).await?)
    }

    pub async fn list_orders(&self) -> Result<Vec<TransferOrder>, OrderError> {
        Ok(bounded(self.timeout, self.orders.list_orders()).await?)
    }

    pub async fn driver_orders(&self, driver_id: Uuid) -> Result<Vec<TransferOrder>, OrderError> {
        Ok(bounded(self.timeout, self.orders.list_driver_orders(driver_id)).await?)
    }

    /// Exactly one concurrent caller wins; the rest get `AlreadyClaimed`.
    /// The split uses the driver's rate at this instant and never changes.
    pub async fn claim(&self, order_id: Uuid, driver_id: Uuid) -> Result<ClaimReceipt, OrderError> {
        let receipt = bounded(self.timeout, self.orders.claim_order(order_id, driver_id, self.clock.now())).await?;

        info!(
            order_id = %order_id,
            driver_id = %driver_id,
            price = receipt.order.price,
            driver_amount = receipt.split.driver_amount,
            commission_amount = receipt.split.commission_amount,
            "Order claimed"
        );
        Ok(receipt)
    }

    /// Staff transitions: complete a claimed order or cancel an open one.
    /// Frozen amounts and posted ledger rows are left alone.
    pub async fn transition(&self, order_id: Uuid, next: OrderStatus, admin: &str) -> Result<TransferOrder, OrderError> {
        if matches!(next, OrderStatus::New | OrderStatus::Claimed) {
            return Err(OrderError::Validation(format!("cannot move an order to {} by hand", next)));
        }

        let order = bounded(self.timeout, self.orders.transition_order(order_id, next, self.clock.now())).await?;
        info!(order_id = %order_id, status = %next, admin, "Order status changed");
        Ok(order)
    }
}
