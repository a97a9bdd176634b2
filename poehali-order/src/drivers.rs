use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use uuid::Uuid;

use poehali_core::repository::DriverRepository;
use poehali_core::{bounded, Clock, DriverError};
use poehali_shared::{Driver, DriverStatus, NewDriver};

/// Upper bound on a commission rate (50%)
pub const MAX_COMMISSION_RATE_BP: i32 = 5_000;

#[derive(Debug, Clone, Copy)]
pub struct DriverRules {
    pub default_commission_rate_bp: i32,
}

impl Default for DriverRules {
    fn default() -> Self {
        Self { default_commission_rate_bp: 1_500 }
    }
}

pub struct DriverService {
    drivers: Arc<dyn DriverRepository>,
    clock: Arc<dyn Clock>,
    rules: DriverRules,
    timeout: Duration,
}

impl DriverService {
    pub fn new(drivers: Arc<dyn DriverRepository>, clock: Arc<dyn Clock>, rules: DriverRules, timeout: Duration) -> Self {
        Self { drivers, clock, rules, timeout }
    }

    /// New drivers wait for moderation and cannot claim until approved.
    pub async fn register(&self, new_driver: NewDriver) -> Result<Driver, DriverError> {
        if new_driver.name.trim().is_empty() || new_driver.phone.expose().trim().is_empty() {
            return Err(DriverError::Validation("name and phone are required".into()));
        }

        let driver = Driver::new(new_driver, self.rules.default_commission_rate_bp, self.clock.now());
        bounded(self.timeout, self.drivers.insert_driver(&driver)).await?;

        info!(driver_id = %driver.id, "Driver registered");
        Ok(driver)
    }

    pub async fn get(&self, id: Uuid) -> Result<Driver, DriverError> {
        bounded(self.timeout, self.drivers.get_driver(id))
            .await?
            .ok_or(DriverError::NotFound)
    }

    pub async fn list(&self) -> Result<Vec<Driver>, DriverError> {
        Ok(bounded(self.timeout, self.drivers.list_drivers()).await?)
    }

    /// Approve or reject. Approval activates the driver; anything else
    /// deactivates. Without a rate the current one is kept.
    pub async fn moderate(&self, id: Uuid, status: DriverStatus, rate_bp: Option<i32>) -> Result<Driver, DriverError> {
        let rate_bp = match rate_bp {
            Some(rate) => validate_rate(rate)?,
            None => self.get(id).await?.commission_rate_bp,
        };

        let driver = bounded(self.timeout, self.drivers.moderate_driver(id, status, rate_bp)).await?;
        info!(driver_id = %id, status = %status, commission_rate_bp = rate_bp, "Driver moderated");
        Ok(driver)
    }

    /// Only future claims see the new rate.
    pub async fn set_commission(&self, id: Uuid, rate_bp: i32) -> Result<Driver, DriverError> {
        let rate_bp = validate_rate(rate_bp)?;
        let driver = bounded(self.timeout, self.drivers.set_commission(id, rate_bp)).await?;
        info!(driver_id = %id, commission_rate_bp = rate_bp, "Commission rate changed");
        Ok(driver)
    }

    pub async fn set_online(&self, id: Uuid, is_online: bool) -> Result<Driver, DriverError> {
        if is_online && !self.get(id).await?.can_claim() {
            return Err(DriverError::Validation("driver is not approved".into()));
        }
        Ok(bounded(self.timeout, self.drivers.set_online(id, is_online)).await?)
    }
}

fn validate_rate(rate_bp: i32) -> Result<i32, DriverError> {
    if (0..=MAX_COMMISSION_RATE_BP).contains(&rate_bp) {
        Ok(rate_bp)
    } else {
        Err(DriverError::Validation(format!(
            "commission rate must be between 0 and {} bp",
            MAX_COMMISSION_RATE_BP
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use poehali_core::SystemClock;
    use poehali_shared::Masked;
    use poehali_store::MemoryStore;

    fn service() -> DriverService {
        DriverService::new(
            Arc::new(MemoryStore::new()),
            Arc::new(SystemClock),
            DriverRules { default_commission_rate_bp: 1200 },
            Duration::from_secs(1),
        )
    }

    fn new_driver() -> NewDriver {
        NewDriver { name: "Daur".to_string(), phone: Masked("+79400001111".to_string()) }
    }

    #[tokio::test]
    async fn test_register_starts_pending_with_default_rate() {
        let drivers = service();
        let driver = drivers.register(new_driver()).await.unwrap();
        assert_eq!(driver.status, DriverStatus::Pending);
        assert!(!driver.is_active);
        assert_eq!(driver.commission_rate_bp, 1200);
        assert!(driver.created_at <= Utc::now());
    }

    #[tokio::test]
    async fn test_approval_activates_and_keeps_rate() {
        let drivers = service();
        let driver = drivers.register(new_driver()).await.unwrap();

        let approved = drivers.moderate(driver.id, DriverStatus::Approved, None).await.unwrap();
        assert!(approved.is_active);
        assert_eq!(approved.commission_rate_bp, 1200);

        let online = drivers.set_online(driver.id, true).await.unwrap();
        assert!(online.is_online);

        let rejected = drivers.moderate(driver.id, DriverStatus::Rejected, Some(0)).await.unwrap();
        assert!(!rejected.is_active);
        assert!(!rejected.is_online);
        assert_eq!(rejected.commission_rate_bp, 0);
    }

    #[tokio::test]
    async fn test_rate_bounds() {
        let drivers = service();
        let driver = drivers.register(new_driver()).await.unwrap();

        for rate in [-1, MAX_COMMISSION_RATE_BP + 1] {
            let err = drivers.set_commission(driver.id, rate).await.unwrap_err();
            assert!(matches!(err, DriverError::Validation(_)));
        }
        assert_eq!(drivers.set_commission(driver.id, MAX_COMMISSION_RATE_BP).await.unwrap().commission_rate_bp, 5000);
        assert!(matches!(drivers.set_commission(Uuid::new_v4(), 100).await, Err(DriverError::NotFound)));
    }

    #[tokio::test]
    async fn test_pending_driver_cannot_go_online() {
        let drivers = service();
        let driver = drivers.register(new_driver()).await.unwrap();
        assert!(matches!(drivers.set_online(driver.id, true).await, Err(DriverError::Validation(_))));
        assert!(!drivers.set_online(driver.id, false).await.unwrap().is_online);
    }

    #[tokio::test]
    async fn test_register_requires_contact() {
        let drivers = service();
        let err = drivers
            .register(NewDriver { name: "Daur".to_string(), phone: Masked(String::new()) })
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Validation(_)));
        assert!(drivers.list().await.unwrap().is_empty());
    }
}
