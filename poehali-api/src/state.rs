use std::sync::Arc;
use std::time::Duration;

use poehali_core::Clock;
use poehali_ledger::{LedgerRules, LedgerService};
use poehali_order::{ClaimEngine, ClaimRules, DriverRules, DriverService};
use poehali_ride::{BookingService, InventoryRules, RideInventory};
use poehali_store::app_config::BusinessRules;
use poehali_store::{RedisClient, Repositories};

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
}

#[derive(Clone)]
pub struct AppState {
    pub rides: Arc<RideInventory>,
    pub bookings: Arc<BookingService>,
    pub orders: Arc<ClaimEngine>,
    pub drivers: Arc<DriverService>,
    pub ledger: Arc<LedgerService>,
    /// Rate limiting is off without Redis
    pub redis: Option<Arc<RedisClient>>,
    pub auth: AuthConfig,
    pub business_rules: BusinessRules,
}

impl AppState {
    /// Wire every service to one set of repositories. `timeout` bounds each store call.
    pub fn new(
        repos: Repositories,
        clock: Arc<dyn Clock>,
        business_rules: BusinessRules,
        timeout: Duration,
        auth: AuthConfig,
        redis: Option<Arc<RedisClient>>,
    ) -> Self {
        let rides = RideInventory::new(
            repos.rides.clone(),
            clock.clone(),
            InventoryRules { max_seats_per_offer: business_rules.max_seats_per_offer },
            timeout,
        );
        let bookings = BookingService::new(repos.rides, repos.bookings, clock.clone(), timeout);
        let orders = ClaimEngine::new(
            repos.orders,
            clock.clone(),
            ClaimRules { available_limit: business_rules.available_orders_limit },
            timeout,
        );
        let drivers = DriverService::new(
            repos.drivers,
            clock.clone(),
            DriverRules { default_commission_rate_bp: business_rules.default_commission_rate_bp },
            timeout,
        );
        let ledger = LedgerService::new(
            repos.ledger,
            clock,
            LedgerRules { page_size: business_rules.ledger_page_size },
            timeout,
        );

        Self {
            rides: Arc::new(rides),
            bookings: Arc::new(bookings),
            orders: Arc::new(orders),
            drivers: Arc::new(drivers),
            ledger: Arc::new(ledger),
            redis,
            auth,
            business_rules,
        }
    }
}
