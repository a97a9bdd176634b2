pub mod app_config;
pub mod booking_repo;
pub mod database;
pub mod driver_repo;
pub mod ledger_repo;
pub mod memory;
pub mod order_repo;
pub mod redis_repo;
pub mod ride_repo;

use std::sync::Arc;

use sqlx::PgPool;

use poehali_core::repository::{
    BookingRepository, DriverRepository, LedgerRepository, OrderRepository, RideRepository,
};

pub use database::DbClient;
pub use memory::MemoryStore;
pub use redis_repo::RedisClient;

/// One handle per repository trait, all backed by the same store
#[derive(Clone)]
pub struct Repositories {
    pub rides: Arc<dyn RideRepository>,
    pub bookings: Arc<dyn BookingRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub drivers: Arc<dyn DriverRepository>,
    pub ledger: Arc<dyn LedgerRepository>,
}

impl Repositories {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            rides: Arc::new(ride_repo::PostgresRideRepository::new(pool.clone())),
            bookings: Arc::new(booking_repo::PostgresBookingRepository::new(pool.clone())),
            orders: Arc::new(order_repo::PostgresOrderRepository::new(pool.clone())),
            drivers: Arc::new(driver_repo::PostgresDriverRepository::new(pool.clone())),
            ledger: Arc::new(ledger_repo::PostgresLedgerRepository::new(pool)),
        }
    }

    pub fn memory() -> Self {
        Self::from_memory(Arc::new(MemoryStore::new()))
    }

    pub fn from_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            rides: store.clone(),
            bookings: store.clone(),
            orders: store.clone(),
            drivers: store.clone(),
            ledger: store,
        }
    }
}
