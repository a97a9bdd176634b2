use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use poehali_shared::{
    AccountRef, Booking, CommissionSplit, Driver, DriverStatus, EntryKind, LedgerEntry,
    NewLedgerEntry, OrderStatus, RideFilter, RideOffer, RideOverride, RideStatus, TransferOrder,
};

use crate::error::{DriverError, LedgerError, OrderError, RideError, StoreError};

/// SHA-256 digest of a cancel token. Only the digest is ever persisted.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenDigest(pub [u8; 32]);

impl TokenDigest {
    /// Comparison time does not depend on where the first differing byte is.
    pub fn ct_eq(&self, other: &[u8]) -> bool {
        constant_time_eq::constant_time_eq(&self.0, other)
    }
}

impl std::fmt::Debug for TokenDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TokenDigest(..)")
    }
}

/// Result of handing seats back to an offer
#[derive(Debug, Clone)]
pub struct SeatRelease {
    pub offer: RideOffer,
    /// True when the increment hit `seats_total` and was cut short.
    pub clamped: bool,
}

/// Outcome of a cancellation. Only `Cancelled` released seats.
#[derive(Debug, Clone)]
pub enum CancelOutcome {
    Cancelled { booking: Booking, release: SeatRelease },
    AlreadyCancelled,
    NotFound,
}

/// Seat conservation check for one offer
#[derive(Debug, Clone, Serialize)]
pub struct SeatAudit {
    pub offer_id: Uuid,
    pub seats_total: i32,
    pub seats_available: i32,
    pub confirmed_seats: i32,
}

impl SeatAudit {
    /// Seats the bookings say should be free
    pub fn expected_available(&self) -> i32 {
        self.seats_total - self.confirmed_seats
    }

    pub fn is_consistent(&self) -> bool {
        self.seats_available == self.expected_available()
    }
}

/// Successful claim: the frozen order plus the two ledger rows written with it
#[derive(Debug, Clone)]
pub struct ClaimReceipt {
    pub order: TransferOrder,
    pub split: CommissionSplit,
    pub entries: Vec<LedgerEntry>,
}

/// Result of an admin confirm/reject
#[derive(Debug, Clone)]
pub enum EntryResolution {
    /// The transition happened now
    Applied(LedgerEntry),
    /// The entry was already in the requested state; nothing changed
    Unchanged(LedgerEntry),
}

impl EntryResolution {
    pub fn entry(&self) -> &LedgerEntry {
        match self {
            EntryResolution::Applied(e) | EntryResolution::Unchanged(e) => e,
        }
    }
}

/// Ride offers and their seat counts
#[async_trait]
pub trait RideRepository: Send + Sync {
    async fn insert_offer(&self, offer: &RideOffer) -> Result<(), StoreError>;

    async fn get_offer(&self, id: Uuid) -> Result<Option<RideOffer>, StoreError>;

    async fn list_offers(&self, filter: &RideFilter) -> Result<Vec<RideOffer>, StoreError>;

    async fn set_status(
        &self,
        id: Uuid,
        status: RideStatus,
        now: DateTime<Utc>,
    ) -> Result<RideOffer, RideError>;

    /// Staff escape hatch; returns the updated offer and its audit row.
    async fn apply_override(
        &self,
        id: Uuid,
        patch: &RideOverride,
        now: DateTime<Utc>,
    ) -> Result<(RideOffer, SeatAudit), RideError>;

    async fn seat_audit(&self) -> Result<Vec<SeatAudit>, StoreError>;
}

/// Bookings; every write also moves seats in the same transaction
#[async_trait]
pub trait BookingRepository: Send + Sync {
    /// Reserve `booking.seats_count` seats and insert the booking atomically.
    async fn create_booking(
        &self,
        booking: &Booking,
        digest: &TokenDigest,
        now: DateTime<Utc>,
    ) -> Result<RideOffer, RideError>;

    async fn cancel_by_token(
        &self,
        digest: &TokenDigest,
        now: DateTime<Utc>,
    ) -> Result<CancelOutcome, StoreError>;

    async fn cancel_by_id(
        &self,
        booking_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<CancelOutcome, StoreError>;

    async fn list_bookings(&self, offer_id: Uuid) -> Result<Vec<Booking>, StoreError>;

    async fn list_user_bookings(&self, user_id: Uuid) -> Result<Vec<Booking>, StoreError>;
}

/// Transfer orders
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn insert_order(&self, order: &TransferOrder) -> Result<(), StoreError>;

    async fn get_order(&self, id: Uuid) -> Result<Option<TransferOrder>, StoreError>;

    /// Unassigned `new` orders, oldest first
    async fn list_available(&self, limit: i64) -> Result<Vec<TransferOrder>, StoreError>;

    async fn list_orders(&self) -> Result<Vec<TransferOrder>, StoreError>;

    async fn list_driver_orders(&self, driver_id: Uuid) -> Result<Vec<TransferOrder>, StoreError>;

    /// Compare-and-set the driver onto the order, freeze the split at the
    /// driver's current rate and post fare + commission entries, in one transaction.
    async fn claim_order(
        &self,
        order_id: Uuid,
        driver_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ClaimReceipt, OrderError>;

    async fn transition_order(
        &self,
        order_id: Uuid,
        next: OrderStatus,
        now: DateTime<Utc>,
    ) -> Result<TransferOrder, OrderError>;
}

/// Driver records
#[async_trait]
pub trait DriverRepository: Send + Sync {
    async fn insert_driver(&self, driver: &Driver) -> Result<(), StoreError>;

    async fn get_driver(&self, id: Uuid) -> Result<Option<Driver>, StoreError>;

    async fn list_drivers(&self) -> Result<Vec<Driver>, StoreError>;

    async fn moderate_driver(
        &self,
        id: Uuid,
        status: DriverStatus,
        commission_rate_bp: i32,
    ) -> Result<Driver, DriverError>;

    async fn set_commission(&self, id: Uuid, commission_rate_bp: i32) -> Result<Driver, DriverError>;

    async fn set_online(&self, id: Uuid, is_online: bool) -> Result<Driver, DriverError>;
}

/// Append-only balance ledger with a cached per-account balance
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Insert; a completed entry moves the cached balance in the same transaction.
    async fn append(&self, entry: NewLedgerEntry, now: DateTime<Utc>) -> Result<LedgerEntry, LedgerError>;

    /// Insert a pending withdrawal after checking the balance left over by
    /// other pending withdrawals, under the account's row lock.
    async fn request_withdrawal(
        &self,
        entry: NewLedgerEntry,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry, LedgerError>;

    async fn confirm(
        &self,
        entry_id: Uuid,
        actor: &str,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<EntryResolution, LedgerError>;

    async fn reject(
        &self,
        entry_id: Uuid,
        actor: &str,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<EntryResolution, LedgerError>;

    async fn get_entry(&self, id: Uuid) -> Result<Option<LedgerEntry>, StoreError>;

    async fn list_entries(&self, account: AccountRef, limit: i64) -> Result<Vec<LedgerEntry>, StoreError>;

    async fn list_pending(&self, kind: Option<EntryKind>) -> Result<Vec<LedgerEntry>, StoreError>;

    /// Cached balance; zero for an account that has never been touched.
    async fn balance(&self, account: AccountRef) -> Result<i64, StoreError>;

    /// Sum of completed entries, recomputed from the rows.
    async fn completed_sum(&self, account: AccountRef) -> Result<i64, StoreError>;
}
