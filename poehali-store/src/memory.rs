use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use poehali_core::repository::{
    BookingRepository, CancelOutcome, ClaimReceipt, DriverRepository, EntryResolution,
    LedgerRepository, OrderRepository, RideRepository, SeatAudit, SeatRelease, TokenDigest,
};
use poehali_core::{DriverError, LedgerError, OrderError, RideError, StoreError};
use poehali_shared::{
    AccountRef, Booking, BookingStatus, CommissionSplit, Driver, DriverStatus, EntryKind,
    EntryStatus, LedgerEntry, NewLedgerEntry, OrderStatus, RideFilter, RideOffer, RideOverride,
    RideStatus, TransferOrder, UnavailableReason,
};

#[derive(Default)]
struct State {
    offers: HashMap<Uuid, RideOffer>,
    bookings: HashMap<Uuid, Booking>,
    digests: HashMap<TokenDigest, Uuid>,
    orders: HashMap<Uuid, TransferOrder>,
    drivers: HashMap<Uuid, Driver>,
    /// Append order is creation order
    entries: Vec<LedgerEntry>,
    balances: HashMap<AccountRef, i64>,
}

impl State {
    fn reserve(&mut self, id: Uuid, seats: i32, now: DateTime<Utc>) -> Result<RideOffer, RideError> {
        let offer = self.offers.get_mut(&id).ok_or(RideError::NotFound)?;

        match offer.unavailable_reason(now) {
            Some(UnavailableReason::Inactive) => return Err(RideError::Inactive),
            Some(UnavailableReason::Expired) => return Err(RideError::Expired),
            _ => {}
        }
        if offer.seats_available < seats {
            return Err(RideError::SoldOut { requested: seats, available: offer.seats_available });
        }

        offer.seats_available -= seats;
        offer.updated_at = now;
        Ok(offer.clone())
    }

    fn release(&mut self, id: Uuid, seats: i32, now: DateTime<Utc>) -> Option<SeatRelease> {
        let offer = self.offers.get_mut(&id)?;
        let wanted = offer.seats_available.saturating_add(seats);
        let clamped = wanted > offer.seats_total;

        offer.seats_available = wanted.min(offer.seats_total);
        offer.updated_at = now;
        Some(SeatRelease { offer: offer.clone(), clamped })
    }

    fn cancel(&mut self, booking_id: Uuid, now: DateTime<Utc>) -> Result<CancelOutcome, StoreError> {
        let Some(booking) = self.bookings.get(&booking_id) else {
            return Ok(CancelOutcome::NotFound);
        };
        if !booking.is_confirmed() {
            return Ok(CancelOutcome::AlreadyCancelled);
        }

        let (offer_id, seats) = (booking.rideshare_id, booking.seats_count);
        let release = self
            .release(offer_id, seats, now)
            .ok_or_else(|| StoreError::Corrupt(format!("booking {} points at missing offer", booking_id)))?;

        let booking = self
            .bookings
            .get_mut(&booking_id)
            .ok_or_else(|| StoreError::Corrupt(format!("booking {} vanished", booking_id)))?;
        booking.status = BookingStatus::Cancelled;
        booking.cancelled_at = Some(now);

        Ok(CancelOutcome::Cancelled { booking: booking.clone(), release })
    }

    fn audit(&self, offer: &RideOffer) -> SeatAudit {
        let confirmed_seats = self
            .bookings
            .values()
            .filter(|b| b.rideshare_id == offer.id && b.is_confirmed())
            .map(|b| b.seats_count)
            .sum();

        SeatAudit {
            offer_id: offer.id,
            seats_total: offer.seats_total,
            seats_available: offer.seats_available,
            confirmed_seats,
        }
    }

    fn balance(&self, account: AccountRef) -> i64 {
        self.balances.get(&account).copied().unwrap_or(0)
    }

    fn pending_withdrawals(&self, account: AccountRef) -> i64 {
        self.entries
            .iter()
            .filter(|e| {
                e.account == account && e.kind == EntryKind::Withdrawal && e.status == EntryStatus::Pending
            })
            .map(|e| e.amount)
            .sum()
    }

    /// Balance after applying `delta`, or `Rejected` when it leaves `i64`
    fn shifted_balance(&self, account: AccountRef, delta: i64) -> Result<i64, StoreError> {
        self.balance(account).checked_add(delta).ok_or_else(|| {
            StoreError::Rejected(format!("balance of {} {} out of range", account.account_type, account.account_id))
        })
    }

    fn append(&mut self, new: NewLedgerEntry, now: DateTime<Utc>) -> Result<LedgerEntry, StoreError> {
        let entry = LedgerEntry::from_new(new, now);
        let balance = self.shifted_balance(entry.account, entry.settled_amount())?;
        self.balances.insert(entry.account, balance);
        self.entries.push(entry.clone());
        Ok(entry)
    }

    fn resolve(
        &mut self,
        entry_id: Uuid,
        target: EntryStatus,
        actor: &str,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<EntryResolution, LedgerError> {
        let idx = self
            .entries
            .iter()
            .position(|e| e.id == entry_id)
            .ok_or(LedgerError::NotFound)?;
        let current = self.entries[idx].clone();

        if current.status == target {
            return Ok(EntryResolution::Unchanged(current));
        }
        if current.status != EntryStatus::Pending {
            return Err(LedgerError::InvalidTransition {
                from: current.status.to_string(),
                to: target.to_string(),
            });
        }

        if target == EntryStatus::Completed {
            let balance = self.balance(current.account);
            if current.amount < 0 && balance + current.amount < 0 {
                return Err(LedgerError::InsufficientBalance {
                    requested: -current.amount,
                    available: balance,
                });
            }
            let next = self.shifted_balance(current.account, current.amount)?;
            self.balances.insert(current.account, next);
        }

        let entry = &mut self.entries[idx];
        entry.status = target;
        entry.resolved_by = Some(actor.to_string());
        entry.admin_note = note.map(str::to_string);
        entry.resolved_at = Some(now);
        Ok(EntryResolution::Applied(entry.clone()))
    }
}

/// Process-local store behind one lock. Every operation runs entirely inside
/// the critical section and checks everything before it writes, so a failed
/// operation leaves no trace.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RideRepository for MemoryStore {
    async fn insert_offer(&self, offer: &RideOffer) -> Result<(), StoreError> {
        self.state.lock().await.offers.insert(offer.id, offer.clone());
        Ok(())
    }

    async fn get_offer(&self, id: Uuid) -> Result<Option<RideOffer>, StoreError> {
        Ok(self.state.lock().await.offers.get(&id).cloned())
    }

    async fn list_offers(&self, filter: &RideFilter) -> Result<Vec<RideOffer>, StoreError> {
        let state = self.state.lock().await;
        let mut offers: Vec<RideOffer> = state.offers.values().filter(|o| filter.matches(o)).cloned().collect();
        offers.sort_by_key(|o| (o.departure_at, o.created_at));
        Ok(offers)
    }

    async fn set_status(&self, id: Uuid, status: RideStatus, now: DateTime<Utc>) -> Result<RideOffer, RideError> {
        let mut state = self.state.lock().await;
        let offer = state.offers.get_mut(&id).ok_or(RideError::NotFound)?;
        offer.status = status;
        offer.updated_at = now;
        Ok(offer.clone())
    }

    async fn apply_override(
        &self,
        id: Uuid,
        patch: &RideOverride,
        now: DateTime<Utc>,
    ) -> Result<(RideOffer, SeatAudit), RideError> {
        let mut state = self.state.lock().await;
        let offer = state.offers.get_mut(&id).ok_or(RideError::NotFound)?;
        patch.apply(offer, now);
        let offer = offer.clone();
        let audit = state.audit(&offer);
        Ok((offer, audit))
    }

    async fn seat_audit(&self) -> Result<Vec<SeatAudit>, StoreError> {
        let state = self.state.lock().await;
        let mut rows: Vec<SeatAudit> = state.offers.values().map(|o| state.audit(o)).collect();
        rows.sort_by_key(|a| a.offer_id);
        Ok(rows)
    }
}

#[async_trait]
impl BookingRepository for MemoryStore {
    async fn create_booking(
        &self,
        booking: &Booking,
        digest: &TokenDigest,
        now: DateTime<Utc>,
    ) -> Result<RideOffer, RideError> {
        let mut state = self.state.lock().await;
        if state.digests.contains_key(digest) {
            return Err(StoreError::Corrupt("cancel token digest collision".to_string()).into());
        }

        let offer = state.reserve(booking.rideshare_id, booking.seats_count, now)?;
        state.bookings.insert(booking.id, booking.clone());
        state.digests.insert(*digest, booking.id);
        Ok(offer)
    }

    async fn cancel_by_token(&self, digest: &TokenDigest, now: DateTime<Utc>) -> Result<CancelOutcome, StoreError> {
        let mut state = self.state.lock().await;
        let found = state
            .digests
            .iter()
            .find(|(stored, _)| stored.ct_eq(&digest.0))
            .map(|(_, id)| *id);

        match found {
            Some(booking_id) => state.cancel(booking_id, now),
            None => Ok(CancelOutcome::NotFound),
        }
    }

    async fn cancel_by_id(&self, booking_id: Uuid, now: DateTime<Utc>) -> Result<CancelOutcome, StoreError> {
        self.state.lock().await.cancel(booking_id, now)
    }

    async fn list_bookings(&self, offer_id: Uuid) -> Result<Vec<Booking>, StoreError> {
        let state = self.state.lock().await;
        let mut rows: Vec<Booking> = state.bookings.values().filter(|b| b.rideshare_id == offer_id).cloned().collect();
        rows.sort_by_key(|b| b.created_at);
        Ok(rows)
    }

    async fn list_user_bookings(&self, user_id: Uuid) -> Result<Vec<Booking>, StoreError> {
        let state = self.state.lock().await;
        let mut rows: Vec<Booking> = state
            .bookings
            .values()
            .filter(|b| b.passenger.user_id == Some(user_id))
            .cloned()
            .collect();
        rows.sort_by_key(|b| std::cmp::Reverse(b.created_at));
        Ok(rows)
    }
}

#[async_trait]
impl OrderRepository for MemoryStore {
    async fn insert_order(&self, order: &TransferOrder) -> Result<(), StoreError> {
        self.state.lock().await.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<TransferOrder>, StoreError> {
        Ok(self.state.lock().await.orders.get(&id).cloned())
    }

    async fn list_available(&self, limit: i64) -> Result<Vec<TransferOrder>, StoreError> {
        let state = self.state.lock().await;
        let mut rows: Vec<TransferOrder> = state.orders.values().filter(|o| o.is_claimable()).cloned().collect();
        rows.sort_by_key(|o| o.created_at);
        rows.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(rows)
    }

    async fn list_orders(&self) -> Result<Vec<TransferOrder>, StoreError> {
        let state = self.state.lock().await;
        let mut rows: Vec<TransferOrder> = state.orders.values().cloned().collect();
        rows.sort_by_key(|o| std::cmp::Reverse(o.created_at));
        Ok(rows)
    }

    async fn list_driver_orders(&self, driver_id: Uuid) -> Result<Vec<TransferOrder>, StoreError> {
        let state = self.state.lock().await;
        let mut rows: Vec<TransferOrder> = state
            .orders
            .values()
            .filter(|o| o.assigned_driver_id == Some(driver_id))
            .cloned()
            .collect();
        rows.sort_by_key(|o| std::cmp::Reverse(o.updated_at));
        Ok(rows)
    }

    async fn claim_order(&self, order_id: Uuid, driver_id: Uuid, now: DateTime<Utc>) -> Result<ClaimReceipt, OrderError> {
        let mut state = self.state.lock().await;

        let driver = state.drivers.get(&driver_id).ok_or(OrderError::DriverNotFound)?;
        if !driver.can_claim() {
            return Err(OrderError::DriverInactive);
        }
        let rate = driver.commission_rate_bp;

        let order = state.orders.get(&order_id).ok_or(OrderError::NotFound)?;
        if order.assigned_driver_id.is_some() {
            return Err(OrderError::AlreadyClaimed);
        }
        if order.status != OrderStatus::New {
            return Err(OrderError::InvalidTransition {
                from: order.status.to_string(),
                to: OrderStatus::Claimed.to_string(),
            });
        }

        let split = CommissionSplit::compute(order.price, rate);
        state.shifted_balance(AccountRef::driver(driver_id), split.driver_amount)?;
        state.shifted_balance(AccountRef::platform(), split.commission_amount)?;

        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or(OrderError::NotFound)?;
        order.assign(driver_id, split, now);
        let order = order.clone();

        if let Some(driver) = state.drivers.get_mut(&driver_id) {
            driver.total_orders += 1;
        }

        let reference = order.id.to_string();
        let fare = state.append(
            NewLedgerEntry::completed(AccountRef::driver(driver_id), split.driver_amount, EntryKind::Fare)
                .with_reference(reference.clone())
                .with_description(format!("{} - {}", order.route_from, order.route_to)),
            now,
        )?;
        let commission = state.append(
            NewLedgerEntry::completed(AccountRef::platform(), split.commission_amount, EntryKind::Commission)
                .with_reference(reference),
            now,
        )?;

        Ok(ClaimReceipt { order, split, entries: vec![fare, commission] })
    }

    async fn transition_order(&self, order_id: Uuid, next: OrderStatus, now: DateTime<Utc>) -> Result<TransferOrder, OrderError> {
        let mut state = self.state.lock().await;
        let order = state.orders.get_mut(&order_id).ok_or(OrderError::NotFound)?;
        if !order.status.can_transition_to(next) {
            return Err(OrderError::InvalidTransition {
                from: order.status.to_string(),
                to: next.to_string(),
            });
        }
        order.status = next;
        order.updated_at = now;
        Ok(order.clone())
    }
}

#[async_trait]
impl DriverRepository for MemoryStore {
    async fn insert_driver(&self, driver: &Driver) -> Result<(), StoreError> {
        self.state.lock().await.drivers.insert(driver.id, driver.clone());
        Ok(())
    }

    async fn get_driver(&self, id: Uuid) -> Result<Option<Driver>, StoreError> {
        Ok(self.state.lock().await.drivers.get(&id).cloned())
    }

    async fn list_drivers(&self) -> Result<Vec<Driver>, StoreError> {
        let state = self.state.lock().await;
        let mut rows: Vec<Driver> = state.drivers.values().cloned().collect();
        rows.sort_by_key(|d| std::cmp::Reverse(d.created_at));
        Ok(rows)
    }

    async fn moderate_driver(&self, id: Uuid, status: DriverStatus, commission_rate_bp: i32) -> Result<Driver, DriverError> {
        let mut state = self.state.lock().await;
        let driver = state.drivers.get_mut(&id).ok_or(DriverError::NotFound)?;
        driver.status = status;
        driver.is_active = status == DriverStatus::Approved;
        driver.commission_rate_bp = commission_rate_bp;
        if !driver.is_active {
            driver.is_online = false;
        }
        Ok(driver.clone())
    }

    async fn set_commission(&self, id: Uuid, commission_rate_bp: i32) -> Result<Driver, DriverError> {
        let mut state = self.state.lock().await;
        let driver = state.drivers.get_mut(&id).ok_or(DriverError::NotFound)?;
        driver.commission_rate_bp = commission_rate_bp;
        Ok(driver.clone())
    }

    async fn set_online(&self, id: Uuid, is_online: bool) -> Result<Driver, DriverError> {
        let mut state = self.state.lock().await;
        let driver = state.drivers.get_mut(&id).ok_or(DriverError::NotFound)?;
        driver.is_online = is_online;
        Ok(driver.clone())
    }
}

#[async_trait]
impl LedgerRepository for MemoryStore {
    async fn append(&self, entry: NewLedgerEntry, now: DateTime<Utc>) -> Result<LedgerEntry, LedgerError> {
        Ok(self.state.lock().await.append(entry, now)?)
    }

    async fn request_withdrawal(&self, entry: NewLedgerEntry, now: DateTime<Utc>) -> Result<LedgerEntry, LedgerError> {
        let mut state = self.state.lock().await;
        let available = state.balance(entry.account).saturating_add(state.pending_withdrawals(entry.account));
        if -entry.amount > available {
            return Err(LedgerError::InsufficientBalance { requested: -entry.amount, available });
        }
        Ok(state.append(entry, now)?)
    }

    async fn confirm(&self, entry_id: Uuid, actor: &str, note: Option<&str>, now: DateTime<Utc>) -> Result<EntryResolution, LedgerError> {
        self.state.lock().await.resolve(entry_id, EntryStatus::Completed, actor, note, now)
    }

    async fn reject(&self, entry_id: Uuid, actor: &str, note: Option<&str>, now: DateTime<Utc>) -> Result<EntryResolution, LedgerError> {
        self.state.lock().await.resolve(entry_id, EntryStatus::Rejected, actor, note, now)
    }

    async fn get_entry(&self, id: Uuid) -> Result<Option<LedgerEntry>, StoreError> {
        Ok(self.state.lock().await.entries.iter().find(|e| e.id == id).cloned())
    }

    async fn list_entries(&self, account: AccountRef, limit: i64) -> Result<Vec<LedgerEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .entries
            .iter()
            .rev()
            .filter(|e| e.account == account)
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }

    async fn list_pending(&self, kind: Option<EntryKind>) -> Result<Vec<LedgerEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .entries
            .iter()
            .filter(|e| e.status == EntryStatus::Pending && kind.map_or(true, |k| e.kind == k))
            .cloned()
            .collect())
    }

    async fn balance(&self, account: AccountRef) -> Result<i64, StoreError> {
        Ok(self.state.lock().await.balance(account))
    }

    async fn completed_sum(&self, account: AccountRef) -> Result<i64, StoreError> {
        let state = self.state.lock().await;
        Ok(state.entries.iter().filter(|e| e.account == account).map(LedgerEntry::settled_amount).sum())
    }
}
