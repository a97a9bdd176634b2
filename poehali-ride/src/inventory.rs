use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use poehali_core::repository::{RideRepository, SeatAudit};
use poehali_core::{bounded, Clock, RideError};
use poehali_shared::{NewRideOffer, RideOffer, RideOverride, RideOwner, RideStatus, MAX_AMOUNT};

/// Who is asking for an owner-or-staff operation
#[derive(Debug, Clone)]
pub enum Actor {
    User(Uuid),
    Admin(String),
}

#[derive(Debug, Clone, Copy)]
pub struct InventoryRules {
    pub max_seats_per_offer: i32,
}

impl Default for InventoryRules {
    fn default() -> Self {
        Self { max_seats_per_offer: 8 }
    }
}

/// Owns ride offers and is the only writer of `seats_available`.
pub struct RideInventory {
    rides: Arc<dyn RideRepository>,
    clock: Arc<dyn Clock>,
    rules: InventoryRules,
    timeout: Duration,
}

impl RideInventory {
    pub fn new(
        rides: Arc<dyn RideRepository>,
        clock: Arc<dyn Clock>,
        rules: InventoryRules,
        timeout: Duration,
    ) -> Self {
        Self { rides, clock, rules, timeout }
    }

    pub async fn create_offer(&self, new_offer: NewRideOffer) -> Result<RideOffer, RideError> {
        let now = self.clock.now();
        self.validate(&new_offer, now)?;

        let offer = RideOffer::new(new_offer, now);
        bounded(self.timeout, self.rides.insert_offer(&offer)).await?;

        info!(
            offer_id = %offer.id,
            seats_total = offer.seats_total,
            anonymous = offer.owner.user_id().is_none(),
            "Ride offer created"
        );
        Ok(offer)
    }

    fn validate(&self, new_offer: &NewRideOffer, now: chrono::DateTime<chrono::Utc>) -> Result<(), RideError> {
        if new_offer.route_from.trim().is_empty() || new_offer.route_to.trim().is_empty() {
            return Err(RideError::Validation("route_from and route_to are required".into()));
        }
        if new_offer.seats_total < 1 || new_offer.seats_total > self.rules.max_seats_per_offer {
            return Err(RideError::Validation(format!(
                "seats_total must be between 1 and {}",
                self.rules.max_seats_per_offer
            )));
        }
        if !(0..=MAX_AMOUNT).contains(&new_offer.price_per_seat) {
            return Err(RideError::Validation(format!("price_per_seat must be between 0 and {}", MAX_AMOUNT)));
        }
        if new_offer.departure_at <= now {
            return Err(RideError::Validation("departure_at must be in the future".into()));
        }
        if new_offer.expires_at.is_some_and(|e| e <= now) {
            return Err(RideError::Validation("expires_at must be in the future".into()));
        }
        if let RideOwner::Anonymous { name, phone } = &new_offer.owner {
            if name.trim().is_empty() || phone.expose().trim().is_empty() {
                return Err(RideError::Validation("name and phone are required".into()));
            }
        }
        Ok(())
    }

    pub async fn get_offer(&self, id: Uuid) -> Result<RideOffer, RideError> {
        bounded(self.timeout, self.rides.get_offer(id))
            .await?
            .ok_or(RideError::NotFound)
    }

    /// Owner or staff only. Bookings are left as they are.
    pub async fn set_status(&self, id: Uuid, status: RideStatus, actor: &Actor) -> Result<RideOffer, RideError> {
        let offer = self.get_offer(id).await?;

        if let Actor::User(user_id) = actor {
            if offer.owner.user_id() != Some(*user_id) {
                return Err(RideError::Forbidden("only the offer owner can change its status".into()));
            }
        }

        let offer = bounded(self.timeout, self.rides.set_status(id, status, self.clock.now())).await?;
        info!(offer_id = %id, status = %status, actor = ?actor, "Ride offer status changed");
        Ok(offer)
    }

    /// Staff override. Accepted even when it breaks seat conservation; the
    /// drift is logged and shows up in [`RideInventory::audit`].
    pub async fn override_offer(
        &self,
        id: Uuid,
        patch: &RideOverride,
        admin: &str,
    ) -> Result<(RideOffer, SeatAudit), RideError> {
        if patch.is_empty() {
            return Err(RideError::Validation("nothing to update".into()));
        }
        if patch.price_per_seat.is_some_and(|p| !(0..=MAX_AMOUNT).contains(&p)) {
            return Err(RideError::Validation(format!("price_per_seat must be between 0 and {}", MAX_AMOUNT)));
        }

        let (offer, audit) = bounded(self.timeout, self.rides.apply_override(id, patch, self.clock.now())).await?;

        if audit.is_consistent() {
            info!(offer_id = %id, admin, "Ride offer overridden");
        } else {
            warn!(
                offer_id = %id,
                admin,
                seats_available = audit.seats_available,
                expected = audit.expected_available(),
                drift = audit.seats_available - audit.expected_available(),
                "Override left seats_available out of line with confirmed bookings"
            );
        }
        Ok((offer, audit))
    }

    /// Offers whose stored `seats_available` disagrees with their bookings
    pub async fn audit(&self) -> Result<Vec<SeatAudit>, RideError> {
        let rows = bounded(self.timeout, self.rides.seat_audit()).await?;
        Ok(rows.into_iter().filter(|a| !a.is_consistent()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use crate::booking::{BookingRequest, BookingService};
    use poehali_core::FixedClock;
    use poehali_shared::{Masked, Passenger};
    use poehali_store::MemoryStore;

    fn setup() -> (RideInventory, BookingService, Arc<FixedClock>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 7, 1, 9, 0, 0).unwrap()));
        let inventory = RideInventory::new(store.clone(), clock.clone(), InventoryRules::default(), Duration::from_secs(1));
        let bookings = BookingService::new(store.clone(), store, clock.clone(), Duration::from_secs(1));
        (inventory, bookings, clock)
    }

    fn one_seat(offer_id: Uuid) -> BookingRequest {
        BookingRequest {
            rideshare_id: offer_id,
            passenger: Passenger {
                name: "Zarina".to_string(),
                phone: Masked("+79401112233".to_string()),
                email: None,
                user_id: None,
            },
            seats_count: 1,
        }
    }

    fn new_offer(clock: &FixedClock, seats: i32, owner: RideOwner) -> NewRideOffer {
        NewRideOffer {
            route_from: "Sochi".to_string(),
            route_to: "Sukhum".to_string(),
            departure_at: clock.now() + ChronoDuration::hours(6),
            expires_at: None,
            seats_total: seats,
            price_per_seat: 120_000,
            car_class: Some("comfort".to_string()),
            notes: None,
            owner,
        }
    }

    fn user() -> RideOwner {
        RideOwner::User { user_id: Uuid::new_v4(), name: Some("Aslan".to_string()) }
    }

    #[tokio::test]
    async fn test_create_offer_starts_full_and_active() {
        let (inventory, _, clock) = setup();
        let offer = inventory.create_offer(new_offer(&clock, 4, user())).await.unwrap();
        assert_eq!(offer.seats_available, 4);
        assert_eq!(offer.status, RideStatus::Active);
    }

    #[tokio::test]
    async fn test_create_offer_validation() {
        let (inventory, _, clock) = setup();

        for seats in [0, 9] {
            let err = inventory.create_offer(new_offer(&clock, seats, user())).await.unwrap_err();
            assert!(matches!(err, RideError::Validation(_)), "seats_total {}", seats);
        }

        let mut past = new_offer(&clock, 2, user());
        past.departure_at = clock.now() - ChronoDuration::minutes(1);
        assert!(matches!(inventory.create_offer(past).await, Err(RideError::Validation(_))));

        let mut expired = new_offer(&clock, 2, user());
        expired.expires_at = Some(clock.now());
        assert!(matches!(inventory.create_offer(expired).await, Err(RideError::Validation(_))));

        let mut pricey = new_offer(&clock, 2, user());
        pricey.price_per_seat = MAX_AMOUNT + 1;
        assert!(matches!(inventory.create_offer(pricey).await, Err(RideError::Validation(_))));

        let anonymous = RideOwner::Anonymous { name: "Marat".to_string(), phone: Masked(" ".to_string()) };
        assert!(matches!(
            inventory.create_offer(new_offer(&clock, 2, anonymous)).await,
            Err(RideError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_expiry_is_checked_against_effective_expiry() {
        let (inventory, bookings, clock) = setup();
        let mut s = new_offer(&clock, 2, user());
        s.expires_at = Some(clock.now() + ChronoDuration::hours(1));
        let offer = inventory.create_offer(s).await.unwrap();

        clock.advance(ChronoDuration::hours(1));
        let err = bookings.book(one_seat(offer.id)).await.unwrap_err();
        assert!(matches!(err, RideError::Expired));

        // Status is untouched; expiry is derived
        assert_eq!(inventory.get_offer(offer.id).await.unwrap().status, RideStatus::Active);
    }

    #[tokio::test]
    async fn test_only_owner_or_admin_sets_status() {
        let (inventory, bookings, clock) = setup();
        let owner_id = Uuid::new_v4();
        let offer = inventory
            .create_offer(new_offer(&clock, 3, RideOwner::User { user_id: owner_id, name: None }))
            .await
            .unwrap();

        let err = inventory
            .set_status(offer.id, RideStatus::Cancelled, &Actor::User(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, RideError::Forbidden(_)));

        let updated = inventory
            .set_status(offer.id, RideStatus::Completed, &Actor::User(owner_id))
            .await
            .unwrap();
        assert_eq!(updated.status, RideStatus::Completed);

        let err = bookings.book(one_seat(offer.id)).await.unwrap_err();
        assert!(matches!(err, RideError::Inactive));

        let updated = inventory
            .set_status(offer.id, RideStatus::Active, &Actor::Admin("ops@poehali".to_string()))
            .await
            .unwrap();
        assert_eq!(updated.status, RideStatus::Active);
    }

    #[tokio::test]
    async fn test_override_drift_is_reported_by_audit() {
        let (inventory, _, clock) = setup();
        let offer = inventory.create_offer(new_offer(&clock, 4, user())).await.unwrap();
        assert!(inventory.audit().await.unwrap().is_empty());

        let patch = RideOverride { seats_available: Some(10), ..Default::default() };
        let (updated, audit) = inventory.override_offer(offer.id, &patch, "ops").await.unwrap();
        assert_eq!(updated.seats_available, 4, "clamped to seats_total");
        assert!(audit.is_consistent());

        let patch = RideOverride { seats_available: Some(1), ..Default::default() };
        let (_, audit) = inventory.override_offer(offer.id, &patch, "ops").await.unwrap();
        assert!(!audit.is_consistent());

        let report = inventory.audit().await.unwrap();
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].offer_id, offer.id);
        assert_eq!(report[0].expected_available(), 4);
    }

    #[tokio::test]
    async fn test_empty_override_is_rejected() {
        let (inventory, _, clock) = setup();
        let offer = inventory.create_offer(new_offer(&clock, 2, user())).await.unwrap();
        let err = inventory.override_offer(offer.id, &RideOverride::default(), "ops").await.unwrap_err();
        assert!(matches!(err, RideError::Validation(_)));

        let patch = RideOverride { price_per_seat: Some(i64::MAX), ..Default::default() };
        let err = inventory.override_offer(offer.id, &patch, "ops").await.unwrap_err();
        assert!(matches!(err, RideError::Validation(_)));
    }
}
