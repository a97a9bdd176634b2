use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use poehali_core::repository::{BookingRepository, CancelOutcome, RideRepository};
use poehali_core::{bounded, Clock, RideError};
use poehali_shared::{Booking, Passenger, RideFilter, RideOffer, UnavailableReason};

use crate::token::{self, CancelToken};

#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub rideshare_id: Uuid,
    pub passenger: Passenger,
    pub seats_count: i32,
}

/// What the booker gets back. `cancel_token` is never shown again.
#[derive(Debug, Clone)]
pub struct BookingReceipt {
    pub booking: Booking,
    pub cancel_token: CancelToken,
    pub seats_left: i32,
}

/// An offer as seen by a list view
#[derive(Debug, Clone, Serialize)]
pub struct OfferListing {
    #[serde(flatten)]
    pub offer: RideOffer,
    pub available: bool,
    pub unavailable_reason: Option<UnavailableReason>,
}

pub struct BookingService {
    rides: Arc<dyn RideRepository>,
    bookings: Arc<dyn BookingRepository>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl BookingService {
    pub fn new(
        rides: Arc<dyn RideRepository>,
        bookings: Arc<dyn BookingRepository>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Self {
        Self { rides, bookings, clock, timeout }
    }

    /// Reserve seats and record the booking in one transaction.
    pub async fn book(&self, request: BookingRequest) -> Result<BookingReceipt, RideError> {
        if request.seats_count < 1 {
            return Err(RideError::Validation("seats_count must be at least 1".into()));
        }
        if request.passenger.name.trim().is_empty() || request.passenger.phone.expose().trim().is_empty() {
            return Err(RideError::Validation("passenger name and phone are required".into()));
        }

        let now = self.clock.now();
        let booking = Booking::new(request.rideshare_id, request.passenger, request.seats_count, now);
        let cancel_token = CancelToken::generate();

        let offer = bounded(
            self.timeout,
            self.bookings.create_booking(&booking, &cancel_token.digest(), now),
        )
        .await?;

        info!(
            booking_id = %booking.id,
            offer_id = %offer.id,
            seats = booking.seats_count,
            seats_left = offer.seats_available,
            "Seats booked"
        );

        Ok(BookingReceipt { booking, cancel_token, seats_left: offer.seats_available })
    }

    /// Token-keyed, idempotent cancel. A replay answers `AlreadyCancelled`
    /// and releases nothing.
    pub async fn cancel_by_token(&self, raw_token: &str) -> Result<CancelOutcome, RideError> {
        // Digest first so malformed input costs the same as a real lookup
        let digest = token::digest(raw_token);
        if !token::is_well_formed(raw_token) {
            return Ok(CancelOutcome::NotFound);
        }

        let outcome = bounded(self.timeout, self.bookings.cancel_by_token(&digest, self.clock.now())).await?;
        self.log_cancel(&outcome, None);
        Ok(outcome)
    }

    /// Staff cancellation; same transaction shape as the token path
    pub async fn cancel_by_id(&self, booking_id: Uuid, admin: &str) -> Result<CancelOutcome, RideError> {
        let outcome = bounded(self.timeout, self.bookings.cancel_by_id(booking_id, self.clock.now())).await?;
        self.log_cancel(&outcome, Some(admin));
        Ok(outcome)
    }

    fn log_cancel(&self, outcome: &CancelOutcome, admin: Option<&str>) {
        if let CancelOutcome::Cancelled { booking, release } = outcome {
            info!(
                booking_id = %booking.id,
                offer_id = %booking.rideshare_id,
                seats = booking.seats_count,
                seats_available = release.offer.seats_available,
                admin = admin.unwrap_or("-"),
                "Booking cancelled"
            );
            if release.clamped {
                warn!(
                    offer_id = %booking.rideshare_id,
                    seats = booking.seats_count,
                    seats_total = release.offer.seats_total,
                    "Seat release clamped at seats_total"
                );
            }
        }
    }

    /// Every matching offer, flagged. `only_available` drops the ones that
    /// cannot take a booking right now.
    pub async fn list_offers(&self, filter: &RideFilter, only_available: bool) -> Result<Vec<OfferListing>, RideError> {
        let now = self.clock.now();
        let offers = bounded(self.timeout, self.rides.list_offers(filter)).await?;

        Ok(offers
            .into_iter()
            .map(|offer| {
                let unavailable_reason = offer.unavailable_reason(now);
                OfferListing { offer, available: unavailable_reason.is_none(), unavailable_reason }
            })
            .filter(|listing| !only_available || listing.available)
            .collect())
    }

    pub async fn user_bookings(&self, user_id: Uuid) -> Result<Vec<Booking>, RideError> {
        Ok(bounded(self.timeout, self.bookings.list_user_bookings(user_id)).await?)
    }

    pub async fn offer_bookings(&self, offer_id: Uuid) -> Result<Vec<Booking>, RideError> {
        bounded(self.timeout, self.rides.get_offer(offer_id))
            .await?
            .ok_or(RideError::NotFound)?;
        Ok(bounded(self.timeout, self.bookings.list_bookings(offer_id)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{InventoryRules, RideInventory};
    use chrono::{Duration as ChronoDuration, Utc};
    use poehali_core::{FixedClock, SystemClock};
    use poehali_shared::{Masked, NewRideOffer, RideOwner};
    use poehali_store::MemoryStore;

    struct Fixture {
        inventory: RideInventory,
        bookings: BookingService,
        clock: Arc<FixedClock>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::new(Utc::now()));
        Fixture {
            inventory: RideInventory::new(store.clone(), clock.clone(), InventoryRules::default(), Duration::from_secs(1)),
            bookings: BookingService::new(store.clone(), store, clock.clone(), Duration::from_secs(1)),
            clock,
        }
    }

    async fn offer(inventory: &RideInventory, clock: &FixedClock, seats: i32) -> RideOffer {
        inventory
            .create_offer(NewRideOffer {
                route_from: "Adler airport".to_string(),
                route_to: "Novy Afon".to_string(),
                departure_at: clock.now() + ChronoDuration::hours(4),
                expires_at: None,
                seats_total: seats,
                price_per_seat: 0,
                car_class: None,
                notes: None,
                owner: RideOwner::Anonymous { name: "Beslan".to_string(), phone: Masked("+79407000000".to_string()) },
            })
            .await
            .unwrap()
    }

    fn request(offer_id: Uuid, seats: i32) -> BookingRequest {
        BookingRequest {
            rideshare_id: offer_id,
            passenger: Passenger {
                name: "Dana".to_string(),
                phone: Masked("+79990001122".to_string()),
                email: None,
                user_id: None,
            },
            seats_count: seats,
        }
    }

    #[tokio::test]
    async fn test_book_cancel_walkthrough() {
        let f = fixture();
        let o = offer(&f.inventory, &f.clock, 3).await;

        let first = f.bookings.book(request(o.id, 2)).await.unwrap();
        assert_eq!(first.seats_left, 1);

        let err = f.bookings.book(request(o.id, 2)).await.unwrap_err();
        assert!(matches!(err, RideError::SoldOut { requested: 2, available: 1 }));

        let second = f.bookings.book(request(o.id, 1)).await.unwrap();
        assert_eq!(second.seats_left, 0);

        match f.bookings.cancel_by_token(first.cancel_token.as_str()).await.unwrap() {
            CancelOutcome::Cancelled { booking, release } => {
                assert_eq!(booking.id, first.booking.id);
                assert_eq!(release.offer.seats_available, 2);
                assert!(!release.clamped);
            }
            other => panic!("expected Cancelled, got {:?}", other),
        }

        let replay = f.bookings.cancel_by_token(first.cancel_token.as_str()).await.unwrap();
        assert!(matches!(replay, CancelOutcome::AlreadyCancelled));
        assert_eq!(f.inventory.get_offer(o.id).await.unwrap().seats_available, 2);

        assert!(f.inventory.audit().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_tokens_are_not_found() {
        let f = fixture();
        let o = offer(&f.inventory, &f.clock, 2).await;
        f.bookings.book(request(o.id, 1)).await.unwrap();

        let stranger = CancelToken::generate();
        assert!(matches!(
            f.bookings.cancel_by_token(stranger.as_str()).await.unwrap(),
            CancelOutcome::NotFound
        ));
        assert!(matches!(f.bookings.cancel_by_token("../etc").await.unwrap(), CancelOutcome::NotFound));
        assert_eq!(f.inventory.get_offer(o.id).await.unwrap().seats_available, 1);
    }

    #[tokio::test]
    async fn test_booking_validation_happens_before_reservation() {
        let f = fixture();
        let o = offer(&f.inventory, &f.clock, 2).await;

        let err = f.bookings.book(request(o.id, 0)).await.unwrap_err();
        assert!(matches!(err, RideError::Validation(_)));

        let mut nameless = request(o.id, 1);
        nameless.passenger.name = "  ".to_string();
        assert!(matches!(f.bookings.book(nameless).await, Err(RideError::Validation(_))));

        assert!(matches!(f.bookings.book(request(Uuid::new_v4(), 1)).await, Err(RideError::NotFound)));
        assert_eq!(f.inventory.get_offer(o.id).await.unwrap().seats_available, 2);
    }

    #[tokio::test]
    async fn test_admin_cancel_releases_once() {
        let f = fixture();
        let o = offer(&f.inventory, &f.clock, 2).await;
        let receipt = f.bookings.book(request(o.id, 2)).await.unwrap();

        let outcome = f.bookings.cancel_by_id(receipt.booking.id, "ops").await.unwrap();
        assert!(matches!(outcome, CancelOutcome::Cancelled { .. }));

        // The passenger's link is now spent as well
        let replay = f.bookings.cancel_by_token(receipt.cancel_token.as_str()).await.unwrap();
        assert!(matches!(replay, CancelOutcome::AlreadyCancelled));
        assert_eq!(f.inventory.get_offer(o.id).await.unwrap().seats_available, 2);

        assert!(matches!(
            f.bookings.cancel_by_id(Uuid::new_v4(), "ops").await.unwrap(),
            CancelOutcome::NotFound
        ));
    }

    #[tokio::test]
    async fn test_listing_flags_and_filters() {
        let f = fixture();
        let open = offer(&f.inventory, &f.clock, 2).await;
        let full = offer(&f.inventory, &f.clock, 1).await;
        f.bookings.book(request(full.id, 1)).await.unwrap();

        let all = f.bookings.list_offers(&RideFilter::default(), false).await.unwrap();
        assert_eq!(all.len(), 2);
        let sold_out = all.iter().find(|l| l.offer.id == full.id).unwrap();
        assert!(!sold_out.available);
        assert_eq!(sold_out.unavailable_reason, Some(UnavailableReason::SoldOut));

        let available = f.bookings.list_offers(&RideFilter::default(), true).await.unwrap();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].offer.id, open.id);

        let filter = RideFilter { route_to: Some("afon".to_string()), ..Default::default() };
        assert_eq!(f.bookings.list_offers(&filter, false).await.unwrap().len(), 2);
        let filter = RideFilter { route_to: Some("Gudauta".to_string()), ..Default::default() };
        assert!(f.bookings.list_offers(&filter, false).await.unwrap().is_empty());

        let json = serde_json::to_value(&available[0]).unwrap();
        assert_eq!(json["available"], true);
        assert_eq!(json["route_to"], "Novy Afon");
    }

    #[tokio::test]
    async fn test_user_bookings() {
        let f = fixture();
        let o = offer(&f.inventory, &f.clock, 3).await;
        let user_id = Uuid::new_v4();

        let mut mine = request(o.id, 1);
        mine.passenger.user_id = Some(user_id);
        f.bookings.book(mine).await.unwrap();
        f.bookings.book(request(o.id, 1)).await.unwrap();

        let rows = f.bookings.user_bookings(user_id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(f.bookings.offer_bookings(o.id).await.unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_no_oversell_under_concurrent_bookings() {
        let store = Arc::new(MemoryStore::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let inventory = RideInventory::new(store.clone(), clock.clone(), InventoryRules::default(), Duration::from_secs(5));
        let service = Arc::new(BookingService::new(store.clone(), store, clock, Duration::from_secs(5)));

        let o = inventory
            .create_offer(NewRideOffer {
                route_from: "Gagra".to_string(),
                route_to: "Sochi".to_string(),
                departure_at: Utc::now() + ChronoDuration::hours(2),
                expires_at: None,
                seats_total: 5,
                price_per_seat: 80_000,
                car_class: None,
                notes: None,
                owner: RideOwner::User { user_id: Uuid::new_v4(), name: None },
            })
            .await
            .unwrap();

        let offer_id = o.id;
        let handles: Vec<_> = (0..40)
            .map(|_| {
                let service = service.clone();
                tokio::spawn(async move { service.book(request(offer_id, 1)).await })
            })
            .collect();

        let mut booked = 0;
        let mut sold_out = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => booked += 1,
                Err(RideError::SoldOut { .. }) => sold_out += 1,
                Err(e) => panic!("unexpected error: {:?}", e),
            }
        }

        assert_eq!(booked, 5);
        assert_eq!(sold_out, 35);
        assert_eq!(inventory.get_offer(o.id).await.unwrap().seats_available, 0);
        assert!(inventory.audit().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_cancels_release_once() {
        let f = fixture();
        let o = offer(&f.inventory, &f.clock, 3).await;
        let receipt = f.bookings.book(request(o.id, 3)).await.unwrap();
        let service = Arc::new(f.bookings);

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let service = service.clone();
                let token = receipt.cancel_token.clone();
                tokio::spawn(async move { service.cancel_by_token(token.as_str()).await })
            })
            .collect();

        let mut cancelled = 0;
        for handle in handles {
            if let CancelOutcome::Cancelled { .. } = handle.await.unwrap().unwrap() {
                cancelled += 1;
            }
        }

        assert_eq!(cancelled, 1);
        assert_eq!(f.inventory.get_offer(o.id).await.unwrap().seats_available, 3);
    }
}
