use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::text_enum;
use crate::pii::Masked;

/// Ride offer lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    Active,
    Cancelled,
    Completed,
}

text_enum!(RideStatus, "ride status", {
    Active => "active",
    Cancelled => "cancelled",
    Completed => "completed",
});

/// Why an offer cannot take new bookings right now
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    Inactive,
    Expired,
    SoldOut,
}

/// Who created the offer. Anonymous creators leave only a name and phone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RideOwner {
    User {
        user_id: Uuid,
        name: Option<String>,
    },
    Anonymous {
        name: String,
        phone: Masked<String>,
    },
}

impl RideOwner {
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            RideOwner::User { user_id, .. } => Some(*user_id),
            RideOwner::Anonymous { .. } => None,
        }
    }
}

/// A shared ride with a finite seat inventory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RideOffer {
    pub id: Uuid,
    pub route_from: String,
    pub route_to: String,
    pub departure_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub seats_total: i32,
    pub seats_available: i32,
    /// Minor units; zero means the price is negotiable.
    pub price_per_seat: i64,
    pub car_class: Option<String>,
    pub notes: Option<String>,
    pub status: RideStatus,
    pub owner: RideOwner,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RideOffer {
    /// Build an active offer with every seat free
    pub fn new(input: NewRideOffer, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            route_from: input.route_from,
            route_to: input.route_to,
            departure_at: input.departure_at,
            expires_at: input.expires_at,
            seats_total: input.seats_total,
            seats_available: input.seats_total,
            price_per_seat: input.price_per_seat,
            car_class: input.car_class,
            notes: input.notes,
            status: RideStatus::Active,
            owner: input.owner,
            created_at: now,
            updated_at: now,
        }
    }

    /// `expires_at` when set, otherwise the departure time
    pub fn effective_expiry(&self) -> DateTime<Utc> {
        self.expires_at.unwrap_or(self.departure_at)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.effective_expiry()
    }

    /// Checked in the same order the reservation path checks them.
    pub fn unavailable_reason(&self, now: DateTime<Utc>) -> Option<UnavailableReason> {
        if self.status != RideStatus::Active {
            Some(UnavailableReason::Inactive)
        } else if self.is_expired(now) {
            Some(UnavailableReason::Expired)
        } else if self.seats_available == 0 {
            Some(UnavailableReason::SoldOut)
        } else {
            None
        }
    }
}

/// Input for creating an offer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRideOffer {
    pub route_from: String,
    pub route_to: String,
    pub departure_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub seats_total: i32,
    pub price_per_seat: i64,
    pub car_class: Option<String>,
    pub notes: Option<String>,
    pub owner: RideOwner,
}

/// Read filters for offer listings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RideFilter {
    pub route_from: Option<String>,
    pub route_to: Option<String>,
    pub departure_date: Option<NaiveDate>,
    pub status: Option<RideStatus>,
}

impl RideFilter {
    /// Route filters are case-insensitive substring matches.
    pub fn matches(&self, offer: &RideOffer) -> bool {
        fn contains(haystack: &str, needle: &Option<String>) -> bool {
            needle
                .as_ref()
                .map_or(true, |n| haystack.to_lowercase().contains(&n.to_lowercase()))
        }

        contains(&offer.route_from, &self.route_from)
            && contains(&offer.route_to, &self.route_to)
            && self
                .departure_date
                .map_or(true, |d| offer.departure_at.date_naive() == d)
            && self.status.map_or(true, |s| offer.status == s)
    }
}

/// Staff override of an offer. Every field is optional; absent fields stay untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RideOverride {
    pub status: Option<RideStatus>,
    pub seats_available: Option<i32>,
    pub price_per_seat: Option<i64>,
    pub notes: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl RideOverride {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.seats_available.is_none()
            && self.price_per_seat.is_none()
            && self.notes.is_none()
            && self.expires_at.is_none()
    }

    /// Apply to an offer, clamping seats into `0..=seats_total`.
    pub fn apply(&self, offer: &mut RideOffer, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            offer.status = status;
        }
        if let Some(seats) = self.seats_available {
            offer.seats_available = seats.clamp(0, offer.seats_total);
        }
        if let Some(price) = self.price_per_seat {
            offer.price_per_seat = price;
        }
        if let Some(notes) = &self.notes {
            offer.notes = Some(notes.clone());
        }
        if let Some(expires_at) = self.expires_at {
            offer.expires_at = Some(expires_at);
        }
        offer.updated_at = now;
    }
}

/// Booking status. There is no pending state: a booking is confirmed or absent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Confirmed,
    Cancelled,
}

text_enum!(BookingStatus, "booking status", {
    Confirmed => "confirmed",
    Cancelled => "cancelled",
});

/// Passenger contact attached to a booking
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Passenger {
    pub name: String,
    pub phone: Masked<String>,
    pub email: Option<String>,
    pub user_id: Option<Uuid>,
}

/// A passenger's claim on seats of one offer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Booking {
    pub id: Uuid,
    pub rideshare_id: Uuid,
    pub seats_count: i32,
    pub passenger: Passenger,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Booking {
    pub fn new(rideshare_id: Uuid, passenger: Passenger, seats_count: i32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            rideshare_id,
            seats_count,
            passenger,
            status: BookingStatus::Confirmed,
            created_at: now,
            cancelled_at: None,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == BookingStatus::Confirmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn offer(now: DateTime<Utc>) -> RideOffer {
        RideOffer::new(
            NewRideOffer {
                route_from: "Sukhum".to_string(),
                route_to: "Sochi Airport".to_string(),
                departure_at: now + Duration::hours(5),
                expires_at: None,
                seats_total: 3,
                price_per_seat: 150_000,
                car_class: Some("comfort".to_string()),
                notes: None,
                owner: RideOwner::Anonymous {
                    name: "Astamur".to_string(),
                    phone: Masked("+7 940 000 00 00".to_string()),
                },
            },
            now,
        )
    }

    #[test]
    fn test_effective_expiry_defaults_to_departure() {
        let now = Utc::now();
        let mut o = offer(now);
        assert_eq!(o.effective_expiry(), o.departure_at);

        o.expires_at = Some(now + Duration::hours(1));
        assert_eq!(o.effective_expiry(), now + Duration::hours(1));
        assert!(!o.is_expired(now));
        assert!(o.is_expired(now + Duration::hours(1)));
    }

    #[test]
    fn test_unavailable_reason_precedence() {
        let now = Utc::now();
        let mut o = offer(now);
        assert_eq!(o.unavailable_reason(now), None);

        o.seats_available = 0;
        assert_eq!(o.unavailable_reason(now), Some(UnavailableReason::SoldOut));

        assert_eq!(
            o.unavailable_reason(now + Duration::hours(6)),
            Some(UnavailableReason::Expired)
        );

        o.status = RideStatus::Cancelled;
        assert_eq!(o.unavailable_reason(now), Some(UnavailableReason::Inactive));
    }

    #[test]
    fn test_override_clamps_seats() {
        let now = Utc::now();
        let mut o = offer(now);

        RideOverride { seats_available: Some(10), ..Default::default() }.apply(&mut o, now);
        assert_eq!(o.seats_available, 3);

        RideOverride { seats_available: Some(-4), ..Default::default() }.apply(&mut o, now);
        assert_eq!(o.seats_available, 0);
    }

    #[test]
    fn test_filter_is_case_insensitive() {
        let now = Utc::now();
        let o = offer(now);

        let filter = RideFilter { route_to: Some("sochi".to_string()), ..Default::default() };
        assert!(filter.matches(&o));

        let filter = RideFilter { route_from: Some("Gagra".to_string()), ..Default::default() };
        assert!(!filter.matches(&o));
    }

    #[test]
    fn test_status_text_round_trip() {
        assert_eq!("completed".parse::<RideStatus>().unwrap(), RideStatus::Completed);
        assert!("COMPLETED".parse::<RideStatus>().is_err());
        assert_eq!(BookingStatus::Cancelled.to_string(), "cancelled");
    }
}
