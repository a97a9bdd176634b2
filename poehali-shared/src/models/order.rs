use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::text_enum;
use crate::pii::Masked;

/// Transfer order status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Waiting for a driver
    New,
    Claimed,
    Completed,
    Cancelled,
}

text_enum!(OrderStatus, "order status", {
    New => "new",
    Claimed => "claimed",
    Completed => "completed",
    Cancelled => "cancelled",
});

impl OrderStatus {
    /// Staff transitions. Claiming is not here: it only happens through the claim engine.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Claimed, OrderStatus::Completed)
                | (OrderStatus::New, OrderStatus::Cancelled)
                | (OrderStatus::Claimed, OrderStatus::Cancelled)
        )
    }
}

/// A fixed-price transfer request that exactly one driver may claim
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferOrder {
    pub id: Uuid,
    pub route_from: String,
    pub route_to: String,
    pub pickup_at: DateTime<Utc>,
    pub passenger_name: String,
    pub passenger_phone: Masked<String>,
    pub passengers_count: i32,
    pub car_class: Option<String>,
    pub notes: Option<String>,
    pub price: i64,
    pub status: OrderStatus,
    pub assigned_driver_id: Option<Uuid>,
    pub driver_amount: Option<i64>,
    pub commission_amount: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransferOrder {
    pub fn new(input: NewTransferOrder, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            route_from: input.route_from,
            route_to: input.route_to,
            pickup_at: input.pickup_at,
            passenger_name: input.passenger_name,
            passenger_phone: input.passenger_phone,
            passengers_count: input.passengers_count,
            car_class: input.car_class,
            notes: input.notes,
            price: input.price,
            status: OrderStatus::New,
            assigned_driver_id: None,
            driver_amount: None,
            commission_amount: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_claimable(&self) -> bool {
        self.assigned_driver_id.is_none() && self.status == OrderStatus::New
    }

    /// Freeze the split onto the order. Callers must already hold the claim.
    pub fn assign(&mut self, driver_id: Uuid, split: CommissionSplit, now: DateTime<Utc>) {
        self.assigned_driver_id = Some(driver_id);
        self.status = OrderStatus::Claimed;
        self.driver_amount = Some(split.driver_amount);
        self.commission_amount = Some(split.commission_amount);
        self.updated_at = now;
    }
}

/// Input for a new transfer order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTransferOrder {
    pub route_from: String,
    pub route_to: String,
    pub pickup_at: DateTime<Utc>,
    pub passenger_name: String,
    pub passenger_phone: Masked<String>,
    pub passengers_count: i32,
    pub car_class: Option<String>,
    pub notes: Option<String>,
    pub price: i64,
}

/// Basis points in one whole (100%)
pub const BASIS_POINTS: i64 = 10_000;

/// Fare split between driver and platform, frozen at claim time
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommissionSplit {
    pub driver_amount: i64,
    pub commission_amount: i64,
}

impl CommissionSplit {
    /// Commission rounds half up to the nearest minor unit; the driver gets the rest,
    /// so the two parts always add back to the price.
    ///
    /// The Postgres claim statement computes the same expression in SQL:
    /// `(price * rate + 5000) / 10000`.
    pub fn compute(price: i64, commission_rate_bp: i32) -> Self {
        let numerator = i128::from(price) * i128::from(commission_rate_bp) + i128::from(BASIS_POINTS / 2);
        let commission_amount = (numerator / i128::from(BASIS_POINTS)) as i64;

        Self {
            driver_amount: price - commission_amount,
            commission_amount,
        }
    }
}
