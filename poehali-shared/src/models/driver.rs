use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::text_enum;
use crate::pii::Masked;

/// Driver moderation status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DriverStatus {
    Pending,
    Approved,
    Rejected,
}

text_enum!(DriverStatus, "driver status", {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
});

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Driver {
    pub id: Uuid,
    pub name: String,
    pub phone: Masked<String>,
    pub status: DriverStatus,
    pub is_active: bool,
    pub is_online: bool,
    /// Current rate in basis points; only future claims see changes.
    pub commission_rate_bp: i32,
    pub total_orders: i32,
    pub created_at: DateTime<Utc>,
}

impl Driver {
    pub fn new(input: NewDriver, commission_rate_bp: i32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: input.name,
            phone: input.phone,
            status: DriverStatus::Pending,
            is_active: false,
            is_online: false,
            commission_rate_bp,
            total_orders: 0,
            created_at: now,
        }
    }

    pub fn can_claim(&self) -> bool {
        self.status == DriverStatus::Approved && self.is_active
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDriver {
    pub name: String,
    pub phone: Masked<String>,
}
