use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::text_enum;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    User,
    Driver,
    /// The service itself; books commissions.
    Platform,
}

text_enum!(AccountType, "account type", {
    User => "user",
    Driver => "driver",
    Platform => "platform",
});

/// Identifies one balance
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountRef {
    pub account_type: AccountType,
    pub account_id: Uuid,
}

impl AccountRef {
    pub fn user(id: Uuid) -> Self {
        Self { account_type: AccountType::User, account_id: id }
    }

    pub fn driver(id: Uuid) -> Self {
        Self { account_type: AccountType::Driver, account_id: id }
    }

    /// There is exactly one platform account, keyed by the nil UUID.
    pub fn platform() -> Self {
        Self { account_type: AccountType::Platform, account_id: Uuid::nil() }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Fare,
    Commission,
    Withdrawal,
    Deposit,
    Adjustment,
}

text_enum!(EntryKind, "entry kind", {
    Fare => "fare",
    Commission => "commission",
    Withdrawal => "withdrawal",
    Deposit => "deposit",
    Adjustment => "adjustment",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Completed,
    Rejected,
}

text_enum!(EntryStatus, "entry status", {
    Pending => "pending",
    Completed => "completed",
    Rejected => "rejected",
});

/// An immutable money movement. Only `status` (with its resolution note,
/// resolver and timestamp) ever changes, and only once, out of `Pending`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerEntry {
    pub id: Uuid,
    #[serde(flatten)]
    pub account: AccountRef,
    /// Signed, minor units
    pub amount: i64,
    pub kind: EntryKind,
    pub status: EntryStatus,
    pub description: Option<String>,
    pub reference: Option<String>,
    pub actor: Option<String>,
    pub admin_note: Option<String>,
    pub resolved_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl LedgerEntry {
    pub fn from_new(new: NewLedgerEntry, now: DateTime<Utc>) -> Self {
        let resolved_at = (new.status != EntryStatus::Pending).then_some(now);
        Self {
            id: Uuid::new_v4(),
            account: new.account,
            amount: new.amount,
            kind: new.kind,
            status: new.status,
            description: new.description,
            reference: new.reference,
            actor: new.actor,
            admin_note: None,
            resolved_by: None,
            created_at: now,
            resolved_at,
        }
    }

    /// Contribution to the cached balance
    pub fn settled_amount(&self) -> i64 {
        if self.status == EntryStatus::Completed {
            self.amount
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLedgerEntry {
    pub account: AccountRef,
    pub amount: i64,
    pub kind: EntryKind,
    pub status: EntryStatus,
    pub description: Option<String>,
    pub reference: Option<String>,
    pub actor: Option<String>,
}

impl NewLedgerEntry {
    pub fn completed(account: AccountRef, amount: i64, kind: EntryKind) -> Self {
        Self {
            account,
            amount,
            kind,
            status: EntryStatus::Completed,
            description: None,
            reference: None,
            actor: None,
        }
    }

    pub fn pending(account: AccountRef, amount: i64, kind: EntryKind) -> Self {
        Self { status: EntryStatus::Pending, ..Self::completed(account, amount, kind) }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }
}

/// Cached balance of one account
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    #[serde(flatten)]
    pub account: AccountRef,
    pub balance: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_completed_entries_settle() {
        let now = Utc::now();
        let driver = AccountRef::driver(Uuid::new_v4());

        let pending = LedgerEntry::from_new(NewLedgerEntry::pending(driver, -500, EntryKind::Withdrawal), now);
        assert_eq!(pending.settled_amount(), 0);
        assert!(pending.resolved_at.is_none());

        let fare = LedgerEntry::from_new(NewLedgerEntry::completed(driver, 850, EntryKind::Fare), now);
        assert_eq!(fare.settled_amount(), 850);
        assert_eq!(fare.resolved_at, Some(now));
    }

    #[test]
    fn test_entry_json_is_flat() {
        let entry = LedgerEntry::from_new(
            NewLedgerEntry::completed(AccountRef::platform(), 150, EntryKind::Commission),
            Utc::now(),
        );
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["account_type"], "platform");
        assert_eq!(json["kind"], "commission");
        assert_eq!(json["status"], "completed");
    }
}
