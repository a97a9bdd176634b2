use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use poehali_core::repository::{EntryResolution, LedgerRepository};
use poehali_core::{bounded, Clock, LedgerError};
use poehali_shared::{Account, AccountRef, EntryKind, LedgerEntry, NewLedgerEntry, MAX_AMOUNT};

#[derive(Debug, Clone, Copy)]
pub struct LedgerRules {
    pub page_size: i64,
}

impl Default for LedgerRules {
    fn default() -> Self {
        Self { page_size: 50 }
    }
}

/// Cached balance next to the sum it is supposed to equal
#[derive(Debug, Clone, Serialize)]
pub struct Reconciliation {
    #[serde(flatten)]
    pub account: AccountRef,
    pub balance: i64,
    pub completed_sum: i64,
    pub consistent: bool,
}

pub struct LedgerService {
    ledger: Arc<dyn LedgerRepository>,
    clock: Arc<dyn Clock>,
    rules: LedgerRules,
    timeout: Duration,
}

impl LedgerService {
    pub fn new(ledger: Arc<dyn LedgerRepository>, clock: Arc<dyn Clock>, rules: LedgerRules, timeout: Duration) -> Self {
        Self { ledger, clock, rules, timeout }
    }

    pub async fn append(&self, entry: NewLedgerEntry) -> Result<LedgerEntry, LedgerError> {
        let entry = bounded(self.timeout, self.ledger.append(entry, self.clock.now())).await?;
        info!(
            entry_id = %entry.id,
            account_type = %entry.account.account_type,
            account_id = %entry.account.account_id,
            amount = entry.amount,
            kind = %entry.kind,
            status = %entry.status,
            "Ledger entry appended"
        );
        Ok(entry)
    }

    /// Pending negative entry; the balance moves only on confirmation.
    /// `requisites` says where the money goes and cannot be blank.
    pub async fn request_withdrawal(
        &self,
        account: AccountRef,
        amount: i64,
        requisites: &str,
    ) -> Result<LedgerEntry, LedgerError> {
        require_amount(amount)?;
        if requisites.trim().is_empty() {
            return Err(LedgerError::Validation("requisites are required".into()));
        }

        let entry = NewLedgerEntry::pending(account, -amount, EntryKind::Withdrawal)
            .with_description("Withdrawal request")
            .with_reference(requisites.trim());

        let entry = bounded(self.timeout, self.ledger.request_withdrawal(entry, self.clock.now())).await?;
        info!(entry_id = %entry.id, account_id = %account.account_id, amount, "Withdrawal requested");
        Ok(entry)
    }

    pub async fn request_deposit(
        &self,
        account: AccountRef,
        amount: i64,
        payment_method: Option<String>,
    ) -> Result<LedgerEntry, LedgerError> {
        require_amount(amount)?;

        let mut entry = NewLedgerEntry::pending(account, amount, EntryKind::Deposit)
            .with_description("Deposit request");
        entry.reference = payment_method;

        let entry = bounded(self.timeout, self.ledger.append(entry, self.clock.now())).await?;
        info!(entry_id = %entry.id, account_id = %account.account_id, amount, "Deposit requested");
        Ok(entry)
    }

    pub async fn confirm(&self, entry_id: Uuid, admin: &str, note: Option<&str>) -> Result<EntryResolution, LedgerError> {
        let resolution = bounded(self.timeout, self.ledger.confirm(entry_id, admin, note, self.clock.now())).await?;
        log_resolution(&resolution, admin);
        Ok(resolution)
    }

    pub async fn reject(&self, entry_id: Uuid, admin: &str, note: Option<&str>) -> Result<EntryResolution, LedgerError> {
        let resolution = bounded(self.timeout, self.ledger.reject(entry_id, admin, note, self.clock.now())).await?;
        log_resolution(&resolution, admin);
        Ok(resolution)
    }

    /// Completed entry of either sign, attributed to the admin
    pub async fn adjust(&self, account: AccountRef, amount: i64, admin: &str, reason: &str) -> Result<LedgerEntry, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::Validation("amount cannot be zero".into()));
        }
        if amount.unsigned_abs() > MAX_AMOUNT.unsigned_abs() {
            return Err(LedgerError::Validation(format!("amount cannot exceed {} in either direction", MAX_AMOUNT)));
        }
        if reason.trim().is_empty() {
            return Err(LedgerError::Validation("reason is required".into()));
        }

        let entry = NewLedgerEntry::completed(account, amount, EntryKind::Adjustment)
            .with_description(reason.trim())
            .with_actor(admin);
        let entry = bounded(self.timeout, self.ledger.append(entry, self.clock.now())).await?;

        warn!(
            entry_id = %entry.id,
            account_type = %account.account_type,
            account_id = %account.account_id,
            amount,
            admin,
            "Manual balance adjustment"
        );
        Ok(entry)
    }

    /// Latest entries first
    pub async fn list_entries(&self, account: AccountRef) -> Result<Vec<LedgerEntry>, LedgerError> {
        Ok(bounded(self.timeout, self.ledger.list_entries(account, self.rules.page_size)).await?)
    }

    pub async fn list_pending(&self, kind: Option<EntryKind>) -> Result<Vec<LedgerEntry>, LedgerError> {
        Ok(bounded(self.timeout, self.ledger.list_pending(kind)).await?)
    }

    pub async fn get_entry(&self, id: Uuid) -> Result<LedgerEntry, LedgerError> {
        bounded(self.timeout, self.ledger.get_entry(id))
            .await?
            .ok_or(LedgerError::NotFound)
    }

    pub async fn balance(&self, account: AccountRef) -> Result<Account, LedgerError> {
        let balance = bounded(self.timeout, self.ledger.balance(account)).await?;
        Ok(Account { account, balance })
    }

    pub async fn reconcile(&self, account: AccountRef) -> Result<Reconciliation, LedgerError> {
        let balance = bounded(self.timeout, self.ledger.balance(account)).await?;
        let completed_sum = bounded(self.timeout, self.ledger.completed_sum(account)).await?;

        let report = Reconciliation { account, balance, completed_sum, consistent: balance == completed_sum };
        if !report.consistent {
            warn!(
                account_type = %account.account_type,
                account_id = %account.account_id,
                balance,
                completed_sum,
                "Cached balance disagrees with ledger"
            );
        }
        Ok(report)
    }
}

fn require_amount(amount: i64) -> Result<(), LedgerError> {
    if amount <= 0 {
        Err(LedgerError::Validation("amount must be positive".into()))
    } else if amount > MAX_AMOUNT {
        Err(LedgerError::Validation(format!("amount cannot exceed {}", MAX_AMOUNT)))
    } else {
        Ok(())
    }
}

fn log_resolution(resolution: &EntryResolution, admin: &str) {
    match resolution {
        EntryResolution::Applied(entry) => info!(
            entry_id = %entry.id,
            status = %entry.status,
            amount = entry.amount,
            admin,
            "Ledger entry resolved"
        ),
        EntryResolution::Unchanged(entry) => info!(
            entry_id = %entry.id,
            status = %entry.status,
            admin,
            "Ledger entry already resolved"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use poehali_core::SystemClock;
    use poehali_shared::EntryStatus;
    use poehali_store::MemoryStore;

    fn service() -> LedgerService {
        LedgerService::new(
            Arc::new(MemoryStore::new()),
            Arc::new(SystemClock),
            LedgerRules::default(),
            Duration::from_secs(1),
        )
    }

    async fn assert_reconciles(ledger: &LedgerService, account: AccountRef) {
        let report = ledger.reconcile(account).await.unwrap();
        assert!(report.consistent, "{:?}", report);
    }

    #[tokio::test]
    async fn test_withdrawal_lifecycle() {
        let ledger = service();
        let driver = AccountRef::driver(Uuid::new_v4());
        ledger.append(NewLedgerEntry::completed(driver, 1000, EntryKind::Fare)).await.unwrap();

        let request = ledger.request_withdrawal(driver, 600, "card *1234").await.unwrap();
        assert_eq!(request.status, EntryStatus::Pending);
        assert_eq!(request.amount, -600);
        assert_eq!(ledger.balance(driver).await.unwrap().balance, 1000);

        // Pending withdrawals count against what is left
        let err = ledger.request_withdrawal(driver, 500, "card *1234").await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { requested: 500, available: 400 }));

        let confirmed = ledger.confirm(request.id, "ops", Some("paid")).await.unwrap();
        assert!(matches!(confirmed, EntryResolution::Applied(_)));
        assert_eq!(confirmed.entry().resolved_by.as_deref(), Some("ops"));
        assert_eq!(ledger.balance(driver).await.unwrap().balance, 400);

        let again = ledger.confirm(request.id, "ops", None).await.unwrap();
        assert!(matches!(again, EntryResolution::Unchanged(_)));
        assert_eq!(ledger.balance(driver).await.unwrap().balance, 400);

        let err = ledger.reject(request.id, "ops", None).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition { .. }));

        assert_reconciles(&ledger, driver).await;
    }

    #[tokio::test]
    async fn test_rejected_deposit_never_settles() {
        let ledger = service();
        let user = AccountRef::user(Uuid::new_v4());

        let deposit = ledger.request_deposit(user, 2500, Some("sbp".to_string())).await.unwrap();
        assert_eq!(ledger.list_pending(Some(EntryKind::Deposit)).await.unwrap().len(), 1);
        assert!(ledger.list_pending(Some(EntryKind::Withdrawal)).await.unwrap().is_empty());

        ledger.reject(deposit.id, "ops", Some("no payment")).await.unwrap();
        assert!(matches!(
            ledger.reject(deposit.id, "ops", None).await.unwrap(),
            EntryResolution::Unchanged(_)
        ));
        assert!(matches!(
            ledger.confirm(deposit.id, "ops", None).await,
            Err(LedgerError::InvalidTransition { .. })
        ));

        assert_eq!(ledger.balance(user).await.unwrap().balance, 0);
        assert!(ledger.list_pending(None).await.unwrap().is_empty());
        assert_reconciles(&ledger, user).await;
    }

    #[tokio::test]
    async fn test_amount_validation() {
        let ledger = service();
        let user = AccountRef::user(Uuid::new_v4());

        for amount in [0, -10] {
            assert!(matches!(ledger.request_withdrawal(user, amount, "card *1234").await, Err(LedgerError::Validation(_))));
            assert!(matches!(ledger.request_deposit(user, amount, None).await, Err(LedgerError::Validation(_))));
        }
        assert!(matches!(ledger.request_withdrawal(user, 1, "card *1234").await, Err(LedgerError::InsufficientBalance { .. })));
        assert!(matches!(ledger.request_withdrawal(user, 1, "  ").await, Err(LedgerError::Validation(_))));
        assert!(matches!(ledger.request_deposit(user, MAX_AMOUNT + 1, None).await, Err(LedgerError::Validation(_))));
        assert!(matches!(ledger.request_deposit(user, i64::MAX, None).await, Err(LedgerError::Validation(_))));
        assert!(matches!(ledger.adjust(user, i64::MIN, "ops", "typo").await, Err(LedgerError::Validation(_))));
        assert!(matches!(ledger.adjust(user, 0, "ops", "typo").await, Err(LedgerError::Validation(_))));
        assert!(matches!(ledger.adjust(user, 10, "ops", " ").await, Err(LedgerError::Validation(_))));
        assert!(matches!(ledger.confirm(Uuid::new_v4(), "ops", None).await, Err(LedgerError::NotFound)));
    }

    #[tokio::test]
    async fn test_adjustment_is_attributed() {
        let ledger = service();
        let driver = AccountRef::driver(Uuid::new_v4());

        let entry = ledger.adjust(driver, -300, "finance@poehali", "fuel card").await.unwrap();
        assert_eq!(entry.status, EntryStatus::Completed);
        assert_eq!(entry.actor.as_deref(), Some("finance@poehali"));
        assert_eq!(ledger.balance(driver).await.unwrap().balance, -300);
        assert_eq!(ledger.get_entry(entry.id).await.unwrap(), entry);
    }

    #[tokio::test]
    async fn test_balance_matches_completed_sum_after_mixed_sequence() {
        let ledger = service();
        let account = AccountRef::driver(Uuid::new_v4());

        ledger.append(NewLedgerEntry::completed(account, 850, EntryKind::Fare)).await.unwrap();
        ledger.append(NewLedgerEntry::completed(account, 1275, EntryKind::Fare)).await.unwrap();
        let w1 = ledger.request_withdrawal(account, 1000, "card *1234").await.unwrap();
        let w2 = ledger.request_withdrawal(account, 500, "card *1234").await.unwrap();
        let d1 = ledger.request_deposit(account, 200, None).await.unwrap();
        assert_reconciles(&ledger, account).await;

        ledger.confirm(w1.id, "ops", None).await.unwrap();
        ledger.reject(w2.id, "ops", None).await.unwrap();
        ledger.confirm(d1.id, "ops", None).await.unwrap();
        ledger.adjust(account, -25, "ops", "rounding").await.unwrap();

        assert_eq!(ledger.balance(account).await.unwrap().balance, 850 + 1275 - 1000 + 200 - 25);
        assert_reconciles(&ledger, account).await;

        let entries = ledger.list_entries(account).await.unwrap();
        assert_eq!(entries.len(), 6);
        assert_eq!(entries[0].kind, EntryKind::Adjustment);
    }

    #[tokio::test]
    async fn test_largest_deposits_settle_exactly() {
        let ledger = service();
        let user = AccountRef::user(Uuid::new_v4());

        let first = ledger.request_deposit(user, MAX_AMOUNT, None).await.unwrap();
        let second = ledger.request_deposit(user, MAX_AMOUNT, None).await.unwrap();
        ledger.confirm(first.id, "ops", None).await.unwrap();
        ledger.confirm(second.id, "ops", None).await.unwrap();

        assert_eq!(ledger.balance(user).await.unwrap().balance, 2 * MAX_AMOUNT);
        assert_reconciles(&ledger, user).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_withdrawals_never_overdraw() {
        let ledger = Arc::new(service());
        let driver = AccountRef::driver(Uuid::new_v4());
        ledger.append(NewLedgerEntry::completed(driver, 1000, EntryKind::Fare)).await.unwrap();

        let handles: Vec<_> = (0..12)
            .map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.request_withdrawal(driver, 300, "card *1234").await })
            })
            .collect();

        let mut accepted = Vec::new();
        for handle in handles {
            match handle.await.unwrap() {
                Ok(entry) => accepted.push(entry),
                Err(LedgerError::InsufficientBalance { .. }) => {}
                Err(e) => panic!("unexpected error: {:?}", e),
            }
        }
        assert_eq!(accepted.len(), 3);

        for entry in &accepted {
            ledger.confirm(entry.id, "ops", None).await.unwrap();
        }
        assert_eq!(ledger.balance(driver).await.unwrap().balance, 100);
        assert_reconciles(&ledger, driver).await;
    }

    #[tokio::test]
    async fn test_entry_page_is_capped() {
        let ledger = LedgerService::new(
            Arc::new(MemoryStore::new()),
            Arc::new(SystemClock),
            LedgerRules { page_size: 3 },
            Duration::from_secs(1),
        );
        let account = AccountRef::user(Uuid::new_v4());
        for i in 1..=5 {
            ledger.append(NewLedgerEntry::completed(account, i, EntryKind::Deposit)).await.unwrap();
        }

        let page = ledger.list_entries(account).await.unwrap();
        assert_eq!(page.iter().map(|e| e.amount).collect::<Vec<_>>(), vec![5, 4, 3]);
    }
}
