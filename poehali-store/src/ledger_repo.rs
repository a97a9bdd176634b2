use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use poehali_core::repository::{EntryResolution, LedgerRepository};
use poehali_core::{LedgerError, StoreError};
use poehali_shared::{AccountRef, EntryKind, EntryStatus, LedgerEntry, NewLedgerEntry};

use crate::database::{db_err, parse_col};

const ENTRY_COLUMNS: &str = "id, account_type, account_id, amount, kind, status, description, reference, actor, \
     admin_note, resolved_by, created_at, resolved_at";

#[derive(sqlx::FromRow)]
struct EntryRow {
    id: Uuid,
    account_type: String,
    account_id: Uuid,
    amount: i64,
    kind: String,
    status: String,
    description: Option<String>,
    reference: Option<String>,
    actor: Option<String>,
    admin_note: Option<String>,
    resolved_by: Option<String>,
    created_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
}

impl TryFrom<EntryRow> for LedgerEntry {
    type Error = StoreError;

    fn try_from(row: EntryRow) -> Result<Self, Self::Error> {
        Ok(LedgerEntry {
            id: row.id,
            account: AccountRef {
                account_type: parse_col(&row.account_type)?,
                account_id: row.account_id,
            },
            amount: row.amount,
            kind: parse_col(&row.kind)?,
            status: parse_col(&row.status)?,
            description: row.description,
            reference: row.reference,
            actor: row.actor,
            admin_note: row.admin_note,
            resolved_by: row.resolved_by,
            created_at: row.created_at,
            resolved_at: row.resolved_at,
        })
    }
}

async fn ensure_account(conn: &mut PgConnection, account: AccountRef) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO accounts (account_type, account_id, balance) VALUES ($1, $2, 0) \
         ON CONFLICT (account_type, account_id) DO NOTHING",
    )
    .bind(account.account_type.as_str())
    .bind(account.account_id)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(())
}

async fn cached_balance(conn: &mut PgConnection, account: AccountRef, lock: bool) -> Result<i64, StoreError> {
    let sql = format!(
        "SELECT balance FROM accounts WHERE account_type = $1 AND account_id = $2{}",
        if lock { " FOR UPDATE" } else { "" }
    );
    let balance: Option<i64> = sqlx::query_scalar(&sql)
        .bind(account.account_type.as_str())
        .bind(account.account_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?;
    Ok(balance.unwrap_or(0))
}

/// Move the cached balance by `delta`. With `floor_at_zero` the update only
/// happens when the result stays non-negative; `None` means it was refused.
async fn shift_balance(
    conn: &mut PgConnection,
    account: AccountRef,
    delta: i64,
    floor_at_zero: bool,
) -> Result<Option<i64>, StoreError> {
    ensure_account(conn, account).await?;

    let sql = format!(
        "UPDATE accounts SET balance = balance + $3 WHERE account_type = $1 AND account_id = $2{} RETURNING balance",
        if floor_at_zero { " AND balance + $3 >= 0" } else { "" }
    );
    sqlx::query_scalar(&sql)
        .bind(account.account_type.as_str())
        .bind(account.account_id)
        .bind(delta)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)
}

/// Insert one entry and, when it is already completed, move the cached
/// balance with it. Callers own the transaction.
pub(crate) async fn append_in_tx(
    conn: &mut PgConnection,
    new: NewLedgerEntry,
    now: DateTime<Utc>,
) -> Result<LedgerEntry, StoreError> {
    let entry = LedgerEntry::from_new(new, now);

    sqlx::query(
        r#"
        INSERT INTO ledger_entries (id, account_type, account_id, amount, kind, status, description,
            reference, actor, created_at, resolved_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(entry.id)
    .bind(entry.account.account_type.as_str())
    .bind(entry.account.account_id)
    .bind(entry.amount)
    .bind(entry.kind.as_str())
    .bind(entry.status.as_str())
    .bind(&entry.description)
    .bind(&entry.reference)
    .bind(&entry.actor)
    .bind(entry.created_at)
    .bind(entry.resolved_at)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;

    if entry.status == EntryStatus::Completed {
        shift_balance(conn, entry.account, entry.amount, false).await?;
    }

    Ok(entry)
}

pub struct PostgresLedgerRepository {
    pool: PgPool,
}

impl PostgresLedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn resolve(
        &self,
        entry_id: Uuid,
        target: EntryStatus,
        actor: &str,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<EntryResolution, LedgerError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let sql = format!("SELECT {} FROM ledger_entries WHERE id = $1 FOR UPDATE", ENTRY_COLUMNS);
        let row: Option<EntryRow> = sqlx::query_as(&sql)
            .bind(entry_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;
        let current = LedgerEntry::try_from(row.ok_or(LedgerError::NotFound)?)?;

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
            let applied = shift_balance(&mut tx, current.account, current.amount, current.amount < 0).await?;
            if applied.is_none() {
                let available = cached_balance(&mut tx, current.account, false).await?;
                return Err(LedgerError::InsufficientBalance { requested: -current.amount, available });
            }
        }

        let sql = format!(
            "UPDATE ledger_entries SET status = $2, resolved_by = $3, admin_note = $4, resolved_at = $5 \
             WHERE id = $1 RETURNING {}",
            ENTRY_COLUMNS
        );
        let row: EntryRow = sqlx::query_as(&sql)
            .bind(entry_id)
            .bind(target.as_str())
            .bind(actor)
            .bind(note)
            .bind(now)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(EntryResolution::Applied(LedgerEntry::try_from(row)?))
    }
}

#[async_trait]
impl LedgerRepository for PostgresLedgerRepository {
    async fn append(&self, entry: NewLedgerEntry, now: DateTime<Utc>) -> Result<LedgerEntry, LedgerError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let entry = append_in_tx(&mut tx, entry, now).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(entry)
    }

    async fn request_withdrawal(&self, entry: NewLedgerEntry, now: DateTime<Utc>) -> Result<LedgerEntry, LedgerError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // 1. Lock the account row; concurrent requests for it queue here
        ensure_account(&mut tx, entry.account).await?;
        let balance = cached_balance(&mut tx, entry.account, true).await?;

        // 2. Money already promised to other pending withdrawals is not available
        let pending: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0)::BIGINT FROM ledger_entries \
             WHERE account_type = $1 AND account_id = $2 AND kind = 'withdrawal' AND status = 'pending'",
        )
        .bind(entry.account.account_type.as_str())
        .bind(entry.account.account_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        let available = balance + pending;
        if -entry.amount > available {
            return Err(LedgerError::InsufficientBalance { requested: -entry.amount, available });
        }

        let entry = append_in_tx(&mut tx, entry, now).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(entry)
    }

    async fn confirm(&self, entry_id: Uuid, actor: &str, note: Option<&str>, now: DateTime<Utc>) -> Result<EntryResolution, LedgerError> {
        self.resolve(entry_id, EntryStatus::Completed, actor, note, now).await
    }

    async fn reject(&self, entry_id: Uuid, actor: &str, note: Option<&str>, now: DateTime<Utc>) -> Result<EntryResolution, LedgerError> {
        self.resolve(entry_id, EntryStatus::Rejected, actor, note, now).await
    }

    async fn get_entry(&self, id: Uuid) -> Result<Option<LedgerEntry>, StoreError> {
        let sql = format!("SELECT {} FROM ledger_entries WHERE id = $1", ENTRY_COLUMNS);
        let row: Option<EntryRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(LedgerEntry::try_from).transpose()
    }

    async fn list_entries(&self, account: AccountRef, limit: i64) -> Result<Vec<LedgerEntry>, StoreError> {
        let sql = format!(
            "SELECT {} FROM ledger_entries WHERE account_type = $1 AND account_id = $2 \
             ORDER BY created_at DESC, id LIMIT $3",
            ENTRY_COLUMNS
        );
        let rows: Vec<EntryRow> = sqlx::query_as(&sql)
            .bind(account.account_type.as_str())
            .bind(account.account_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(LedgerEntry::try_from).collect()
    }

    async fn list_pending(&self, kind: Option<EntryKind>) -> Result<Vec<LedgerEntry>, StoreError> {
        let sql = format!(
            "SELECT {} FROM ledger_entries WHERE status = 'pending' AND ($1::TEXT IS NULL OR kind = $1) \
             ORDER BY created_at",
            ENTRY_COLUMNS
        );
        let rows: Vec<EntryRow> = sqlx::query_as(&sql)
            .bind(kind.map(|k| k.as_str()))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(LedgerEntry::try_from).collect()
    }

    async fn balance(&self, account: AccountRef) -> Result<i64, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        cached_balance(&mut conn, account, false).await
    }

    async fn completed_sum(&self, account: AccountRef) -> Result<i64, StoreError> {
        sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0)::BIGINT FROM ledger_entries \
             WHERE account_type = $1 AND account_id = $2 AND status = 'completed'",
        )
        .bind(account.account_type.as_str())
        .bind(account.account_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)
    }
}
