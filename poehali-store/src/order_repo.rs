use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use poehali_core::repository::{ClaimReceipt, OrderRepository};
use poehali_core::{OrderError, StoreError};
use poehali_shared::{
    AccountRef, CommissionSplit, DriverStatus, EntryKind, Masked, NewLedgerEntry, OrderStatus, TransferOrder,
};

use crate::database::{db_err, parse_col};
use crate::ledger_repo::append_in_tx;

const ORDER_COLUMNS: &str = "id, route_from, route_to, pickup_at, passenger_name, passenger_phone, \
     passengers_count, car_class, notes, price, status, assigned_driver_id, driver_amount, commission_amount, \
     created_at, updated_at";

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    route_from: String,
    route_to: String,
    pickup_at: DateTime<Utc>,
    passenger_name: String,
    passenger_phone: String,
    passengers_count: i32,
    car_class: Option<String>,
    notes: Option<String>,
    price: i64,
    status: String,
    assigned_driver_id: Option<Uuid>,
    driver_amount: Option<i64>,
    commission_amount: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for TransferOrder {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(TransferOrder {
            id: row.id,
            route_from: row.route_from,
            route_to: row.route_to,
            pickup_at: row.pickup_at,
            passenger_name: row.passenger_name,
            passenger_phone: Masked(row.passenger_phone),
            passengers_count: row.passengers_count,
            car_class: row.car_class,
            notes: row.notes,
            price: row.price,
            status: parse_col(&row.status)?,
            assigned_driver_id: row.assigned_driver_id,
            driver_amount: row.driver_amount,
            commission_amount: row.commission_amount,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

async fn fetch_order(conn: &mut PgConnection, id: Uuid, for_update: bool) -> Result<Option<TransferOrder>, StoreError> {
    let sql = format!(
        "SELECT {} FROM transfer_orders WHERE id = $1{}",
        ORDER_COLUMNS,
        if for_update { " FOR UPDATE" } else { "" }
    );
    let row: Option<OrderRow> = sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?;
    row.map(TransferOrder::try_from).transpose()
}

pub struct PostgresOrderRepository {
    pool: PgPool,
}

impl PostgresOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn list_sql(&self, sql: &str, bind: Option<Uuid>) -> Result<Vec<TransferOrder>, StoreError> {
        let mut query = sqlx::query_as::<_, OrderRow>(sql);
        if let Some(id) = bind {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(db_err)?;
        rows.into_iter().map(TransferOrder::try_from).collect()
    }
}

#[async_trait]
impl OrderRepository for PostgresOrderRepository {
    async fn insert_order(&self, order: &TransferOrder) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO transfer_orders (id, route_from, route_to, pickup_at, passenger_name, passenger_phone,
                passengers_count, car_class, notes, price, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(order.id)
        .bind(&order.route_from)
        .bind(&order.route_to)
        .bind(order.pickup_at)
        .bind(&order.passenger_name)
        .bind(order.passenger_phone.expose())
        .bind(order.passengers_count)
        .bind(&order.car_class)
        .bind(&order.notes)
        .bind(order.price)
        .bind(order.status.as_str())
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<TransferOrder>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        fetch_order(&mut conn, id, false).await
    }

    async fn list_available(&self, limit: i64) -> Result<Vec<TransferOrder>, StoreError> {
        let sql = format!(
            "SELECT {} FROM transfer_orders WHERE assigned_driver_id IS NULL AND status = 'new' \
             ORDER BY created_at LIMIT $1",
            ORDER_COLUMNS
        );
        let rows: Vec<OrderRow> = sqlx::query_as(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(TransferOrder::try_from).collect()
    }

    async fn list_orders(&self) -> Result<Vec<TransferOrder>, StoreError> {
        let sql = format!("SELECT {} FROM transfer_orders ORDER BY created_at DESC", ORDER_COLUMNS);
        self.list_sql(&sql, None).await
    }

    async fn list_driver_orders(&self, driver_id: Uuid) -> Result<Vec<TransferOrder>, StoreError> {
        let sql = format!(
            "SELECT {} FROM transfer_orders WHERE assigned_driver_id = $1 ORDER BY updated_at DESC",
            ORDER_COLUMNS
        );
        self.list_sql(&sql, Some(driver_id)).await
    }

    async fn claim_order(&self, order_id: Uuid, driver_id: Uuid, now: DateTime<Utc>) -> Result<ClaimReceipt, OrderError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // 1. Driver must be approved and active. FOR SHARE holds off a rate
        //    change until this transaction is done.
        let driver: Option<(String, bool, i32)> = sqlx::query_as(
            "SELECT status, is_active, commission_rate_bp FROM drivers WHERE id = $1 FOR SHARE",
        )
        .bind(driver_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        let (status, is_active, rate) = driver.ok_or(OrderError::DriverNotFound)?;
        let status: DriverStatus = parse_col(&status)?;
        if status != DriverStatus::Approved || !is_active {
            return Err(OrderError::DriverInactive);
        }

        // 2. Compare-and-set. The split is computed in the same statement, with
        //    the same rounding as CommissionSplit::compute.
        let sql = format!(
            r#"
            UPDATE transfer_orders
            SET assigned_driver_id = $2,
                status = 'claimed',
                commission_amount = (price * $3 + 5000) / 10000,
                driver_amount = price - (price * $3 + 5000) / 10000,
                updated_at = $4
            WHERE id = $1 AND assigned_driver_id IS NULL AND status = 'new'
            RETURNING {}
            "#,
            ORDER_COLUMNS
        );
        let row: Option<OrderRow> = sqlx::query_as(&sql)
            .bind(order_id)
            .bind(driver_id)
            .bind(i64::from(rate))
            .bind(now)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;

        let Some(row) = row else {
            let order = fetch_order(&mut tx, order_id, false).await?.ok_or(OrderError::NotFound)?;
            return Err(if order.assigned_driver_id.is_some() {
                OrderError::AlreadyClaimed
            } else {
                OrderError::InvalidTransition {
                    from: order.status.to_string(),
                    to: OrderStatus::Claimed.to_string(),
                }
            });
        };
        let order = TransferOrder::try_from(row)?;

        let split = match (order.driver_amount, order.commission_amount) {
            (Some(driver_amount), Some(commission_amount)) => CommissionSplit { driver_amount, commission_amount },
            _ => return Err(StoreError::Corrupt(format!("claimed order {} has no split", order.id)).into()),
        };

        // 3. Driver counter and the two ledger rows, same transaction
        sqlx::query("UPDATE drivers SET total_orders = total_orders + 1 WHERE id = $1")
            .bind(driver_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let reference = order.id.to_string();
        let fare = append_in_tx(
            &mut tx,
            NewLedgerEntry::completed(AccountRef::driver(driver_id), split.driver_amount, EntryKind::Fare)
                .with_reference(reference.clone())
                .with_description(format!("{} - {}", order.route_from, order.route_to)),
            now,
        )
        .await?;
        let commission = append_in_tx(
            &mut tx,
            NewLedgerEntry::completed(AccountRef::platform(), split.commission_amount, EntryKind::Commission)
                .with_reference(reference),
            now,
        )
        .await?;

        tx.commit().await.map_err(db_err)?;
        Ok(ClaimReceipt { order, split, entries: vec![fare, commission] })
    }

    async fn transition_order(&self, order_id: Uuid, next: OrderStatus, now: DateTime<Utc>) -> Result<TransferOrder, OrderError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let order = fetch_order(&mut tx, order_id, true).await?.ok_or(OrderError::NotFound)?;
        if !order.status.can_transition_to(next) {
            return Err(OrderError::InvalidTransition {
                from: order.status.to_string(),
                to: next.to_string(),
            });
        }

        let sql = format!(
            "UPDATE transfer_orders SET status = $2, updated_at = $3 WHERE id = $1 RETURNING {}",
            ORDER_COLUMNS
        );
        let row: OrderRow = sqlx::query_as(&sql)
            .bind(order_id)
            .bind(next.as_str())
            .bind(now)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(TransferOrder::try_from(row)?)
    }
}
