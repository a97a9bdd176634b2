use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use poehali_core::repository::DriverRepository;
use poehali_core::{DriverError, StoreError};
use poehali_shared::{Driver, DriverStatus, Masked};

use crate::database::{db_err, parse_col};

const DRIVER_COLUMNS: &str =
    "id, name, phone, status, is_active, is_online, commission_rate_bp, total_orders, created_at";

#[derive(sqlx::FromRow)]
struct DriverRow {
    id: Uuid,
    name: String,
    phone: String,
    status: String,
    is_active: bool,
    is_online: bool,
    commission_rate_bp: i32,
    total_orders: i32,
    created_at: DateTime<Utc>,
}

impl TryFrom<DriverRow> for Driver {
    type Error = StoreError;

    fn try_from(row: DriverRow) -> Result<Self, Self::Error> {
        Ok(Driver {
            id: row.id,
            name: row.name,
            phone: Masked(row.phone),
            status: parse_col(&row.status)?,
            is_active: row.is_active,
            is_online: row.is_online,
            commission_rate_bp: row.commission_rate_bp,
            total_orders: row.total_orders,
            created_at: row.created_at,
        })
    }
}

pub struct PostgresDriverRepository {
    pool: PgPool,
}

impl PostgresDriverRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DriverRepository for PostgresDriverRepository {
    async fn insert_driver(&self, driver: &Driver) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO drivers (id, name, phone, status, is_active, is_online, commission_rate_bp, total_orders, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(driver.id)
        .bind(&driver.name)
        .bind(driver.phone.expose())
        .bind(driver.status.as_str())
        .bind(driver.is_active)
        .bind(driver.is_online)
        .bind(driver.commission_rate_bp)
        .bind(driver.total_orders)
        .bind(driver.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_driver(&self, id: Uuid) -> Result<Option<Driver>, StoreError> {
        let sql = format!("SELECT {} FROM drivers WHERE id = $1", DRIVER_COLUMNS);
        let row: Option<DriverRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(Driver::try_from).transpose()
    }

    async fn list_drivers(&self) -> Result<Vec<Driver>, StoreError> {
        let sql = format!("SELECT {} FROM drivers ORDER BY created_at DESC", DRIVER_COLUMNS);
        let rows: Vec<DriverRow> = sqlx::query_as(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(Driver::try_from).collect()
    }

    async fn moderate_driver(&self, id: Uuid, status: DriverStatus, commission_rate_bp: i32) -> Result<Driver, DriverError> {
        // Only an approved driver is active; anyone else is forced offline too
        let sql = format!(
            "UPDATE drivers SET status = $2, is_active = $3, is_online = is_online AND $3, commission_rate_bp = $4 \
             WHERE id = $1 RETURNING {}",
            DRIVER_COLUMNS
        );
        let row: Option<DriverRow> = sqlx::query_as(&sql)
            .bind(id)
            .bind(status.as_str())
            .bind(status == DriverStatus::Approved)
            .bind(commission_rate_bp)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(Driver::try_from(row.ok_or(DriverError::NotFound)?)?)
    }

    async fn set_commission(&self, id: Uuid, commission_rate_bp: i32) -> Result<Driver, DriverError> {
        let sql = format!("UPDATE drivers SET commission_rate_bp = $2 WHERE id = $1 RETURNING {}", DRIVER_COLUMNS);
        let row: Option<DriverRow> = sqlx::query_as(&sql)
            .bind(id)
            .bind(commission_rate_bp)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(Driver::try_from(row.ok_or(DriverError::NotFound)?)?)
    }

    async fn set_online(&self, id: Uuid, is_online: bool) -> Result<Driver, DriverError> {
        let sql = format!("UPDATE drivers SET is_online = $2 WHERE id = $1 RETURNING {}", DRIVER_COLUMNS);
        let row: Option<DriverRow> = sqlx::query_as(&sql)
            .bind(id)
            .bind(is_online)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(Driver::try_from(row.ok_or(DriverError::NotFound)?)?)
    }
}
