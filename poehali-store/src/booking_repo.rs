use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use poehali_core::repository::{BookingRepository, CancelOutcome, TokenDigest};
use poehali_core::{RideError, StoreError};
use poehali_shared::{Booking, Masked, Passenger, RideOffer};

use crate::database::{db_err, parse_col};
use crate::ride_repo::{release_in_tx, reserve_in_tx};

const BOOKING_COLUMNS: &str = "id, rideshare_id, seats_count, passenger_name, passenger_phone, passenger_email, \
     user_id, status, created_at, cancelled_at";

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    rideshare_id: Uuid,
    seats_count: i32,
    passenger_name: String,
    passenger_phone: String,
    passenger_email: Option<String>,
    user_id: Option<Uuid>,
    status: String,
    created_at: DateTime<Utc>,
    cancelled_at: Option<DateTime<Utc>>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = StoreError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        Ok(Booking {
            id: row.id,
            rideshare_id: row.rideshare_id,
            seats_count: row.seats_count,
            passenger: Passenger {
                name: row.passenger_name,
                phone: Masked(row.passenger_phone),
                email: row.passenger_email,
                user_id: row.user_id,
            },
            status: parse_col(&row.status)?,
            created_at: row.created_at,
            cancelled_at: row.cancelled_at,
        })
    }
}

/// Flip one confirmed booking to cancelled and hand its seats back. The
/// status check is part of the UPDATE, so of two racing cancels only one
/// sees a row come back and only that one releases seats.
async fn cancel_in_tx(conn: &mut PgConnection, booking_id: Uuid, now: DateTime<Utc>) -> Result<CancelOutcome, StoreError> {
    let sql = format!(
        "UPDATE bookings SET status = 'cancelled', cancelled_at = $2 \
         WHERE id = $1 AND status = 'confirmed' RETURNING {}",
        BOOKING_COLUMNS
    );
    let row: Option<BookingRow> = sqlx::query_as(&sql)
        .bind(booking_id)
        .bind(now)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?;

    let Some(row) = row else {
        let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM bookings WHERE id = $1")
            .bind(booking_id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(db_err)?;
        return Ok(match exists {
            Some(_) => CancelOutcome::AlreadyCancelled,
            None => CancelOutcome::NotFound,
        });
    };

    let booking = Booking::try_from(row)?;
    let release = release_in_tx(conn, booking.rideshare_id, booking.seats_count, now)
        .await?
        .ok_or_else(|| StoreError::Corrupt(format!("booking {} points at missing offer", booking.id)))?;

    Ok(CancelOutcome::Cancelled { booking, release })
}

pub struct PostgresBookingRepository {
    pool: PgPool,
}

impl PostgresBookingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn list_where(&self, column: &str, value: Uuid, order: &str) -> Result<Vec<Booking>, StoreError> {
        let sql = format!("SELECT {} FROM bookings WHERE {} = $1 ORDER BY {}", BOOKING_COLUMNS, column, order);
        let rows: Vec<BookingRow> = sqlx::query_as(&sql)
            .bind(value)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.into_iter().map(Booking::try_from).collect()
    }
}

#[async_trait]
impl BookingRepository for PostgresBookingRepository {
    async fn create_booking(
        &self,
        booking: &Booking,
        digest: &TokenDigest,
        now: DateTime<Utc>,
    ) -> Result<RideOffer, RideError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // 1. Take the seats; fails without side effects
        let offer = reserve_in_tx(&mut tx, booking.rideshare_id, booking.seats_count, now).await?;

        // 2. Record who holds them
        sqlx::query(
            r#"
            INSERT INTO bookings (id, rideshare_id, seats_count, passenger_name, passenger_phone,
                passenger_email, user_id, status, cancel_token_hash, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(booking.id)
        .bind(booking.rideshare_id)
        .bind(booking.seats_count)
        .bind(&booking.passenger.name)
        .bind(booking.passenger.phone.expose())
        .bind(&booking.passenger.email)
        .bind(booking.passenger.user_id)
        .bind(booking.status.as_str())
        .bind(&digest.0[..])
        .bind(booking.created_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(offer)
    }

    async fn cancel_by_token(&self, digest: &TokenDigest, now: DateTime<Utc>) -> Result<CancelOutcome, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let found: Option<(Uuid, Vec<u8>)> =
            sqlx::query_as("SELECT id, cancel_token_hash FROM bookings WHERE cancel_token_hash = $1")
                .bind(&digest.0[..])
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err)?;

        let outcome = match found {
            Some((booking_id, stored)) if digest.ct_eq(&stored) => cancel_in_tx(&mut tx, booking_id, now).await?,
            _ => CancelOutcome::NotFound,
        };

        tx.commit().await.map_err(db_err)?;
        Ok(outcome)
    }

    async fn cancel_by_id(&self, booking_id: Uuid, now: DateTime<Utc>) -> Result<CancelOutcome, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let outcome = cancel_in_tx(&mut tx, booking_id, now).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(outcome)
    }

    async fn list_bookings(&self, offer_id: Uuid) -> Result<Vec<Booking>, StoreError> {
        self.list_where("rideshare_id", offer_id, "created_at").await
    }

    async fn list_user_bookings(&self, user_id: Uuid) -> Result<Vec<Booking>, StoreError> {
        self.list_where("user_id", user_id, "created_at DESC").await
    }
}
