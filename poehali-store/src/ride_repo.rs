use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use poehali_core::repository::{RideRepository, SeatAudit, SeatRelease};
use poehali_core::{RideError, StoreError};
use poehali_shared::{Masked, RideFilter, RideOffer, RideOverride, RideOwner, RideStatus, UnavailableReason};

use crate::database::{db_err, like_pattern, parse_col};

pub(crate) const OFFER_COLUMNS: &str = "id, route_from, route_to, departure_at, expires_at, seats_total, \
     seats_available, price_per_seat, car_class, notes, status, owner_user_id, owner_name, owner_phone, \
     created_at, updated_at";

#[derive(sqlx::FromRow)]
pub(crate) struct OfferRow {
    id: Uuid,
    route_from: String,
    route_to: String,
    departure_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    seats_total: i32,
    seats_available: i32,
    price_per_seat: i64,
    car_class: Option<String>,
    notes: Option<String>,
    status: String,
    owner_user_id: Option<Uuid>,
    owner_name: Option<String>,
    owner_phone: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OfferRow> for RideOffer {
    type Error = StoreError;

    fn try_from(row: OfferRow) -> Result<Self, Self::Error> {
        let owner = match row.owner_user_id {
            Some(user_id) => RideOwner::User { user_id, name: row.owner_name },
            None => RideOwner::Anonymous {
                name: row.owner_name.unwrap_or_default(),
                phone: Masked(row.owner_phone.unwrap_or_default()),
            },
        };

        Ok(RideOffer {
            id: row.id,
            route_from: row.route_from,
            route_to: row.route_to,
            departure_at: row.departure_at,
            expires_at: row.expires_at,
            seats_total: row.seats_total,
            seats_available: row.seats_available,
            price_per_seat: row.price_per_seat,
            car_class: row.car_class,
            notes: row.notes,
            status: parse_col(&row.status)?,
            owner,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub(crate) async fn fetch_offer(
    conn: &mut PgConnection,
    id: Uuid,
    for_update: bool,
) -> Result<Option<RideOffer>, StoreError> {
    let sql = format!(
        "SELECT {} FROM ride_offers WHERE id = $1{}",
        OFFER_COLUMNS,
        if for_update { " FOR UPDATE" } else { "" }
    );
    let row: Option<OfferRow> = sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?;

    row.map(RideOffer::try_from).transpose()
}

/// Conditional decrement. The WHERE clause is the whole availability check,
/// so two concurrent reservations serialize on the row and the second one
/// re-evaluates against the first one's result.
pub(crate) async fn reserve_in_tx(
    conn: &mut PgConnection,
    id: Uuid,
    seats: i32,
    now: DateTime<Utc>,
) -> Result<RideOffer, RideError> {
    let sql = format!(
        r#"
        UPDATE ride_offers
        SET seats_available = seats_available - $2, updated_at = $3
        WHERE id = $1
          AND status = 'active'
          AND COALESCE(expires_at, departure_at) > $3
          AND seats_available >= $2
        RETURNING {}
        "#,
        OFFER_COLUMNS
    );
    let row: Option<OfferRow> = sqlx::query_as(&sql)
        .bind(id)
        .bind(seats)
        .bind(now)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?;

    if let Some(row) = row {
        return Ok(RideOffer::try_from(row)?);
    }

    // Nothing matched; work out which condition failed
    let offer = fetch_offer(conn, id, false).await?.ok_or(RideError::NotFound)?;
    Err(match offer.unavailable_reason(now) {
        Some(UnavailableReason::Inactive) => RideError::Inactive,
        Some(UnavailableReason::Expired) => RideError::Expired,
        _ => RideError::SoldOut { requested: seats, available: offer.seats_available },
    })
}

/// Increment clamped to `seats_total`. `None` when the offer does not exist.
pub(crate) async fn release_in_tx(
    conn: &mut PgConnection,
    id: Uuid,
    seats: i32,
    now: DateTime<Utc>,
) -> Result<Option<SeatRelease>, StoreError> {
    let Some(before) = fetch_offer(conn, id, true).await? else {
        return Ok(None);
    };

    let sql = format!(
        r#"
        UPDATE ride_offers
        SET seats_available = LEAST(seats_total, seats_available + $2), updated_at = $3
        WHERE id = $1
        RETURNING {}
        "#,
        OFFER_COLUMNS
    );
    let row: OfferRow = sqlx::query_as(&sql)
        .bind(id)
        .bind(seats)
        .bind(now)
        .fetch_one(&mut *conn)
        .await
        .map_err(db_err)?;

    Ok(Some(SeatRelease {
        offer: RideOffer::try_from(row)?,
        clamped: before.seats_available + seats > before.seats_total,
    }))
}

async fn confirmed_seats(conn: &mut PgConnection, offer_id: Uuid) -> Result<i32, StoreError> {
    sqlx::query_scalar(
        "SELECT COALESCE(SUM(seats_count), 0)::INT FROM bookings WHERE rideshare_id = $1 AND status = 'confirmed'",
    )
    .bind(offer_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(db_err)
}

pub struct PostgresRideRepository {
    pool: PgPool,
}

impl PostgresRideRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RideRepository for PostgresRideRepository {
    async fn insert_offer(&self, offer: &RideOffer) -> Result<(), StoreError> {
        let (owner_user_id, owner_name, owner_phone) = match &offer.owner {
            RideOwner::User { user_id, name } => (Some(*user_id), name.clone(), None),
            RideOwner::Anonymous { name, phone } => (None, Some(name.clone()), Some(phone.expose().clone())),
        };

        sqlx::query(
            r#"
            INSERT INTO ride_offers (id, route_from, route_to, departure_at, expires_at, seats_total,
                seats_available, price_per_seat, car_class, notes, status, owner_user_id, owner_name,
                owner_phone, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(offer.id)
        .bind(&offer.route_from)
        .bind(&offer.route_to)
        .bind(offer.departure_at)
        .bind(offer.expires_at)
        .bind(offer.seats_total)
        .bind(offer.seats_available)
        .bind(offer.price_per_seat)
        .bind(&offer.car_class)
        .bind(&offer.notes)
        .bind(offer.status.as_str())
        .bind(owner_user_id)
        .bind(owner_name)
        .bind(owner_phone)
        .bind(offer.created_at)
        .bind(offer.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn get_offer(&self, id: Uuid) -> Result<Option<RideOffer>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        fetch_offer(&mut conn, id, false).await
    }

    async fn list_offers(&self, filter: &RideFilter) -> Result<Vec<RideOffer>, StoreError> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!("SELECT {} FROM ride_offers WHERE TRUE", OFFER_COLUMNS));

        if let Some(from) = &filter.route_from {
            qb.push(" AND route_from ILIKE ").push_bind(like_pattern(from));
        }
        if let Some(to) = &filter.route_to {
            qb.push(" AND route_to ILIKE ").push_bind(like_pattern(to));
        }
        if let Some(date) = filter.departure_date {
            qb.push(" AND (departure_at AT TIME ZONE 'UTC')::date = ").push_bind(date);
        }
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        qb.push(" ORDER BY departure_at, created_at");

        let rows: Vec<OfferRow> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.into_iter().map(RideOffer::try_from).collect()
    }

    async fn set_status(&self, id: Uuid, status: RideStatus, now: DateTime<Utc>) -> Result<RideOffer, RideError> {
        let sql = format!(
            "UPDATE ride_offers SET status = $2, updated_at = $3 WHERE id = $1 RETURNING {}",
            OFFER_COLUMNS
        );
        let row: Option<OfferRow> = sqlx::query_as(&sql)
            .bind(id)
            .bind(status.as_str())
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        let row = row.ok_or(RideError::NotFound)?;
        Ok(RideOffer::try_from(row)?)
    }

    async fn apply_override(
        &self,
        id: Uuid,
        patch: &RideOverride,
        now: DateTime<Utc>,
    ) -> Result<(RideOffer, SeatAudit), RideError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let mut offer = fetch_offer(&mut tx, id, true).await?.ok_or(RideError::NotFound)?;
        patch.apply(&mut offer, now);

        sqlx::query(
            r#"
            UPDATE ride_offers
            SET status = $2, seats_available = $3, price_per_seat = $4, notes = $5, expires_at = $6, updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(offer.id)
        .bind(offer.status.as_str())
        .bind(offer.seats_available)
        .bind(offer.price_per_seat)
        .bind(&offer.notes)
        .bind(offer.expires_at)
        .bind(offer.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let audit = SeatAudit {
            offer_id: offer.id,
            seats_total: offer.seats_total,
            seats_available: offer.seats_available,
            confirmed_seats: confirmed_seats(&mut tx, offer.id).await?,
        };

        tx.commit().await.map_err(db_err)?;
        Ok((offer, audit))
    }

    async fn seat_audit(&self) -> Result<Vec<SeatAudit>, StoreError> {
        let rows: Vec<(Uuid, i32, i32, i32)> = sqlx::query_as(
            r#"
            SELECT o.id, o.seats_total, o.seats_available,
                   COALESCE(SUM(b.seats_count) FILTER (WHERE b.status = 'confirmed'), 0)::INT
            FROM ride_offers o
            LEFT JOIN bookings b ON b.rideshare_id = o.id
            GROUP BY o.id
            ORDER BY o.id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .map(|(offer_id, seats_total, seats_available, confirmed_seats)| SeatAudit {
                offer_id,
                seats_total,
                seats_available,
                confirmed_seats,
            })
            .collect())
    }
}
