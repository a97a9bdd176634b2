use axum::{
    extract::{Json, State},
    http::StatusCode,
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{get, patch},
    Extension, Router,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use uuid::Uuid;

use poehali_core::repository::CancelOutcome;
use poehali_ride::{Actor, BookingRequest};
use poehali_shared::{Masked, NewRideOffer, Passenger, RideFilter, RideOffer, RideOwner, RideStatus};

use crate::error::AppError;
use crate::extract::{AppJson, AppPath, AppQuery};
use crate::middleware::auth::{optional_session_middleware, session_auth_middleware, SessionClaims, Viewer};
use crate::state::AppState;
use crate::task::detached;

pub fn routes(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/v1/rideshares", get(list_rideshares).post(post_rideshare))
        .route_layer(from_fn_with_state(state.clone(), optional_session_middleware));

    let owner = Router::new()
        .route("/v1/rideshares/{id}/status", patch(update_status))
        .route_layer(from_fn_with_state(state, session_auth_middleware));

    public.merge(owner)
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    route_from: Option<String>,
    route_to: Option<String>,
    date: Option<NaiveDate>,
    only_available: Option<bool>,
    cancel_token: Option<String>,
    action: Option<String>,
}

#[derive(Debug, Serialize)]
struct CancelResponse {
    cancelled: bool,
    message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    booking_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seats_available: Option<i32>,
}

/// A replayed cancel is a 200 with `cancelled: false`, not an error. An
/// unknown link is a 404 that still carries `cancelled` and `message`.
pub(crate) fn cancel_response(outcome: CancelOutcome) -> Response {
    match outcome {
        CancelOutcome::Cancelled { booking, release } => Json(CancelResponse {
            cancelled: true,
            message: "booking cancelled",
            booking_id: Some(booking.id),
            seats_available: Some(release.offer.seats_available),
        })
        .into_response(),
        CancelOutcome::AlreadyCancelled => Json(CancelResponse {
            cancelled: false,
            message: "already cancelled",
            booking_id: None,
            seats_available: None,
        })
        .into_response(),
        CancelOutcome::NotFound => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": "booking not found",
                "code": "not_found",
                "retryable": false,
                "cancelled": false,
                "message": "link not found",
            })),
        )
            .into_response(),
    }
}

async fn list_rideshares(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    AppQuery(query): AppQuery<ListQuery>,
) -> Result<Response, AppError> {
    if let Some(token) = query.cancel_token {
        let bookings = state.bookings.clone();
        let outcome = detached(async move { bookings.cancel_by_token(&token).await }).await?;
        return Ok(cancel_response(outcome));
    }

    if query.action.as_deref() == Some("my_bookings") {
        let claims = viewer.0.ok_or_else(AppError::unauthenticated)?;
        let bookings = state.bookings.user_bookings(claims.subject_id()?).await?;
        return Ok(Json(bookings).into_response());
    }

    let filter = RideFilter {
        route_from: query.route_from,
        route_to: query.route_to,
        departure_date: query.date,
        status: None,
    };
    let listings = state
        .bookings
        .list_offers(&filter, query.only_available.unwrap_or(true))
        .await?;

    Ok(Json(listings).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum RideshareAction {
    Create(CreateRideRequest),
    Book(BookRequest),
}

/// Field names follow the front end's form (`departure_datetime`,
/// `created_by_*`); the shorter names are accepted as well.
#[derive(Debug, Deserialize)]
struct CreateRideRequest {
    route_from: String,
    route_to: String,
    #[serde(rename = "departure_datetime", alias = "departure_at", deserialize_with = "departure_time")]
    departure_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    seats_total: i32,
    #[serde(default)]
    price_per_seat: i64,
    car_class: Option<String>,
    notes: Option<String>,
    #[serde(rename = "created_by_name", alias = "driver_name")]
    driver_name: Option<String>,
    #[serde(rename = "created_by_phone", alias = "driver_phone")]
    driver_phone: Option<String>,
}

/// RFC 3339, or the zone-less `YYYY-MM-DDTHH:MM[:SS]` a datetime-local
/// input sends, read as UTC.
fn departure_time<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(at) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(at.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(&raw, format).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| serde::de::Error::custom(format!("invalid departure_datetime: {}", raw)))
}

#[derive(Debug, Deserialize)]
struct BookRequest {
    rideshare_id: Uuid,
    passenger_name: String,
    passenger_phone: String,
    passenger_email: Option<String>,
    #[serde(default = "one_seat")]
    seats_count: i32,
}

fn one_seat() -> i32 {
    1
}

#[derive(Debug, Serialize)]
struct BookingResponse {
    booking_id: Uuid,
    rideshare_id: Uuid,
    seats_count: i32,
    seats_left: i32,
    /// Shown once; only its digest is stored
    cancel_token: String,
}

async fn post_rideshare(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    AppJson(action): AppJson<RideshareAction>,
) -> Result<Response, AppError> {
    let signed_in = viewer.0.filter(SessionClaims::is_user);

    match action {
        RideshareAction::Create(req) => {
            let owner = match signed_in {
                Some(claims) => RideOwner::User { user_id: claims.subject_id()?, name: req.driver_name },
                None => RideOwner::Anonymous {
                    name: req.driver_name.unwrap_or_default(),
                    phone: Masked(req.driver_phone.unwrap_or_default()),
                },
            };
            let new_offer = NewRideOffer {
                route_from: req.route_from,
                route_to: req.route_to,
                departure_at: req.departure_at,
                expires_at: req.expires_at,
                seats_total: req.seats_total,
                price_per_seat: req.price_per_seat,
                car_class: req.car_class,
                notes: req.notes,
                owner,
            };

            let rides = state.rides.clone();
            let offer = detached(async move { rides.create_offer(new_offer).await }).await?;
            Ok((StatusCode::CREATED, Json(offer)).into_response())
        }
        RideshareAction::Book(req) => {
            let user_id = match signed_in {
                Some(claims) => Some(claims.subject_id()?),
                None => None,
            };
            let request = BookingRequest {
                rideshare_id: req.rideshare_id,
                passenger: Passenger {
                    name: req.passenger_name,
                    phone: Masked(req.passenger_phone),
                    email: req.passenger_email,
                    user_id,
                },
                seats_count: req.seats_count,
            };

            let bookings = state.bookings.clone();
            let receipt = detached(async move { bookings.book(request).await }).await?;

            let body = BookingResponse {
                booking_id: receipt.booking.id,
                rideshare_id: receipt.booking.rideshare_id,
                seats_count: receipt.booking.seats_count,
                seats_left: receipt.seats_left,
                cancel_token: receipt.cancel_token.into_string(),
            };
            Ok((StatusCode::CREATED, Json(body)).into_response())
        }
    }
}

#[derive(Debug, Deserialize)]
struct StatusRequest {
    status: RideStatus,
}

async fn update_status(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
    AppPath(id): AppPath<Uuid>,
    AppJson(req): AppJson<StatusRequest>,
) -> Result<Json<RideOffer>, AppError> {
    let actor = Actor::User(claims.subject_id()?);
    let rides = state.rides.clone();
    let offer = detached(async move { rides.set_status(id, req.status, &actor).await }).await?;
    Ok(Json(offer))
}
