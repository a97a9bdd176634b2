use axum::{
    extract::{Json, State},
    http::StatusCode,
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use poehali_shared::{Driver, Masked, NewDriver, TransferOrder};

use crate::error::AppError;
use crate::extract::AppJson;
use crate::middleware::auth::{driver_auth_middleware, SessionClaims};
use crate::state::AppState;
use crate::task::detached;

pub fn routes(state: AppState) -> Router<AppState> {
    let driver = Router::new()
        .route("/v1/drivers", post(driver_action))
        .route("/v1/drivers/orders", get(my_orders))
        .route("/v1/drivers/orders/available", get(available_orders))
        .route_layer(from_fn_with_state(state, driver_auth_middleware));

    Router::new()
        .route("/v1/drivers/register", post(register))
        .merge(driver)
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    name: String,
    phone: String,
}

async fn register(
    State(state): State<AppState>,
    AppJson(req): AppJson<RegisterRequest>,
) -> Result<(StatusCode, Json<Driver>), AppError> {
    let new_driver = NewDriver { name: req.name, phone: Masked(req.phone) };
    let drivers = state.drivers.clone();
    let driver = detached(async move { drivers.register(new_driver).await }).await?;
    Ok((StatusCode::CREATED, Json(driver)))
}

/// Feed entry. Passenger contact stays hidden until the order is claimed.
#[derive(Debug, Serialize)]
struct AvailableOrder {
    id: Uuid,
    route_from: String,
    route_to: String,
    pickup_at: DateTime<Utc>,
    passengers_count: i32,
    car_class: Option<String>,
    notes: Option<String>,
    price: i64,
    created_at: DateTime<Utc>,
}

impl From<TransferOrder> for AvailableOrder {
    fn from(order: TransferOrder) -> Self {
        Self {
            id: order.id,
            route_from: order.route_from,
            route_to: order.route_to,
            pickup_at: order.pickup_at,
            passengers_count: order.passengers_count,
            car_class: order.car_class,
            notes: order.notes,
            price: order.price,
            created_at: order.created_at,
        }
    }
}

async fn available_orders(State(state): State<AppState>) -> Result<Json<Vec<AvailableOrder>>, AppError> {
    let orders = state.orders.list_available().await?;
    Ok(Json(orders.into_iter().map(AvailableOrder::from).collect()))
}

async fn my_orders(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
) -> Result<Json<Vec<TransferOrder>>, AppError> {
    let orders = state.orders.driver_orders(claims.subject_id()?).await?;
    Ok(Json(orders))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum DriverAction {
    AcceptOrder { order_id: Uuid },
    SetOnline { is_online: bool },
}

#[derive(Debug, Serialize)]
struct ClaimResponse {
    order_id: Uuid,
    price: i64,
    driver_amount: i64,
    commission_amount: i64,
    passenger_name: String,
    passenger_phone: Masked<String>,
}

async fn driver_action(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
    AppJson(action): AppJson<DriverAction>,
) -> Result<Response, AppError> {
    let driver_id = claims.subject_id()?;

    match action {
        DriverAction::AcceptOrder { order_id } => {
            let orders = state.orders.clone();
            let receipt = detached(async move { orders.claim(order_id, driver_id).await }).await?;

            Ok(Json(ClaimResponse {
                order_id: receipt.order.id,
                price: receipt.order.price,
                driver_amount: receipt.split.driver_amount,
                commission_amount: receipt.split.commission_amount,
                passenger_name: receipt.order.passenger_name,
                passenger_phone: receipt.order.passenger_phone,
            })
            .into_response())
        }
        DriverAction::SetOnline { is_online } => {
            let drivers = state.drivers.clone();
            let driver = detached(async move { drivers.set_online(driver_id, is_online).await }).await?;
            Ok(Json(driver).into_response())
        }
    }
}
