use axum::{
    extract::{Json, State},
    http::StatusCode,
    routing::post,
    Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use poehali_shared::{Masked, NewTransferOrder, TransferOrder};

use crate::error::AppError;
use crate::extract::AppJson;
use crate::state::AppState;
use crate::task::detached;

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/orders", post(create_order))
}

#[derive(Debug, Deserialize)]
struct CreateOrderRequest {
    route_from: String,
    route_to: String,
    pickup_at: DateTime<Utc>,
    passenger_name: String,
    passenger_phone: String,
    #[serde(default = "one_passenger")]
    passengers_count: i32,
    car_class: Option<String>,
    notes: Option<String>,
    price: i64,
}

fn one_passenger() -> i32 {
    1
}

async fn create_order(
    State(state): State<AppState>,
    AppJson(req): AppJson<CreateOrderRequest>,
) -> Result<(StatusCode, Json<TransferOrder>), AppError> {
    let new_order = NewTransferOrder {
        route_from: req.route_from,
        route_to: req.route_to,
        pickup_at: req.pickup_at,
        passenger_name: req.passenger_name,
        passenger_phone: Masked(req.passenger_phone),
        passengers_count: req.passengers_count,
        car_class: req.car_class,
        notes: req.notes,
        price: req.price,
    };

    let orders = state.orders.clone();
    let order = detached(async move { orders.create_order(new_order).await }).await?;
    Ok((StatusCode::CREATED, Json(order)))
}
