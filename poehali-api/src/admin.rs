use axum::{
    extract::{Json, State},
    middleware::from_fn_with_state,
    response::Response,
    routing::{get, post, put},
    Extension, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use poehali_core::repository::{EntryResolution, SeatAudit};
use poehali_ledger::Reconciliation;
use poehali_ride::OfferListing;
use poehali_shared::{
    AccountRef, AccountType, Booking, Driver, DriverStatus, EntryKind, LedgerEntry, OrderStatus, RideFilter,
    RideOffer, RideOverride, RideStatus, TransferOrder,
};

use crate::error::AppError;
use crate::extract::{AppJson, AppPath, AppQuery};
use crate::middleware::auth::{admin_auth_middleware, require_permission, AdminClaims};
use crate::rideshares::cancel_response;
use crate::state::AppState;
use crate::task::detached;

pub const PERM_RIDESHARES_WRITE: &str = "rideshares:write";
pub const PERM_ORDERS_WRITE: &str = "orders:write";
pub const PERM_DRIVERS_WRITE: &str = "drivers:write";
pub const PERM_LEDGER_CONFIRM: &str = "ledger:confirm";
pub const PERM_LEDGER_ADJUST: &str = "ledger:adjust";

pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/v1/admin/rideshares", get(list_rideshares).put(override_rideshare))
        .route("/v1/admin/rideshares/audit", get(seat_audit))
        .route("/v1/admin/rideshares/{id}/bookings", get(offer_bookings))
        .route("/v1/admin/bookings/{id}/cancel", post(cancel_booking))
        .route("/v1/admin/orders", get(list_orders))
        .route("/v1/admin/orders/{id}/status", put(update_order_status))
        .route("/v1/admin/drivers", get(list_drivers).put(driver_action))
        .route("/v1/admin/ledger", post(ledger_action))
        .route("/v1/admin/ledger/pending", get(pending_entries))
        .route("/v1/admin/ledger/reconcile", get(reconcile))
        .route_layer(from_fn_with_state(state, admin_auth_middleware))
}

// ============================================================================
// Ride offers and bookings
// ============================================================================

#[derive(Debug, Deserialize)]
struct AdminRideQuery {
    route_from: Option<String>,
    route_to: Option<String>,
    date: Option<NaiveDate>,
    status: Option<RideStatus>,
}

/// Every offer, including the ones passengers cannot book
async fn list_rideshares(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<AdminRideQuery>,
) -> Result<Json<Vec<OfferListing>>, AppError> {
    let filter = RideFilter {
        route_from: query.route_from,
        route_to: query.route_to,
        departure_date: query.date,
        status: query.status,
    };
    Ok(Json(state.bookings.list_offers(&filter, false).await?))
}

#[derive(Debug, Deserialize)]
struct OverrideRequest {
    id: Uuid,
    #[serde(flatten)]
    patch: RideOverride,
}

#[derive(Debug, Serialize)]
struct OverrideResponse {
    offer: RideOffer,
    consistent: bool,
    expected_available: i32,
}

async fn override_rideshare(
    State(state): State<AppState>,
    Extension(claims): Extension<AdminClaims>,
    AppJson(req): AppJson<OverrideRequest>,
) -> Result<Json<OverrideResponse>, AppError> {
    require_permission(&claims, PERM_RIDESHARES_WRITE)?;

    let rides = state.rides.clone();
    let (offer, audit) = detached(async move { rides.override_offer(req.id, &req.patch, &claims.sub).await }).await?;

    Ok(Json(OverrideResponse {
        offer,
        consistent: audit.is_consistent(),
        expected_available: audit.expected_available(),
    }))
}

async fn seat_audit(State(state): State<AppState>) -> Result<Json<Vec<SeatAudit>>, AppError> {
    Ok(Json(state.rides.audit().await?))
}

async fn offer_bookings(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<Vec<Booking>>, AppError> {
    Ok(Json(state.bookings.offer_bookings(id).await?))
}

async fn cancel_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<AdminClaims>,
    AppPath(id): AppPath<Uuid>,
) -> Result<Response, AppError> {
    require_permission(&claims, PERM_RIDESHARES_WRITE)?;

    let bookings = state.bookings.clone();
    let outcome = detached(async move { bookings.cancel_by_id(id, &claims.sub).await }).await?;
    Ok(cancel_response(outcome))
}

// ============================================================================
// Transfer orders
// ============================================================================

async fn list_orders(State(state): State<AppState>) -> Result<Json<Vec<TransferOrder>>, AppError> {
    Ok(Json(state.orders.list_orders().await?))
}

#[derive(Debug, Deserialize)]
struct OrderStatusRequest {
    status: OrderStatus,
}

async fn update_order_status(
    State(state): State<AppState>,
    Extension(claims): Extension<AdminClaims>,
    AppPath(id): AppPath<Uuid>,
    AppJson(req): AppJson<OrderStatusRequest>,
) -> Result<Json<TransferOrder>, AppError> {
    require_permission(&claims, PERM_ORDERS_WRITE)?;

    let orders = state.orders.clone();
    let order = detached(async move { orders.transition(id, req.status, &claims.sub).await }).await?;
    Ok(Json(order))
}

// ============================================================================
// Drivers
// ============================================================================

async fn list_drivers(State(state): State<AppState>) -> Result<Json<Vec<Driver>>, AppError> {
    Ok(Json(state.drivers.list().await?))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum DriverAdminAction {
    Approve {
        driver_id: Uuid,
        status: DriverStatus,
        commission_rate_bp: Option<i32>,
    },
    SetCommission {
        driver_id: Uuid,
        commission_rate_bp: i32,
    },
}

async fn driver_action(
    State(state): State<AppState>,
    Extension(claims): Extension<AdminClaims>,
    AppJson(action): AppJson<DriverAdminAction>,
) -> Result<Json<Driver>, AppError> {
    require_permission(&claims, PERM_DRIVERS_WRITE)?;

    let drivers = state.drivers.clone();
    let driver = match action {
        DriverAdminAction::Approve { driver_id, status, commission_rate_bp } => {
            info!(driver_id = %driver_id, admin = %claims.sub, "Driver moderation requested");
            detached(async move { drivers.moderate(driver_id, status, commission_rate_bp).await }).await?
        }
        DriverAdminAction::SetCommission { driver_id, commission_rate_bp } => {
            info!(driver_id = %driver_id, admin = %claims.sub, "Commission change requested");
            detached(async move { drivers.set_commission(driver_id, commission_rate_bp).await }).await?
        }
    };
    Ok(Json(driver))
}

// ============================================================================
// Ledger
// ============================================================================

#[derive(Debug, Deserialize)]
struct PendingQuery {
    kind: Option<EntryKind>,
}

async fn pending_entries(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<PendingQuery>,
) -> Result<Json<Vec<LedgerEntry>>, AppError> {
    Ok(Json(state.ledger.list_pending(query.kind).await?))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum LedgerAction {
    Confirm {
        entry_id: Uuid,
        note: Option<String>,
    },
    Reject {
        entry_id: Uuid,
        note: Option<String>,
    },
    Adjust {
        account_type: AccountType,
        account_id: Uuid,
        amount: i64,
        reason: String,
    },
}

#[derive(Debug, Serialize)]
struct LedgerActionResponse {
    /// False when the entry was already in the requested state
    applied: bool,
    entry: LedgerEntry,
}

impl From<EntryResolution> for LedgerActionResponse {
    fn from(resolution: EntryResolution) -> Self {
        match resolution {
            EntryResolution::Applied(entry) => Self { applied: true, entry },
            EntryResolution::Unchanged(entry) => Self { applied: false, entry },
        }
    }
}

async fn ledger_action(
    State(state): State<AppState>,
    Extension(claims): Extension<AdminClaims>,
    AppJson(action): AppJson<LedgerAction>,
) -> Result<Json<LedgerActionResponse>, AppError> {
    let ledger = state.ledger.clone();

    let response: LedgerActionResponse = match action {
        LedgerAction::Confirm { entry_id, note } => {
            require_permission(&claims, PERM_LEDGER_CONFIRM)?;
            detached(async move { ledger.confirm(entry_id, &claims.sub, note.as_deref()).await })
                .await?
                .into()
        }
        LedgerAction::Reject { entry_id, note } => {
            require_permission(&claims, PERM_LEDGER_CONFIRM)?;
            detached(async move { ledger.reject(entry_id, &claims.sub, note.as_deref()).await })
                .await?
                .into()
        }
        LedgerAction::Adjust { account_type, account_id, amount, reason } => {
            require_permission(&claims, PERM_LEDGER_ADJUST)?;
            let account = AccountRef { account_type, account_id };
            let entry = detached(async move { ledger.adjust(account, amount, &claims.sub, &reason).await }).await?;
            LedgerActionResponse { applied: true, entry }
        }
    };

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct ReconcileQuery {
    account_type: AccountType,
    account_id: Uuid,
}

async fn reconcile(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<ReconcileQuery>,
) -> Result<Json<Reconciliation>, AppError> {
    let account = AccountRef { account_type: query.account_type, account_id: query.account_id };
    Ok(Json(state.ledger.reconcile(account).await?))
}
