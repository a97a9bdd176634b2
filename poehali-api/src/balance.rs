use axum::{
    extract::{Json, State},
    http::StatusCode,
    middleware::from_fn_with_state,
    routing::get,
    Extension, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use poehali_shared::{AccountType, EntryKind, EntryStatus, LedgerEntry};

use crate::error::AppError;
use crate::extract::AppJson;
use crate::middleware::auth::{session_auth_middleware, SessionClaims};
use crate::state::AppState;
use crate::task::detached;

pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/v1/balance", get(get_balance).post(balance_action))
        .route_layer(from_fn_with_state(state, session_auth_middleware))
}

#[derive(Debug, Serialize)]
struct BalanceResponse {
    account_type: AccountType,
    account_id: Uuid,
    balance: i64,
    entries: Vec<LedgerEntry>,
}

async fn get_balance(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
) -> Result<Json<BalanceResponse>, AppError> {
    let account = claims.account()?;
    let balance = state.ledger.balance(account).await?;
    let entries = state.ledger.list_entries(account).await?;

    Ok(Json(BalanceResponse {
        account_type: account.account_type,
        account_id: account.account_id,
        balance: balance.balance,
        entries,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum BalanceAction {
    Withdraw { amount: i64, requisites: String },
    Deposit { amount: i64, payment_method: Option<String> },
}

#[derive(Debug, Serialize)]
struct PendingEntryResponse {
    entry_id: Uuid,
    kind: EntryKind,
    status: EntryStatus,
    amount: i64,
}

/// Both requests only queue a pending entry; staff confirm them separately.
async fn balance_action(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
    AppJson(action): AppJson<BalanceAction>,
) -> Result<(StatusCode, Json<PendingEntryResponse>), AppError> {
    let account = claims.account()?;
    let ledger = state.ledger.clone();

    let entry = match action {
        BalanceAction::Withdraw { amount, requisites } => {
            detached(async move { ledger.request_withdrawal(account, amount, &requisites).await }).await?
        }
        BalanceAction::Deposit { amount, payment_method } => {
            detached(async move { ledger.request_deposit(account, amount, payment_method).await }).await?
        }
    };

    Ok((
        StatusCode::CREATED,
        Json(PendingEntryResponse {
            entry_id: entry.id,
            kind: entry.kind,
            status: entry.status,
            amount: entry.amount,
        }),
    ))
}
