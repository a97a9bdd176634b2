use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use poehali_core::{DriverError, LedgerError, OrderError, RideError, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    AuthenticationError(String),
    #[error("{message}")]
    AuthorizationError { code: &'static str, message: String },
    #[error("{0}")]
    ValidationError(String),
    #[error("{0}")]
    NotFoundError(String),
    /// Lost a race or hit a state that forbids the move
    #[error("{message}")]
    ConflictError { code: &'static str, message: String },
    /// Terminal business "no": retrying the same request will not help
    #[error("{message}")]
    RejectedError { code: &'static str, message: String },
    #[error(transparent)]
    StoreError(#[from] StoreError),
    #[error("{0}")]
    InternalServerError(String),
}

impl AppError {
    pub fn forbidden(message: impl Into<String>) -> Self {
        AppError::AuthorizationError { code: "forbidden", message: message.into() }
    }

    pub fn unauthenticated() -> Self {
        AppError::AuthenticationError("authentication required".to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, error_message, retryable) = match self {
            AppError::AuthenticationError(msg) => (StatusCode::UNAUTHORIZED, "unauthenticated", msg, false),
            AppError::AuthorizationError { code, message } => (StatusCode::FORBIDDEN, code, message, false),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, "validation", msg, false),
            AppError::NotFoundError(msg) => (StatusCode::NOT_FOUND, "not_found", msg, false),
            AppError::ConflictError { code, message } => (StatusCode::CONFLICT, code, message, false),
            AppError::RejectedError { code, message } => (StatusCode::BAD_REQUEST, code, message, false),
            AppError::StoreError(err) => {
                tracing::error!("Store failure: {}", err);
                match err {
                    StoreError::Timeout(_) | StoreError::Unavailable(_) => {
                        (StatusCode::SERVICE_UNAVAILABLE, "unavailable", "try again".to_string(), true)
                    }
                    StoreError::Rejected(_) => {
                        (StatusCode::BAD_REQUEST, "rejected", "request rejected by the store".to_string(), false)
                    }
                    StoreError::Corrupt(_) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "internal", "Internal Server Error".to_string(), false)
                    }
                }
            }
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal", "Internal Server Error".to_string(), false)
            }
        };

        let body = Json(json!({
            "error": error_message,
            "code": code,
            "retryable": retryable,
        }));

        (status, body).into_response()
    }
}

impl From<RideError> for AppError {
    fn from(err: RideError) -> Self {
        match err {
            RideError::Validation(msg) => AppError::ValidationError(msg),
            RideError::NotFound => AppError::NotFoundError("ride offer not found".to_string()),
            RideError::Inactive => AppError::RejectedError {
                code: "inactive",
                message: "ride is no longer active".to_string(),
            },
            RideError::Expired => AppError::RejectedError {
                code: "expired",
                message: "ride has expired".to_string(),
            },
            RideError::SoldOut { requested, available } => AppError::ConflictError {
                code: "sold_out",
                message: format!("not enough seats: requested {}, available {}", requested, available),
            },
            RideError::Forbidden(msg) => AppError::forbidden(msg),
            RideError::Store(e) => AppError::StoreError(e),
        }
    }
}

impl From<OrderError> for AppError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::Validation(msg) => AppError::ValidationError(msg),
            OrderError::NotFound => AppError::NotFoundError("order not found".to_string()),
            OrderError::DriverNotFound => AppError::NotFoundError("driver not found".to_string()),
            OrderError::AlreadyClaimed => AppError::ConflictError {
                code: "already_claimed",
                message: "already claimed by another driver".to_string(),
            },
            OrderError::DriverInactive => AppError::AuthorizationError {
                code: "driver_inactive",
                message: "driver is not approved or not active".to_string(),
            },
            e @ OrderError::InvalidTransition { .. } => AppError::ConflictError {
                code: "invalid_transition",
                message: e.to_string(),
            },
            OrderError::Store(e) => AppError::StoreError(e),
        }
    }
}

impl From<DriverError> for AppError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::Validation(msg) => AppError::ValidationError(msg),
            DriverError::NotFound => AppError::NotFoundError("driver not found".to_string()),
            DriverError::Store(e) => AppError::StoreError(e),
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Validation(msg) => AppError::ValidationError(msg),
            LedgerError::NotFound => AppError::NotFoundError("ledger entry not found".to_string()),
            e @ LedgerError::InsufficientBalance { .. } => AppError::RejectedError {
                code: "insufficient_balance",
                message: e.to_string(),
            },
            e @ LedgerError::InvalidTransition { .. } => AppError::ConflictError {
                code: "invalid_transition",
                message: e.to_string(),
            },
            LedgerError::Store(e) => AppError::StoreError(e),
        }
    }
}
