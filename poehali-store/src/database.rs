use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Pool, Postgres};
use tracing::info;

use poehali_core::StoreError;

use crate::app_config::DatabaseConfig;

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

impl DbClient {
    pub async fn new(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        // Server-side cap so a stuck statement releases its locks on its own
        let options = PgConnectOptions::from_str(&config.url)?
            .options([("statement_timeout", config.statement_timeout_ms.to_string())]);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_millis(config.acquire_timeout_ms))
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&self.pool)
            .await?;
        info!("Migrations completed successfully.");
        Ok(())
    }
}

/// Nothing sqlx reports here leaves a partial write behind: the transaction
/// is rolled back when it is dropped.
pub(crate) fn db_err(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::Decode(_)
        | sqlx::Error::TypeNotFound { .. } => StoreError::Corrupt(e.to_string()),
        sqlx::Error::Database(ref db) => sqlstate_err(db.code().as_deref(), db.message()),
        other => StoreError::Unavailable(other.to_string()),
    }
}

/// Class 22 (data exception) and 23 (integrity constraint) fail the same way
/// on every retry. Everything else the server reports is treated as transient.
fn sqlstate_err(code: Option<&str>, message: &str) -> StoreError {
    match code {
        Some("57014") => StoreError::Unavailable(format!("statement timeout: {}", message)),
        Some(code) if code.starts_with("22") || code.starts_with("23") => {
            StoreError::Rejected(format!("{} ({})", message, code))
        }
        _ => StoreError::Unavailable(message.to_string()),
    }
}

/// Parse a TEXT status column back into its enum
pub(crate) fn parse_col<T>(value: &str) -> Result<T, StoreError>
where
    T: FromStr,
    T::Err: Display,
{
    value.parse().map_err(|e: T::Err| StoreError::Corrupt(e.to_string()))
}

/// Escape LIKE metacharacters so user input only ever matches literally
pub(crate) fn like_pattern(needle: &str) -> String {
    let escaped = needle.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    format!("%{}%", escaped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use poehali_shared::RideStatus;

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }

    #[test]
    fn test_sqlstate_classes() {
        // numeric_value_out_of_range, check_violation, unique_violation
        for code in ["22003", "23514", "23505"] {
            let err = sqlstate_err(Some(code), "rejected");
            assert!(matches!(err, StoreError::Rejected(_)), "{}", code);
            assert!(!err.is_retryable());
        }

        // query_canceled, serialization_failure, deadlock_detected, admin_shutdown
        for code in ["57014", "40001", "40P01", "57P01"] {
            assert!(sqlstate_err(Some(code), "transient").is_retryable(), "{}", code);
        }
        assert!(sqlstate_err(None, "no code").is_retryable());
    }

    #[test]
    fn test_driver_errors() {
        assert!(db_err(sqlx::Error::PoolTimedOut).is_retryable());
        let err = db_err(sqlx::Error::ColumnNotFound("status".to_string()));
        assert!(matches!(err, StoreError::Corrupt(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_unknown_status_is_corrupt() {
        let err = parse_col::<RideStatus>("paused").unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
        assert_eq!(parse_col::<RideStatus>("active").unwrap(), RideStatus::Active);
    }
}
