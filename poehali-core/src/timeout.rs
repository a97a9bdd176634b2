use std::future::Future;
use std::time::Duration;

use crate::error::StoreError;

/// Run a store call with an upper bound on its duration.
///
/// On expiry the future is dropped, which rolls back any open transaction, and
/// the caller sees a retryable `StoreError::Timeout`.
pub async fn bounded<T, E, F>(limit: Duration, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<StoreError>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(timeout_ms = limit.as_millis() as u64, "Store call timed out");
            Err(StoreError::Timeout(limit).into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RideError;

    #[tokio::test]
    async fn test_slow_call_becomes_retryable_timeout() {
        let result: Result<(), RideError> = bounded(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        match result {
            Err(RideError::Store(e)) => assert!(e.is_retryable()),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fast_call_passes_through() {
        let result: Result<i32, RideError> = bounded(Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
