use std::future::Future;

use crate::error::AppError;

/// Run a state change on its own task so a client hanging up mid-request
/// cannot drop the future between commit and response.
pub async fn detached<T, E, F>(fut: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Into<AppError> + Send + 'static,
{
    match tokio::spawn(fut).await {
        Ok(result) => result.map_err(Into::into),
        Err(e) => Err(AppError::InternalServerError(format!("request task failed: {}", e))),
    }
}
