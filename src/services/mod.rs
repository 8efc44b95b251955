use std::future::Future;

use tracing::debug;

use crate::error::ServiceError;

/// Exactly-once queue drain into new tournaments.
pub mod allocator;
/// Synthetic players and their staggered results.
pub mod bot_service;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Tournament start timers and boot-time recovery.
pub mod lifecycle_service;
/// Queue joins and idempotent rejoin.
pub mod queue_service;
/// Game-type-specific leaderboard ordering.
pub mod ranking;
/// Result submission and leaderboard queries.
pub mod results_service;
/// Storage connection supervisor with reconnect backoff.
pub mod storage_supervisor;

/// Run `attempt` until it stops reporting a transaction conflict or `max_attempts` is reached.
async fn with_retries<T, F, Fut>(max_attempts: u32, mut attempt: F) -> Result<T, ServiceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let mut attempts = 1;
    loop {
        match attempt().await {
            Err(ServiceError::Conflict(source)) if attempts < max_attempts => {
                debug!(attempt = attempts, error = %source, "transaction conflict; retrying");
                attempts += 1;
            }
            outcome => return outcome,
        }
    }
}

/// Resolve the user a request acts for: the caller unless another identity is named.
fn acting_user(caller: &str, requested: Option<&str>) -> Result<String, ServiceError> {
    if caller.trim().is_empty() {
        return Err(ServiceError::Unauthenticated(
            "a verified caller identity is required".into(),
        ));
    }
    match requested {
        None => Ok(caller.to_owned()),
        Some(user_id) if user_id == caller => Ok(caller.to_owned()),
        Some(_) => Err(ServiceError::PermissionDenied(
            "cannot act on behalf of another user".into(),
        )),
    }
}
