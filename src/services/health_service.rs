use tracing::warn;

use crate::{
    dto::health::{HealthResponse, HealthStatus},
    state::SharedState,
};

/// Probe the installed store and report `ok` or `degraded`.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let status = match state.require_store().await {
        Ok(store) => match store.health_check().await {
            Ok(()) if !state.is_degraded().await => HealthStatus::Ok,
            Ok(()) => HealthStatus::Degraded,
            Err(err) => {
                warn!(error = %err, "storage health check failed");
                HealthStatus::Degraded
            }
        },
        Err(_) => {
            warn!("storage unavailable (degraded mode)");
            HealthStatus::Degraded
        }
    };

    HealthResponse {
        status,
        pending_tasks: state.scheduler().pending(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{config::AppConfig, dao::tournament_store::MemoryTournamentStore, state::AppState};

    #[tokio::test]
    async fn reports_degraded_without_store() {
        let state = AppState::new(AppConfig::default(), None);
        assert_eq!(health_status(&state).await.status, HealthStatus::Degraded);

        state.set_store(Arc::new(MemoryTournamentStore::new())).await;
        assert_eq!(health_status(&state).await.status, HealthStatus::Ok);

        state.update_degraded(true).await;
        assert_eq!(health_status(&state).await.status, HealthStatus::Degraded);

        state.clear_store().await;
        assert_eq!(health_status(&state).await.status, HealthStatus::Degraded);
    }
}
