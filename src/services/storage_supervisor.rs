use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::{
    dao::{storage::StorageError, tournament_store::TournamentStore},
    services::lifecycle_service,
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Reconnect to the storage backend and keep the shared state in degraded mode when it is unavailable.
///
/// Pending tournaments are recovered after every successful connection; recovery replaces
/// start timers left over from an earlier connection.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn TournamentStore>, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;

    loop {
        match connect().await {
            Ok(store) => {
                state.set_store(store.clone()).await;
                info!("storage connection established; leaving degraded mode");
                delay = INITIAL_DELAY;

                if let Err(err) = lifecycle_service::recover(&state).await {
                    error!(error = %err, "failed to recover pending tournaments");
                }

                loop {
                    match store.health_check().await {
                        Ok(()) => {
                            if state.is_degraded().await {
                                info!("storage healthy again; leaving degraded mode");
                                state.update_degraded(false).await;
                            }
                            sleep(HEALTH_POLL_INTERVAL).await;
                        }
                        Err(_) => {
                            if reconnect(&state, store.as_ref()).await {
                                state.update_degraded(false).await;
                                sleep(HEALTH_POLL_INTERVAL).await;
                                continue;
                            }
                            warn!("exhausted storage reconnect attempts; staying in degraded mode");
                            state.clear_store().await;
                            break;
                        }
                    }
                }

                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
            Err(err) => {
                warn!(error = %err, "storage connection attempt failed");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    }
}

/// Retry [`TournamentStore::try_reconnect`] with backoff; degraded mode starts at the first failure.
async fn reconnect(state: &SharedState, store: &dyn TournamentStore) -> bool {
    let mut reconnect_delay = INITIAL_DELAY;

    for attempt in 0..MAX_RECONNECT_ATTEMPTS {
        match store.try_reconnect().await {
            Ok(()) => {
                info!("storage reconnection succeeded after health check failure");
                return true;
            }
            Err(reconnect_err) => {
                if attempt == 0 {
                    warn!(
                        attempt, error = %reconnect_err,
                        "storage reconnect first attempt failed; entering degraded mode"
                    );
                    state.update_degraded(true).await;
                } else {
                    warn!(attempt, error = %reconnect_err, "storage reconnect attempt failed");
                }
                sleep(reconnect_delay).await;
                reconnect_delay = (reconnect_delay * 2).min(MAX_DELAY);
            }
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::task::yield_now;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{
            models::TournamentMetadata,
            tournament_store::MemoryTournamentStore,
            transaction::{NewTournament, WriteOp},
        },
        state::AppState,
    };

    #[tokio::test(start_paused = true)]
    async fn installs_store_after_failed_attempts_and_recovers() {
        let memory = MemoryTournamentStore::new();
        let id = uuid::Uuid::new_v4();
        let state = AppState::new(AppConfig::default(), None);
        let shard = state.shards().shard_for_tournament(id);
        memory
            .batch_write(vec![WriteOp::InsertTournament {
                shard,
                tournament: NewTournament {
                    id,
                    game_type: "memory".into(),
                    players: vec!["alice".into()],
                    max_players: 2,
                    metadata: TournamentMetadata {
                        has_real_players: true,
                        auto_fill_with_bots: false,
                    },
                },
            }])
            .await
            .unwrap();

        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let backend = memory.clone();
        tokio::spawn(run(Arc::clone(&state), move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            let backend = backend.clone();
            async move {
                if attempt == 0 {
                    return Err(StorageError::unavailable(
                        "connect".into(),
                        std::io::Error::other("refused"),
                    ));
                }
                Ok(Arc::new(backend) as Arc<dyn TournamentStore>)
            }
        }));

        yield_now().await;
        assert!(state.is_degraded().await);

        tokio::time::advance(INITIAL_DELAY).await;
        for _ in 0..16 {
            yield_now().await;
        }

        assert!(!state.is_degraded().await);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        // The recovered tournament's start timer is pending again.
        assert_eq!(state.scheduler().pending(), 1);
    }
}
