use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{
    dao::{models::TournamentStatus, shard::ShardId, transaction::WriteOp},
    error::ServiceError,
    services::bot_service,
    state::{SharedState, TaskId},
};

/// Start the tournament once `delay` has elapsed.
///
/// A tournament has at most one pending start: scheduling again cancels the earlier timer.
pub fn schedule_start(
    state: &SharedState,
    shard: ShardId,
    tournament_id: Uuid,
    delay: Duration,
) -> TaskId {
    let task_state = Arc::clone(state);
    let task = state
        .scheduler()
        .schedule("tournament-start", delay, async move {
            task_state.start_timers().remove(&tournament_id);
            start_tournament(&task_state, shard, tournament_id).await;
        });

    if let Some(previous) = state.start_timers().insert(tournament_id, task) {
        if state.scheduler().cancel(previous) {
            debug!(%tournament_id, %previous, %task, "replaced pending start timer");
        }
    }
    task
}

/// Flip the tournament to `active` and stamp `started_at`, whether or not bots are in yet.
///
/// Nobody awaits the outcome, so failures are logged and dropped.
pub async fn start_tournament(state: &SharedState, shard: ShardId, tournament_id: Uuid) {
    let outcome = async {
        let store = state.require_store().await?;
        store
            .batch_write(vec![WriteOp::StartTournament {
                shard,
                tournament_id,
            }])
            .await?;
        Ok::<_, ServiceError>(())
    }
    .await;

    match outcome {
        Ok(()) => info!(%tournament_id, %shard, "tournament started"),
        Err(err) => error!(%tournament_id, %shard, error = %err, "failed to start tournament"),
    }
}

/// Re-issue the timers and bot population of every `waiting` tournament, e.g. after a restart
/// or a storage reconnect. Safe to repeat: each start timer replaces the previous one.
///
/// Starts are rescheduled for what is left of the auto-start delay. Returns how many
/// tournaments were resumed.
pub async fn recover(state: &SharedState) -> Result<usize, ServiceError> {
    let store = state.require_store().await?;
    let delay = state.config().auto_start_delay;
    let now = SystemTime::now();
    let mut resumed = 0;

    for shard in state.shards().shards() {
        for tournament in store
            .list_tournaments(shard, TournamentStatus::Waiting)
            .await?
        {
            let remaining = (tournament.created_at + delay)
                .duration_since(now)
                .unwrap_or(Duration::ZERO);
            schedule_start(state, shard, tournament.id, remaining);
            spawn_population(state, shard, tournament.id);
            resumed += 1;
        }
    }

    if resumed > 0 {
        info!(resumed, "rescheduled pending tournaments");
    }
    Ok(resumed)
}

fn spawn_population(state: &SharedState, shard: ShardId, tournament_id: Uuid) {
    let task_state = Arc::clone(state);
    tokio::spawn(async move {
        bot_service::populate(&task_state, shard, tournament_id).await;
    });
}

#[cfg(test)]
mod tests {
    use tokio::{task::yield_now, time::advance};

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{
            models::TournamentMetadata,
            tournament_store::{MemoryTournamentStore, TournamentStore},
            transaction::NewTournament,
        },
        state::AppState,
    };

    async fn seeded(
        metadata: TournamentMetadata,
    ) -> (SharedState, MemoryTournamentStore, ShardId, Uuid) {
        let memory = MemoryTournamentStore::new();
        let state = AppState::with_store(AppConfig::default(), Arc::new(memory.clone())).await;
        let id = Uuid::new_v4();
        let shard = state.shards().shard_for_tournament(id);
        memory
            .batch_write(vec![WriteOp::InsertTournament {
                shard,
                tournament: NewTournament {
                    id,
                    game_type: "timing".into(),
                    players: vec!["alice".into()],
                    max_players: 4,
                    metadata,
                },
            }])
            .await
            .unwrap();
        (state, memory, shard, id)
    }

    async fn settle() {
        for _ in 0..8 {
            yield_now().await;
        }
    }

    async fn status_of(memory: &MemoryTournamentStore, id: Uuid) -> TournamentStatus {
        memory
            .tournaments()
            .await
            .into_iter()
            .find(|(_, t)| t.id == id)
            .map(|(_, t)| t.status)
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_start_activates_after_delay() {
        let (state, memory, shard, id) = seeded(TournamentMetadata {
            has_real_players: true,
            auto_fill_with_bots: false,
        })
        .await;

        schedule_start(&state, shard, id, Duration::from_secs(20));
        settle().await;

        advance(Duration::from_secs(19)).await;
        settle().await;
        assert_eq!(status_of(&memory, id).await, TournamentStatus::Waiting);

        advance(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(status_of(&memory, id).await, TournamentStatus::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn recover_reschedules_waiting_tournaments() {
        let (state, memory, _, id) = seeded(TournamentMetadata {
            has_real_players: true,
            auto_fill_with_bots: false,
        })
        .await;

        assert_eq!(recover(&state).await.unwrap(), 1);
        assert_eq!(state.scheduler().pending(), 1);
        settle().await;

        advance(Duration::from_secs(21)).await;
        settle().await;
        assert_eq!(status_of(&memory, id).await, TournamentStatus::Active);
        assert_eq!(recover(&state).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_the_pending_start() {
        let (state, memory, shard, id) = seeded(TournamentMetadata {
            has_real_players: true,
            auto_fill_with_bots: false,
        })
        .await;

        let first = schedule_start(&state, shard, id, Duration::from_secs(5));
        let second = schedule_start(&state, shard, id, Duration::from_secs(30));
        assert_ne!(first, second);
        assert_eq!(state.scheduler().pending(), 1);
        assert!(!state.scheduler().cancel(first));
        settle().await;

        advance(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(status_of(&memory, id).await, TournamentStatus::Waiting);

        advance(Duration::from_secs(21)).await;
        settle().await;
        assert_eq!(status_of(&memory, id).await, TournamentStatus::Active);
        assert!(state.start_timers().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_recovery_keeps_one_timer_per_tournament() {
        let (state, _, _, _) = seeded(TournamentMetadata {
            has_real_players: true,
            auto_fill_with_bots: false,
        })
        .await;

        assert_eq!(recover(&state).await.unwrap(), 1);
        assert_eq!(recover(&state).await.unwrap(), 1);
        assert_eq!(state.scheduler().pending(), 1);
        assert_eq!(state.start_timers().len(), 1);
    }

    #[tokio::test]
    async fn starting_a_missing_tournament_is_swallowed() {
        let memory = MemoryTournamentStore::new();
        let state = AppState::with_store(AppConfig::default(), Arc::new(memory.clone())).await;
        let id = Uuid::new_v4();
        start_tournament(&state, state.shards().shard_for_tournament(id), id).await;
        assert!(memory.tournaments().await.is_empty());
    }
}
