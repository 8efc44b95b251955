//! End-to-end matchmaking flows against the in-memory store.

use std::{collections::HashSet, sync::Arc, time::Duration};

use futures::{FutureExt, future::BoxFuture};
use serde_json::json;
use tokio::task::yield_now;
use uuid::Uuid;

use tourney_back::{
    config::AppConfig,
    dao::{
        models::{QueueEntryEntity, QueueStatus, ResultEntity, TournamentEntity, TournamentStatus},
        shard::ShardId,
        storage::StorageResult,
        tournament_store::{MemoryTournamentStore, TournamentStore},
        transaction::{Changeset, NewQueueEntry, Versioned, WriteOp},
    },
    error::ServiceError,
    services::{
        allocator::{self, Allocation},
        queue_service, results_service,
    },
    state::{AppState, SharedState},
};

const GAME: &str = "timing";

async fn setup(config: AppConfig) -> (SharedState, MemoryTournamentStore) {
    let memory = MemoryTournamentStore::new();
    let state = AppState::with_store(config, Arc::new(memory.clone())).await;
    (state, memory)
}

fn small_config(max_players: usize, min_human_players: usize) -> AppConfig {
    AppConfig {
        max_players,
        min_human_players,
        ..AppConfig::default()
    }
}

async fn seed_queue(
    memory: &MemoryTournamentStore,
    game_type: &str,
    users: impl IntoIterator<Item = String>,
) {
    let writes = users
        .into_iter()
        .map(|user_id| {
            WriteOp::InsertQueueEntry(NewQueueEntry {
                id: Uuid::new_v4(),
                user_id,
                game_type: game_type.to_owned(),
            })
        })
        .collect();
    memory.batch_write(writes).await.unwrap();
}

fn users(prefix: &str, count: usize) -> Vec<String> {
    (0..count).map(|i| format!("{prefix}-{i:03}")).collect()
}

async fn only_tournament(memory: &MemoryTournamentStore) -> TournamentEntity {
    let mut tournaments = memory.tournaments().await;
    assert_eq!(tournaments.len(), 1, "expected exactly one tournament");
    tournaments.pop().unwrap().1
}

/// Poll until a tournament shows up; allocation runs on a spawned task after enqueue.
async fn wait_for_tournaments(memory: &MemoryTournamentStore, count: usize) {
    for _ in 0..200 {
        if memory.tournaments().await.len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("tournament was never created");
}

#[tokio::test]
async fn one_short_of_a_full_roster_never_allocates() {
    let (state, memory) = setup(AppConfig::default()).await;
    seed_queue(&memory, GAME, users("p", 63)).await;

    let outcome = allocator::allocate(&state, GAME).await.unwrap();
    assert_eq!(
        outcome,
        Allocation::NotEnoughPlayers {
            waiting: 63,
            required: 64
        }
    );
    assert!(memory.tournaments().await.is_empty());

    seed_queue(&memory, GAME, ["p-063".to_string()]).await;
    let Allocation::Created(tournament_id) = allocator::allocate(&state, GAME).await.unwrap() else {
        panic!("64 waiting players must allocate");
    };

    let tournament = only_tournament(&memory).await;
    assert_eq!(tournament.id, tournament_id);
    assert_eq!(tournament.player_count, 64);
    assert_eq!(tournament.status, TournamentStatus::Waiting);
    assert!(tournament.metadata.has_real_players);

    let entries = memory.queue_entries().await;
    assert!(entries.iter().all(|entry| entry.status == QueueStatus::Assigned
        && entry.assigned_tournament_id == Some(tournament_id)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_allocations_create_a_single_tournament() {
    let (state, memory) = setup(AppConfig::default()).await;
    seed_queue(&memory, GAME, users("p", 64)).await;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let state = Arc::clone(&state);
            tokio::spawn(async move { allocator::allocate(&state, GAME).await })
        })
        .collect();

    let mut created = Vec::new();
    for handle in handles {
        if let Allocation::Created(id) = handle.await.unwrap().unwrap() {
            created.push(id);
        }
    }

    assert_eq!(created.len(), 1);
    let tournament = only_tournament(&memory).await;
    assert_eq!(tournament.id, created[0]);
    assert_eq!(tournament.players.len(), 64);
}

#[tokio::test]
async fn assigned_entries_are_never_drained_twice() {
    let (state, memory) = setup(small_config(4, 4)).await;
    seed_queue(&memory, GAME, users("p", 8)).await;

    let Allocation::Created(first) = allocator::allocate(&state, GAME).await.unwrap() else {
        panic!("first batch must allocate");
    };
    let Allocation::Created(second) = allocator::allocate(&state, GAME).await.unwrap() else {
        panic!("second batch must allocate");
    };
    assert_ne!(first, second);
    assert_eq!(
        allocator::allocate(&state, GAME).await.unwrap(),
        Allocation::NotEnoughPlayers {
            waiting: 0,
            required: 4
        }
    );

    let rosters: Vec<HashSet<String>> = memory
        .tournaments()
        .await
        .into_iter()
        .map(|(_, t)| t.players.into_iter().collect())
        .collect();
    assert_eq!(rosters.len(), 2);
    assert!(rosters[0].is_disjoint(&rosters[1]));

    // Oldest entries go first.
    let first_roster = memory
        .tournaments()
        .await
        .into_iter()
        .find(|(_, t)| t.id == first)
        .map(|(_, t)| t.players)
        .unwrap();
    assert_eq!(first_roster, users("p", 4));
}

#[tokio::test]
async fn lost_race_is_reported_and_nothing_is_written() {
    let (state, memory) = setup(small_config(4, 4)).await;
    seed_queue(&memory, GAME, users("p", 4)).await;

    memory.fail_next_commits(1);
    assert_eq!(
        allocator::allocate(&state, GAME).await.unwrap(),
        Allocation::LostRace
    );
    assert!(memory.tournaments().await.is_empty());
    assert!(memory
        .queue_entries()
        .await
        .iter()
        .all(|entry| entry.status == QueueStatus::Waiting));

    assert!(matches!(
        allocator::allocate(&state, GAME).await.unwrap(),
        Allocation::Created(_)
    ));
}

#[tokio::test]
async fn enqueue_reports_positions_and_triggers_allocation() {
    let (state, memory) = setup(small_config(3, 3)).await;

    let first = queue_service::enqueue(&state, "alice", None, GAME).await.unwrap();
    assert!(!first.already_in_tournament);
    assert_eq!(first.queue_position, 1);
    assert_eq!(first.estimated_wait_ms, 0);

    let again = queue_service::enqueue(&state, "alice", None, GAME).await.unwrap();
    assert_eq!(again.queue_position, 1);
    assert_eq!(memory.queue_entries().await.len(), 1);

    queue_service::enqueue(&state, "bob", Some("bob"), GAME).await.unwrap();
    queue_service::enqueue(&state, "carol", None, GAME).await.unwrap();
    wait_for_tournaments(&memory, 1).await;

    let tournament = only_tournament(&memory).await;
    let mut players = tournament.players.clone();
    players.sort();
    assert_eq!(players, ["alice", "bob", "carol"]);
}

/// Memory store whose commits land only after a delay, so concurrent transactions
/// read the same snapshot.
#[derive(Clone)]
struct SlowCommitStore {
    inner: MemoryTournamentStore,
    delay: Duration,
}

impl TournamentStore for SlowCommitStore {
    fn waiting_entries(
        &self,
        game_type: &str,
        limit: Option<usize>,
    ) -> BoxFuture<'static, StorageResult<Vec<Versioned<QueueEntryEntity>>>> {
        self.inner.waiting_entries(game_type, limit)
    }

    fn find_tournament(
        &self,
        shard: ShardId,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<Versioned<TournamentEntity>>>> {
        self.inner.find_tournament(shard, id)
    }

    fn find_user_tournament(
        &self,
        shard: ShardId,
        user_id: &str,
    ) -> BoxFuture<'static, StorageResult<Option<Versioned<TournamentEntity>>>> {
        self.inner.find_user_tournament(shard, user_id)
    }

    fn list_tournaments(
        &self,
        shard: ShardId,
        status: TournamentStatus,
    ) -> BoxFuture<'static, StorageResult<Vec<TournamentEntity>>> {
        self.inner.list_tournaments(shard, status)
    }

    fn list_results(
        &self,
        shard: ShardId,
        tournament_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<ResultEntity>>> {
        self.inner.list_results(shard, tournament_id)
    }

    fn commit(&self, changeset: Changeset) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        let delay = self.delay;
        async move {
            tokio::time::sleep(delay).await;
            inner.commit(changeset).await
        }
        .boxed()
    }

    fn batch_write(&self, writes: Vec<WriteOp>) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.batch_write(writes)
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.health_check()
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.try_reconnect()
    }
}

#[tokio::test]
async fn concurrent_joins_of_one_user_keep_a_single_entry() {
    let memory = MemoryTournamentStore::new();
    let slow = SlowCommitStore {
        inner: memory.clone(),
        delay: Duration::from_millis(50),
    };
    let state = AppState::with_store(small_config(4, 4), Arc::new(slow)).await;

    let (first, second) = tokio::join!(
        queue_service::enqueue(&state, "alice", None, GAME),
        queue_service::enqueue(&state, "alice", None, GAME),
    );
    assert_eq!(first.unwrap().queue_position, 1);
    assert_eq!(second.unwrap().queue_position, 1);

    let alice_entries = memory
        .queue_entries()
        .await
        .into_iter()
        .filter(|entry| entry.user_id == "alice")
        .count();
    assert_eq!(alice_entries, 1);

    for user in ["bob", "carol"] {
        queue_service::enqueue(&state, user, None, GAME).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(
        memory.tournaments().await.is_empty(),
        "three distinct players must not fill a four-seat roster"
    );

    queue_service::enqueue(&state, "dave", None, GAME).await.unwrap();
    wait_for_tournaments(&memory, 1).await;

    let tournament = only_tournament(&memory).await;
    let mut players = tournament.players.clone();
    players.sort();
    assert_eq!(players, ["alice", "bob", "carol", "dave"]);
    assert_eq!(tournament.player_count, 4);
    assert!(memory.bots_for(tournament.id).await.is_empty());
}

#[tokio::test]
async fn rejoining_returns_the_existing_tournament() {
    let (state, memory) = setup(small_config(2, 2)).await;
    queue_service::enqueue(&state, "alice", None, GAME).await.unwrap();
    queue_service::enqueue(&state, "bob", None, GAME).await.unwrap();
    wait_for_tournaments(&memory, 1).await;
    let tournament = only_tournament(&memory).await;
    let entries_before = memory.queue_entries().await.len();

    let rejoin = queue_service::enqueue(&state, "alice", None, "memory").await.unwrap();
    assert!(rejoin.already_in_tournament);
    assert_eq!(rejoin.tournament_id, Some(tournament.id));
    assert_eq!(rejoin.queue_position, 0);
    assert_eq!(memory.queue_entries().await.len(), entries_before);
}

#[tokio::test]
async fn enqueue_validates_identity_and_retries_conflicts() {
    let (state, memory) = setup(small_config(4, 4)).await;

    assert!(matches!(
        queue_service::enqueue(&state, "alice", Some("mallory"), GAME).await,
        Err(ServiceError::PermissionDenied(_))
    ));
    assert!(matches!(
        queue_service::enqueue(&state, "", None, GAME).await,
        Err(ServiceError::Unauthenticated(_))
    ));

    memory.fail_next_commits(2);
    let joined = queue_service::enqueue(&state, "alice", None, GAME).await.unwrap();
    assert_eq!(joined.queue_position, 1);

    memory.fail_next_commits(100);
    assert!(matches!(
        queue_service::enqueue(&state, "bob", None, GAME).await,
        Err(ServiceError::Conflict(_))
    ));
    memory.fail_next_commits(0);
}

#[tokio::test]
async fn degraded_state_rejects_operations() {
    let state = AppState::new(AppConfig::default(), None);
    assert!(matches!(
        queue_service::enqueue(&state, "alice", None, GAME).await,
        Err(ServiceError::Degraded)
    ));
    assert!(matches!(
        allocator::allocate(&state, GAME).await,
        Err(ServiceError::Degraded)
    ));
}

#[tokio::test]
async fn results_are_restricted_to_participants() {
    let (state, memory) = setup(small_config(2, 2)).await;
    seed_queue(&memory, GAME, ["alice".to_string(), "bob".to_string()]).await;
    let Allocation::Created(id) = allocator::allocate(&state, GAME).await.unwrap() else {
        panic!("expected allocation");
    };

    let denied =
        results_service::submit_result(&state, "mallory", id, None, json!({"errorMs": 1})).await;
    assert!(matches!(denied, Err(ServiceError::PermissionDenied(_))));
    let shard = state.shards().shard_for_tournament(id);
    assert!(memory.list_results(shard, id).await.unwrap().is_empty());

    let missing =
        results_service::submit_result(&state, "alice", Uuid::new_v4(), None, json!({"errorMs": 1}))
            .await;
    assert!(matches!(missing, Err(ServiceError::NotFound(_))));

    let impersonation =
        results_service::submit_result(&state, "alice", id, Some("bob"), json!({"errorMs": 1}))
            .await;
    assert!(matches!(impersonation, Err(ServiceError::PermissionDenied(_))));

    results_service::submit_result(&state, "alice", id, None, json!({"errorMs": 300}))
        .await
        .unwrap();
    results_service::submit_result(&state, "alice", id, None, json!({"errorMs": -20}))
        .await
        .unwrap();

    let results = memory.list_results(shard, id).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].result, json!({"errorMs": -20}));
    assert!(!results[0].is_bot);
}

#[tokio::test]
async fn leaderboards_rank_by_game_type() {
    let (state, memory) = setup(small_config(3, 3)).await;
    seed_queue(&memory, GAME, users("t", 3)).await;
    seed_queue(&memory, "memory", users("m", 3)).await;

    let Allocation::Created(timing) = allocator::allocate(&state, GAME).await.unwrap() else {
        panic!("expected timing allocation");
    };
    let Allocation::Created(memory_game) = allocator::allocate(&state, "memory").await.unwrap()
    else {
        panic!("expected memory allocation");
    };

    for (user, error) in [("t-000", -120), ("t-001", 80), ("t-002", 5)] {
        results_service::submit_result(&state, user, timing, None, json!({"errorMs": error}))
            .await
            .unwrap();
    }
    for (user, level, time) in [("m-000", 3, 9000), ("m-001", 5, 20000), ("m-002", 5, 15000)] {
        results_service::submit_result(
            &state,
            user,
            memory_game,
            None,
            json!({"level": level, "completionTimeMs": time}),
        )
        .await
        .unwrap();
    }

    let board = results_service::get_results(&state, "t-000", timing).await.unwrap();
    let order: Vec<(&str, usize)> = board
        .results
        .iter()
        .map(|r| (r.user_id.as_str(), r.rank))
        .collect();
    assert_eq!(order, [("t-002", 1), ("t-001", 2), ("t-000", 3)]);

    let board = results_service::get_results(&state, "m-000", memory_game).await.unwrap();
    let order: Vec<&str> = board.results.iter().map(|r| r.user_id.as_str()).collect();
    assert_eq!(order, ["m-002", "m-001", "m-000"]);

    let again = results_service::get_results(&state, "m-000", memory_game).await.unwrap();
    assert_eq!(board, again);

    assert!(matches!(
        results_service::get_results(&state, "m-000", Uuid::new_v4()).await,
        Err(ServiceError::NotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn partial_rosters_fill_with_bots_then_start() {
    let (state, memory) = setup(small_config(4, 2)).await;
    seed_queue(&memory, GAME, ["alice".to_string(), "bob".to_string()]).await;

    let Allocation::Created(id) = allocator::allocate(&state, GAME).await.unwrap() else {
        panic!("expected allocation");
    };
    for _ in 0..32 {
        yield_now().await;
    }

    let tournament = only_tournament(&memory).await;
    assert_eq!(tournament.player_count, 4);
    assert_eq!(memory.bots_for(id).await.len(), 2);
    // Auto-start is still pending; bot result timers may have started firing.
    assert!(state.scheduler().pending() >= 1);

    tokio::time::advance(Duration::from_secs(10)).await;
    for _ in 0..32 {
        yield_now().await;
    }
    let shard = state.shards().shard_for_tournament(id);
    let results = memory.list_results(shard, id).await.unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|result| result.is_bot));
    assert_eq!(only_tournament(&memory).await.status, TournamentStatus::Waiting);

    tokio::time::advance(Duration::from_secs(11)).await;
    for _ in 0..32 {
        yield_now().await;
    }
    let tournament = only_tournament(&memory).await;
    assert_eq!(tournament.status, TournamentStatus::Active);
    assert!(tournament.started_at.is_some());
    assert_eq!(state.scheduler().pending(), 0);

    let board = results_service::get_results(&state, "alice", id).await.unwrap();
    assert_eq!(board.results.len(), 2);
    assert_eq!(board.results[0].rank, 1);
}
