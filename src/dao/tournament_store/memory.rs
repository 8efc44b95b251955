//! In-process [`TournamentStore`] used for local runs and as the test double.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::SystemTime,
};

use futures::future::BoxFuture;
use indexmap::IndexMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::dao::{
    models::{
        BotEntity, QueueEntryEntity, QueueStatus, ResultEntity, TournamentEntity,
        TournamentStatus,
    },
    shard::ShardId,
    storage::{StorageError, StorageResult},
    tournament_store::TournamentStore,
    transaction::{Changeset, DocKey, ReadGuard, Versioned, WriteOp},
};

/// Mutex-guarded maps with the same optimistic semantics as the database backends.
#[derive(Clone, Default)]
pub struct MemoryTournamentStore {
    inner: Arc<Mutex<MemoryState>>,
    forced_conflicts: Arc<AtomicUsize>,
}

#[derive(Default)]
struct MemoryState {
    /// Insertion order doubles as enqueue order.
    queue: IndexMap<Uuid, Versioned<QueueEntryEntity>>,
    tournaments: HashMap<ShardId, IndexMap<Uuid, Versioned<TournamentEntity>>>,
    results: HashMap<Uuid, BTreeMap<String, ResultEntity>>,
    bots: IndexMap<Uuid, BotEntity>,
}

impl MemoryTournamentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` commits fail with [`StorageError::Conflict`] without applying anything.
    pub fn fail_next_commits(&self, count: usize) {
        self.forced_conflicts.store(count, Ordering::SeqCst);
    }

    /// Every queue entry ever written, in enqueue order.
    pub async fn queue_entries(&self) -> Vec<QueueEntryEntity> {
        let guard = self.inner.lock().await;
        guard.queue.values().map(|entry| entry.value.clone()).collect()
    }

    /// Every tournament across all shards.
    pub async fn tournaments(&self) -> Vec<(ShardId, TournamentEntity)> {
        let guard = self.inner.lock().await;
        let mut all: Vec<_> = guard
            .tournaments
            .iter()
            .flat_map(|(shard, docs)| docs.values().map(|doc| (*shard, doc.value.clone())))
            .collect();
        all.sort_by_key(|(_, tournament)| tournament.created_at);
        all
    }

    /// Bot records created for `tournament_id`.
    pub async fn bots_for(&self, tournament_id: Uuid) -> Vec<BotEntity> {
        let guard = self.inner.lock().await;
        guard
            .bots
            .values()
            .filter(|bot| bot.tournament_id == tournament_id)
            .cloned()
            .collect()
    }

    fn take_forced_conflict(&self) -> bool {
        self.forced_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

impl MemoryState {
    fn version_of(&self, key: &DocKey) -> Option<u64> {
        match key {
            DocKey::QueueEntry(id) => self.queue.get(id).map(|entry| entry.version),
            DocKey::Tournament { shard, id } => self
                .tournaments
                .get(shard)
                .and_then(|docs| docs.get(id))
                .map(|doc| doc.version),
        }
    }

    fn is_waiting(&self, user_id: &str, game_type: &str) -> bool {
        self.queue.values().any(|entry| {
            entry.value.status == QueueStatus::Waiting
                && entry.value.user_id == user_id
                && entry.value.game_type == game_type
        })
    }

    fn verify(&self, guards: &[ReadGuard]) -> StorageResult<()> {
        for guard in guards {
            if self.version_of(&guard.key) != Some(guard.version) {
                return Err(StorageError::conflict(&guard.key));
            }
        }
        Ok(())
    }

    /// Reject the whole changeset before touching anything if one write cannot apply.
    fn validate(&self, writes: &[WriteOp]) -> StorageResult<()> {
        let mut new_entries = HashSet::new();
        let mut new_waiting = HashSet::new();
        let mut new_tournaments = HashSet::new();

        for op in writes {
            match op {
                WriteOp::InsertQueueEntry(entry) => {
                    let key = DocKey::QueueEntry(entry.id);
                    if self.queue.contains_key(&entry.id) || !new_entries.insert(entry.id) {
                        return Err(StorageError::conflict(key));
                    }
                    // At most one `waiting` entry per user and game type.
                    if self.is_waiting(&entry.user_id, &entry.game_type)
                        || !new_waiting.insert((entry.user_id.as_str(), entry.game_type.as_str()))
                    {
                        return Err(StorageError::conflict(format!(
                            "tournament_queue/waiting/{}/{}",
                            entry.game_type, entry.user_id
                        )));
                    }
                }
                WriteOp::AssignQueueEntry { entry_id, .. } => {
                    if !self.queue.contains_key(entry_id) && !new_entries.contains(entry_id) {
                        return Err(StorageError::MissingDocument {
                            key: DocKey::QueueEntry(*entry_id).to_string(),
                        });
                    }
                }
                WriteOp::InsertTournament { shard, tournament } => {
                    let key = DocKey::Tournament {
                        shard: *shard,
                        id: tournament.id,
                    };
                    if self.version_of(&key).is_some() || !new_tournaments.insert(key.clone()) {
                        return Err(StorageError::conflict(key));
                    }
                }
                WriteOp::AddTournamentPlayers {
                    shard,
                    tournament_id,
                    ..
                }
                | WriteOp::StartTournament {
                    shard,
                    tournament_id,
                }
                | WriteOp::PutResult {
                    shard,
                    tournament_id,
                    ..
                } => {
                    let key = DocKey::Tournament {
                        shard: *shard,
                        id: *tournament_id,
                    };
                    if self.version_of(&key).is_none() && !new_tournaments.contains(&key) {
                        return Err(StorageError::MissingDocument {
                            key: key.to_string(),
                        });
                    }
                }
                WriteOp::InsertBot(bot) => {
                    if self.bots.contains_key(&bot.id) {
                        return Err(StorageError::conflict(format!("tournament_bots/{}", bot.id)));
                    }
                }
            }
        }
        Ok(())
    }

    fn tournament_mut(&mut self, shard: ShardId, id: Uuid) -> Option<&mut Versioned<TournamentEntity>> {
        self.tournaments.get_mut(&shard).and_then(|docs| docs.get_mut(&id))
    }

    fn apply(&mut self, writes: Vec<WriteOp>) {
        let now = SystemTime::now();
        for op in writes {
            match op {
                WriteOp::InsertQueueEntry(entry) => {
                    self.queue.insert(
                        entry.id,
                        Versioned {
                            version: 1,
                            value: QueueEntryEntity {
                                id: entry.id,
                                user_id: entry.user_id,
                                game_type: entry.game_type,
                                enqueued_at: now,
                                status: QueueStatus::Waiting,
                                assigned_tournament_id: None,
                            },
                        },
                    );
                }
                WriteOp::AssignQueueEntry {
                    entry_id,
                    tournament_id,
                } => {
                    if let Some(entry) = self.queue.get_mut(&entry_id) {
                        entry.version += 1;
                        entry.value.status = QueueStatus::Assigned;
                        entry.value.assigned_tournament_id = Some(tournament_id);
                    }
                }
                WriteOp::InsertTournament { shard, tournament } => {
                    let mut players: Vec<String> = Vec::with_capacity(tournament.players.len());
                    for player in tournament.players {
                        if !players.contains(&player) {
                            players.push(player);
                        }
                    }
                    let entity = TournamentEntity {
                        id: tournament.id,
                        game_type: tournament.game_type,
                        status: TournamentStatus::Waiting,
                        player_count: players.len(),
                        players,
                        max_players: tournament.max_players,
                        created_at: now,
                        started_at: None,
                        metadata: tournament.metadata,
                    };
                    self.tournaments.entry(shard).or_default().insert(
                        tournament.id,
                        Versioned {
                            version: 1,
                            value: entity,
                        },
                    );
                }
                WriteOp::AddTournamentPlayers {
                    shard,
                    tournament_id,
                    players,
                } => {
                    if let Some(doc) = self.tournament_mut(shard, tournament_id) {
                        for player in players {
                            if !doc.value.has_player(&player) {
                                doc.value.players.push(player);
                            }
                        }
                        doc.value.player_count = doc.value.players.len();
                        doc.version += 1;
                    }
                }
                WriteOp::StartTournament {
                    shard,
                    tournament_id,
                } => {
                    if let Some(doc) = self.tournament_mut(shard, tournament_id) {
                        doc.value.status = TournamentStatus::Active;
                        doc.value.started_at = Some(now);
                        doc.version += 1;
                    }
                }
                WriteOp::PutResult {
                    tournament_id,
                    result,
                    ..
                } => {
                    self.results.entry(tournament_id).or_default().insert(
                        result.user_id.clone(),
                        ResultEntity {
                            user_id: result.user_id,
                            result: result.result,
                            submitted_at: now,
                            is_bot: result.is_bot,
                        },
                    );
                }
                WriteOp::InsertBot(bot) => {
                    self.bots.insert(
                        bot.id,
                        BotEntity {
                            id: bot.id,
                            name: bot.name,
                            game_type: bot.game_type,
                            difficulty: bot.difficulty,
                            is_bot: true,
                            tournament_id: bot.tournament_id,
                            created_at: now,
                        },
                    );
                }
            }
        }
    }
}

impl TournamentStore for MemoryTournamentStore {
    fn waiting_entries(
        &self,
        game_type: &str,
        limit: Option<usize>,
    ) -> BoxFuture<'static, StorageResult<Vec<Versioned<QueueEntryEntity>>>> {
        let store = self.clone();
        let game_type = game_type.to_owned();
        Box::pin(async move {
            let guard = store.inner.lock().await;
            let entries = guard
                .queue
                .values()
                .filter(|entry| {
                    entry.value.status == QueueStatus::Waiting && entry.value.game_type == game_type
                })
                .take(limit.unwrap_or(usize::MAX))
                .cloned()
                .collect();
            Ok(entries)
        })
    }

    fn find_tournament(
        &self,
        shard: ShardId,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<Versioned<TournamentEntity>>>> {
        let store = self.clone();
        Box::pin(async move {
            let guard = store.inner.lock().await;
            Ok(guard
                .tournaments
                .get(&shard)
                .and_then(|docs| docs.get(&id))
                .cloned())
        })
    }

    fn find_user_tournament(
        &self,
        shard: ShardId,
        user_id: &str,
    ) -> BoxFuture<'static, StorageResult<Option<Versioned<TournamentEntity>>>> {
        let store = self.clone();
        let user_id = user_id.to_owned();
        Box::pin(async move {
            let guard = store.inner.lock().await;
            Ok(guard.tournaments.get(&shard).and_then(|docs| {
                docs.values()
                    .find(|doc| {
                        matches!(
                            doc.value.status,
                            TournamentStatus::Waiting | TournamentStatus::Active
                        ) && doc.value.has_player(&user_id)
                    })
                    .cloned()
            }))
        })
    }

    fn list_tournaments(
        &self,
        shard: ShardId,
        status: TournamentStatus,
    ) -> BoxFuture<'static, StorageResult<Vec<TournamentEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let guard = store.inner.lock().await;
            Ok(guard
                .tournaments
                .get(&shard)
                .map(|docs| {
                    docs.values()
                        .filter(|doc| doc.value.status == status)
                        .map(|doc| doc.value.clone())
                        .collect()
                })
                .unwrap_or_default())
        })
    }

    fn list_results(
        &self,
        _shard: ShardId,
        tournament_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<ResultEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let guard = store.inner.lock().await;
            Ok(guard
                .results
                .get(&tournament_id)
                .map(|results| results.values().cloned().collect())
                .unwrap_or_default())
        })
    }

    fn commit(&self, changeset: Changeset) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let mut guard = store.inner.lock().await;
            if store.take_forced_conflict() {
                return Err(StorageError::conflict("forced"));
            }
            guard.verify(&changeset.guards)?;
            guard.validate(&changeset.writes)?;
            guard.apply(changeset.writes);
            Ok(())
        })
    }

    fn batch_write(&self, writes: Vec<WriteOp>) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let mut guard = store.inner.lock().await;
            guard.validate(&writes)?;
            guard.apply(writes);
            Ok(())
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}
