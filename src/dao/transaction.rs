//! Optimistic transactions over a [`TournamentStore`].
//!
//! A [`Transaction`] records the version of every document it reads and buffers its
//! writes. Committing hands both to the store, which applies the writes only if none
//! of the recorded documents changed in the meantime and reports
//! [`StorageError::Conflict`](crate::dao::storage::StorageError::Conflict) otherwise.

use std::{fmt, sync::Arc};

use serde_json::Value;
use uuid::Uuid;

use crate::dao::{
    models::{BotDifficulty, QueueEntryEntity, TournamentEntity, TournamentMetadata},
    shard::ShardId,
    storage::StorageResult,
    tournament_store::TournamentStore,
};

/// Monotonic per-document revision, bumped by every write.
pub type Version = u64;

/// A document value along with the revision it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub version: Version,
    pub value: T,
}

/// Address of a versioned document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DocKey {
    QueueEntry(Uuid),
    Tournament { shard: ShardId, id: Uuid },
}

impl fmt::Display for DocKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocKey::QueueEntry(id) => write!(f, "tournament_queue/{id}"),
            DocKey::Tournament { shard, id } => write!(f, "tournaments_{shard}/{id}"),
        }
    }
}

/// Revision a document must still have when the transaction commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadGuard {
    pub key: DocKey,
    pub version: Version,
}

/// Queue entry to insert; the store stamps status and enqueue time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewQueueEntry {
    pub id: Uuid,
    pub user_id: String,
    pub game_type: String,
}

/// Tournament to insert with status `waiting`; the store stamps the creation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTournament {
    pub id: Uuid,
    pub game_type: String,
    pub players: Vec<String>,
    pub max_players: usize,
    pub metadata: TournamentMetadata,
}

/// Result to write (or overwrite) under a tournament; the store stamps the submission time.
#[derive(Debug, Clone, PartialEq)]
pub struct NewResult {
    pub user_id: String,
    pub result: Value,
    pub is_bot: bool,
}

/// Synthetic player record to insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBot {
    pub id: Uuid,
    pub name: String,
    pub game_type: String,
    pub difficulty: BotDifficulty,
    pub tournament_id: Uuid,
}

/// A single buffered mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    InsertQueueEntry(NewQueueEntry),
    /// Flip an entry to `assigned` and stamp the tournament it was drained into.
    AssignQueueEntry { entry_id: Uuid, tournament_id: Uuid },
    InsertTournament { shard: ShardId, tournament: NewTournament },
    /// Set-union `players` into the roster; `player_count` follows the roster size.
    AddTournamentPlayers {
        shard: ShardId,
        tournament_id: Uuid,
        players: Vec<String>,
    },
    /// Set status `active` and stamp `started_at`.
    StartTournament { shard: ShardId, tournament_id: Uuid },
    PutResult {
        shard: ShardId,
        tournament_id: Uuid,
        result: NewResult,
    },
    InsertBot(NewBot),
}

/// Reads to verify and writes to apply atomically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changeset {
    pub guards: Vec<ReadGuard>,
    pub writes: Vec<WriteOp>,
}

/// Builder for one optimistic transaction.
pub struct Transaction {
    store: Arc<dyn TournamentStore>,
    changeset: Changeset,
}

impl Transaction {
    /// Start a transaction against `store`.
    pub fn begin(store: Arc<dyn TournamentStore>) -> Self {
        Self {
            store,
            changeset: Changeset::default(),
        }
    }

    /// Oldest-first `waiting` entries for `game_type`, guarding each returned entry.
    pub async fn waiting_entries(
        &mut self,
        game_type: &str,
        limit: Option<usize>,
    ) -> StorageResult<Vec<QueueEntryEntity>> {
        let entries = self.store.waiting_entries(game_type, limit).await?;
        Ok(entries
            .into_iter()
            .map(|entry| {
                let key = DocKey::QueueEntry(entry.value.id);
                self.track(key, entry)
            })
            .collect())
    }

    /// Read a tournament, guarding it when present.
    pub async fn find_tournament(
        &mut self,
        shard: ShardId,
        id: Uuid,
    ) -> StorageResult<Option<TournamentEntity>> {
        let found = self.store.find_tournament(shard, id).await?;
        Ok(found.map(|tournament| self.track(DocKey::Tournament { shard, id }, tournament)))
    }

    /// Find a `waiting`/`active` tournament of `shard` listing `user_id`, guarding it when present.
    pub async fn find_user_tournament(
        &mut self,
        shard: ShardId,
        user_id: &str,
    ) -> StorageResult<Option<TournamentEntity>> {
        let found = self.store.find_user_tournament(shard, user_id).await?;
        Ok(found.map(|tournament| {
            let key = DocKey::Tournament {
                shard,
                id: tournament.value.id,
            };
            self.track(key, tournament)
        }))
    }

    /// Buffer a new `waiting` queue entry.
    pub fn insert_queue_entry(&mut self, entry: NewQueueEntry) {
        self.changeset.writes.push(WriteOp::InsertQueueEntry(entry));
    }

    /// Buffer the `assigned` flip of a drained entry.
    pub fn assign_queue_entry(&mut self, entry_id: Uuid, tournament_id: Uuid) {
        self.changeset.writes.push(WriteOp::AssignQueueEntry {
            entry_id,
            tournament_id,
        });
    }

    /// Buffer a new tournament in `shard`.
    pub fn insert_tournament(&mut self, shard: ShardId, tournament: NewTournament) {
        self.changeset
            .writes
            .push(WriteOp::InsertTournament { shard, tournament });
    }

    /// Buffer a set-union of `players` into the roster.
    pub fn add_tournament_players(&mut self, shard: ShardId, tournament_id: Uuid, players: Vec<String>) {
        self.changeset.writes.push(WriteOp::AddTournamentPlayers {
            shard,
            tournament_id,
            players,
        });
    }

    /// Buffer a result upsert, one per player.
    pub fn put_result(&mut self, shard: ShardId, tournament_id: Uuid, result: NewResult) {
        self.changeset.writes.push(WriteOp::PutResult {
            shard,
            tournament_id,
            result,
        });
    }

    /// Buffer a bot record.
    pub fn insert_bot(&mut self, bot: NewBot) {
        self.changeset.writes.push(WriteOp::InsertBot(bot));
    }

    /// Apply the buffered writes. A read-only transaction commits trivially.
    pub async fn commit(self) -> StorageResult<()> {
        if self.changeset.writes.is_empty() {
            return Ok(());
        }
        self.store.commit(self.changeset).await
    }

    fn track<T>(&mut self, key: DocKey, versioned: Versioned<T>) -> T {
        self.changeset.guards.push(ReadGuard {
            key,
            version: versioned.version,
        });
        versioned.value
    }
}
