use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::SystemTime;
use uuid::Uuid;

/// Lifecycle of a waiting-queue entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Still waiting to be drained into a tournament.
    Waiting,
    /// Consumed by an allocation; kept as an audit trail.
    Assigned,
}

/// A player waiting for a tournament of a given game type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueEntryEntity {
    /// Primary key of the entry.
    pub id: Uuid,
    /// Player that joined the queue.
    pub user_id: String,
    /// Game type the player queued for.
    pub game_type: String,
    /// Store-assigned enqueue timestamp, defines first-come-first-served order.
    pub enqueued_at: SystemTime,
    /// Whether the entry was already drained.
    pub status: QueueStatus,
    /// Tournament the entry was drained into.
    pub assigned_tournament_id: Option<Uuid>,
}

/// Lifecycle of a tournament.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TournamentStatus {
    /// Created, roster may still be filling up.
    Waiting,
    /// Started; players may submit results.
    Active,
}

/// Flags describing how a tournament roster was built.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TournamentMetadata {
    pub has_real_players: bool,
    pub auto_fill_with_bots: bool,
}

/// Tournament document stored in one of the shards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TournamentEntity {
    /// Primary key of the tournament.
    pub id: Uuid,
    /// Game type all participants play.
    pub game_type: String,
    /// Current lifecycle status.
    pub status: TournamentStatus,
    /// Participant identifiers (humans and bots), without duplicates.
    pub players: Vec<String>,
    /// Always equal to `players.len()`.
    pub player_count: usize,
    /// Roster capacity.
    pub max_players: usize,
    /// Store-assigned creation timestamp.
    pub created_at: SystemTime,
    /// Set once the tournament transitions to [`TournamentStatus::Active`].
    pub started_at: Option<SystemTime>,
    pub metadata: TournamentMetadata,
}

impl TournamentEntity {
    /// Whether `user_id` is part of the roster.
    pub fn has_player(&self, user_id: &str) -> bool {
        self.players.iter().any(|player| player == user_id)
    }

    /// Number of free roster slots.
    pub fn open_slots(&self) -> usize {
        self.max_players.saturating_sub(self.player_count)
    }
}

/// Result submitted by a participant, keyed by user id under its tournament.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultEntity {
    pub user_id: String,
    /// Game-type-specific payload.
    pub result: Value,
    /// Store-assigned submission timestamp.
    pub submitted_at: SystemTime,
    pub is_bot: bool,
}

/// Skill level advertised by a synthetic player.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum BotDifficulty {
    Easy,
    Medium,
    Hard,
    VeryHard,
}

impl BotDifficulty {
    /// Every difficulty, in ascending order.
    pub const ALL: [BotDifficulty; 4] = [
        BotDifficulty::Easy,
        BotDifficulty::Medium,
        BotDifficulty::Hard,
        BotDifficulty::VeryHard,
    ];
}

/// Descriptive record of a synthetic player; only referenced by id from rosters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BotEntity {
    pub id: Uuid,
    pub name: String,
    pub game_type: String,
    pub difficulty: BotDifficulty,
    pub is_bot: bool,
    pub tournament_id: Uuid,
    pub created_at: SystemTime,
}
