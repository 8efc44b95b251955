use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::error::{MongoDaoError, MongoResult};
use crate::dao::{
    models::{
        BotDifficulty, QueueEntryEntity, QueueStatus, ResultEntity, TournamentEntity,
        TournamentMetadata, TournamentStatus,
    },
    transaction::Versioned,
};

/// Placeholder for time fields the server overwrites with `$currentDate` in the same
/// transaction, so no reader ever sees it.
pub const SERVER_TIME_PENDING: DateTime = DateTime::from_millis(0);

/// Identifiers are stored as their hyphenated string form.
pub fn doc_id(id: Uuid) -> Document {
    doc! {"_id": id.to_string()}
}

pub fn parse_id(value: &str) -> MongoResult<Uuid> {
    Uuid::parse_str(value).map_err(|source| MongoDaoError::InvalidId {
        value: value.to_owned(),
        source,
    })
}

fn version_to_bson(version: u64) -> i64 {
    i64::try_from(version).unwrap_or(i64::MAX)
}

fn version_from_bson(version: i64) -> u64 {
    u64::try_from(version).unwrap_or_default()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoQueueDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub game_type: String,
    pub enqueued_at: DateTime,
    pub status: QueueStatus,
    pub assigned_tournament_id: Option<String>,
    pub version: i64,
}

impl MongoQueueDocument {
    pub fn waiting(id: Uuid, user_id: String, game_type: String) -> Self {
        Self {
            id: id.to_string(),
            user_id,
            game_type,
            enqueued_at: SERVER_TIME_PENDING,
            status: QueueStatus::Waiting,
            assigned_tournament_id: None,
            version: 1,
        }
    }

    pub fn try_into_versioned(self) -> MongoResult<Versioned<QueueEntryEntity>> {
        let assigned_tournament_id = self
            .assigned_tournament_id
            .as_deref()
            .map(parse_id)
            .transpose()?;
        Ok(Versioned {
            version: version_from_bson(self.version),
            value: QueueEntryEntity {
                id: parse_id(&self.id)?,
                user_id: self.user_id,
                game_type: self.game_type,
                enqueued_at: self.enqueued_at.to_system_time(),
                status: self.status,
                assigned_tournament_id,
            },
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoTournamentDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub game_type: String,
    pub status: TournamentStatus,
    pub players: Vec<String>,
    pub player_count: i64,
    pub max_players: i64,
    pub created_at: DateTime,
    pub started_at: Option<DateTime>,
    pub metadata: TournamentMetadata,
    pub version: i64,
}

impl MongoTournamentDocument {
    pub fn waiting(
        id: Uuid,
        game_type: String,
        players: Vec<String>,
        max_players: usize,
        metadata: TournamentMetadata,
    ) -> Self {
        let mut roster: Vec<String> = Vec::with_capacity(players.len());
        for player in players {
            if !roster.contains(&player) {
                roster.push(player);
            }
        }
        Self {
            id: id.to_string(),
            game_type,
            status: TournamentStatus::Waiting,
            player_count: i64::try_from(roster.len()).unwrap_or(i64::MAX),
            players: roster,
            max_players: i64::try_from(max_players).unwrap_or(i64::MAX),
            created_at: SERVER_TIME_PENDING,
            started_at: None,
            metadata,
            version: 1,
        }
    }

    pub fn try_into_versioned(self) -> MongoResult<Versioned<TournamentEntity>> {
        Ok(Versioned {
            version: version_from_bson(self.version),
            value: TournamentEntity {
                id: parse_id(&self.id)?,
                game_type: self.game_type,
                status: self.status,
                players: self.players,
                player_count: usize::try_from(self.player_count).unwrap_or_default(),
                max_players: usize::try_from(self.max_players).unwrap_or_default(),
                created_at: self.created_at.to_system_time(),
                started_at: self.started_at.map(|at| at.to_system_time()),
                metadata: self.metadata,
            },
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoResultDocument {
    /// `<tournament id>:<user id>`, one result per player.
    #[serde(rename = "_id")]
    pub id: String,
    pub tournament_id: String,
    pub user_id: String,
    pub result: Value,
    pub submitted_at: DateTime,
    pub is_bot: bool,
}

impl MongoResultDocument {
    pub fn key(tournament_id: Uuid, user_id: &str) -> String {
        format!("{tournament_id}:{user_id}")
    }

    pub fn submitted(tournament_id: Uuid, user_id: String, result: Value, is_bot: bool) -> Self {
        Self {
            id: Self::key(tournament_id, &user_id),
            tournament_id: tournament_id.to_string(),
            user_id,
            result,
            submitted_at: SERVER_TIME_PENDING,
            is_bot,
        }
    }
}

impl From<MongoResultDocument> for ResultEntity {
    fn from(value: MongoResultDocument) -> Self {
        Self {
            user_id: value.user_id,
            result: value.result,
            submitted_at: value.submitted_at.to_system_time(),
            is_bot: value.is_bot,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoBotDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub game_type: String,
    pub difficulty: BotDifficulty,
    pub is_bot: bool,
    pub tournament_id: String,
    pub created_at: DateTime,
}

/// Stored name of a tournament status, as used in query filters.
pub fn status_name(status: TournamentStatus) -> &'static str {
    match status {
        TournamentStatus::Waiting => "waiting",
        TournamentStatus::Active => "active",
    }
}

/// Guard filter matching a document only at the expected revision.
pub fn at_version(id: &str, version: u64) -> Document {
    doc! {"_id": id, "version": version_to_bson(version)}
}
