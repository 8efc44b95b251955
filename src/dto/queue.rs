use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::dto::validation::validate_game_type;

/// Request to join the waiting queue of a game type.
#[derive(Debug, Deserialize, ToSchema)]
pub struct EnqueueRequest {
    pub game_type: String,
    /// Defaults to the caller; any other value is rejected.
    #[serde(default)]
    pub user_id: Option<String>,
}

impl Validate for EnqueueRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if let Err(e) = validate_game_type(&self.game_type) {
            errors.add("game_type", e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Outcome of a queue join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct EnqueueResponse {
    pub success: bool,
    /// True when the caller already plays in a `waiting` or `active` tournament.
    pub already_in_tournament: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tournament_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// 1-based position among `waiting` entries; 0 when already in a tournament.
    pub queue_position: usize,
    pub estimated_wait_ms: u64,
}

impl EnqueueResponse {
    pub fn in_tournament(tournament_id: Uuid) -> Self {
        Self {
            success: true,
            already_in_tournament: true,
            tournament_id: Some(tournament_id),
            message: Some("Already in active tournament".into()),
            queue_position: 0,
            estimated_wait_ms: 0,
        }
    }

    /// Queued at `position`, with a linear wait estimate of one second per player beyond a full roster.
    pub fn queued(position: usize, max_players: usize) -> Self {
        let overflow = u64::try_from(position.saturating_sub(max_players)).unwrap_or(u64::MAX);
        Self {
            success: true,
            already_in_tournament: false,
            tournament_id: None,
            message: None,
            queue_position: position,
            estimated_wait_ms: overflow.saturating_mul(1_000),
        }
    }
}
