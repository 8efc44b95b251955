use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::dto::validation::validate_game_type;

/// Manual trigger of the queue drain for one game type.
#[derive(Debug, Deserialize, ToSchema)]
pub struct AllocateRequest {
    pub game_type: String,
}

impl Validate for AllocateRequest {
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

/// How a manual allocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AllocationOutcome {
    Created,
    NotEnoughPlayers,
    LostRace,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AllocateResponse {
    pub success: bool,
    pub outcome: AllocationOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tournament_id: Option<Uuid>,
    pub message: String,
}
