use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use validator::{Validate, ValidationErrors};

use crate::{
    dto::{format_system_time, validation::validate_result_payload},
    services::ranking::RankedResult,
};

/// A participant's result for a tournament.
#[derive(Debug, Deserialize, ToSchema)]
pub struct SubmitResultRequest {
    /// Defaults to the caller; any other value is rejected.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Game-type-specific payload, e.g. `{"errorMs": 42}` or `{"level": 5, "completionTimeMs": 41000}`.
    #[schema(value_type = Object)]
    #[serde(default)]
    pub result: Value,
}

impl Validate for SubmitResultRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if let Err(e) = validate_result_payload(&self.result) {
            errors.add("result", e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SubmitResultResponse {
    pub success: bool,
}

/// One leaderboard line.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct RankedResultDto {
    pub user_id: String,
    #[schema(value_type = Object)]
    pub result: Value,
    /// RFC 3339 submission time.
    pub submitted_at: String,
    pub is_bot: bool,
    /// 1-based position after ordering.
    pub rank: usize,
}

impl From<RankedResult> for RankedResultDto {
    fn from(value: RankedResult) -> Self {
        Self {
            user_id: value.entry.user_id,
            result: value.entry.result,
            submitted_at: format_system_time(value.entry.submitted_at),
            is_bot: value.entry.is_bot,
            rank: value.rank,
        }
    }
}

/// Full ranked leaderboard of a tournament.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ResultsResponse {
    pub success: bool,
    pub results: Vec<RankedResultDto>,
}
