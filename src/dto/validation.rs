//! Validation helpers for DTOs.

use serde_json::Value;
use validator::ValidationError;

/// Longest game type identifier accepted by the queue.
pub const MAX_GAME_TYPE_LEN: usize = 64;

/// Validates that a game type is a non-blank identifier of at most [`MAX_GAME_TYPE_LEN`] characters.
///
/// # Examples
///
/// ```ignore
/// validate_game_type("timing") // Ok
/// validate_game_type("   ")    // Err - blank
/// validate_game_type("a\nb")   // Err - control character
/// ```
pub fn validate_game_type(game_type: &str) -> Result<(), ValidationError> {
    if game_type.trim().is_empty() {
        let mut err = ValidationError::new("game_type_required");
        err.message = Some("Game type must not be empty".into());
        return Err(err);
    }

    let length = game_type.chars().count();
    if length > MAX_GAME_TYPE_LEN {
        let mut err = ValidationError::new("game_type_length");
        err.message = Some(
            format!("Game type must be at most {MAX_GAME_TYPE_LEN} characters (got {length})")
                .into(),
        );
        return Err(err);
    }

    if game_type.chars().any(char::is_control) {
        let mut err = ValidationError::new("game_type_format");
        err.message = Some("Game type must not contain control characters".into());
        return Err(err);
    }

    Ok(())
}

/// Validates that a submitted result is a JSON object; a missing `result` field arrives as `null`.
pub fn validate_result_payload(result: &Value) -> Result<(), ValidationError> {
    match result {
        Value::Object(_) => Ok(()),
        Value::Null => {
            let mut err = ValidationError::new("result_required");
            err.message = Some("Result is required".into());
            Err(err)
        }
        _ => {
            let mut err = ValidationError::new("result_format");
            err.message = Some("Result must be a JSON object".into());
            Err(err)
        }
    }
}
