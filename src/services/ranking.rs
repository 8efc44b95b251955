//! Game-type-specific leaderboard ordering.

use std::cmp::Ordering;

use serde_json::Value;

use crate::dao::models::ResultEntity;

/// Game type ranked by smallest absolute timing error.
pub const TIMING_GAME: &str = "timing";
/// Game type ranked by highest level, then fastest completion.
pub const MEMORY_GAME: &str = "memory";

/// A result with its 1-based leaderboard position.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedResult {
    pub rank: usize,
    pub entry: ResultEntity,
}

/// Order `results` for `game_type` and number them from 1.
///
/// The input is first ordered by user id so equal keys always rank the same way,
/// whatever order the store returned them in.
pub fn rank_results(game_type: &str, mut results: Vec<ResultEntity>) -> Vec<RankedResult> {
    results.sort_by(|a, b| a.user_id.cmp(&b.user_id));

    match game_type {
        TIMING_GAME => results.sort_by(|a, b| {
            timing_error(&a.result).total_cmp(&timing_error(&b.result))
        }),
        MEMORY_GAME => results.sort_by(compare_memory),
        _ => results.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at)),
    }

    results
        .into_iter()
        .enumerate()
        .map(|(index, entry)| RankedResult {
            rank: index + 1,
            entry,
        })
        .collect()
}

fn number(result: &Value, field: &str) -> Option<f64> {
    result.get(field).and_then(Value::as_f64)
}

/// Missing errors rank last.
fn timing_error(result: &Value) -> f64 {
    number(result, "errorMs").map_or(f64::INFINITY, f64::abs)
}

fn compare_memory(a: &ResultEntity, b: &ResultEntity) -> Ordering {
    let level = |entry: &ResultEntity| number(&entry.result, "level").unwrap_or(f64::NEG_INFINITY);
    let completion =
        |entry: &ResultEntity| number(&entry.result, "completionTimeMs").unwrap_or(f64::INFINITY);

    level(b)
        .total_cmp(&level(a))
        .then_with(|| completion(a).total_cmp(&completion(b)))
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use serde_json::json;

    use super::*;

    fn entry(user_id: &str, result: Value) -> ResultEntity {
        ResultEntity {
            user_id: user_id.into(),
            result,
            submitted_at: SystemTime::UNIX_EPOCH,
            is_bot: false,
        }
    }

    fn order(ranked: &[RankedResult]) -> Vec<&str> {
        ranked.iter().map(|r| r.entry.user_id.as_str()).collect()
    }

    #[test]
    fn timing_ranks_by_absolute_error() {
        let ranked = rank_results(
            TIMING_GAME,
            vec![
                entry("a", json!({"errorMs": -120})),
                entry("b", json!({"errorMs": 80})),
                entry("c", json!({"errorMs": 5})),
            ],
        );
        assert_eq!(order(&ranked), ["c", "b", "a"]);
        assert_eq!(
            ranked.iter().map(|r| r.rank).collect::<Vec<_>>(),
            [1, 2, 3]
        );
    }

    #[test]
    fn memory_ranks_by_level_then_time() {
        let ranked = rank_results(
            MEMORY_GAME,
            vec![
                entry("a", json!({"level": 3, "completionTimeMs": 9000})),
                entry("b", json!({"level": 5, "completionTimeMs": 20000})),
                entry("c", json!({"level": 5, "completionTimeMs": 15000})),
            ],
        );
        assert_eq!(order(&ranked), ["c", "b", "a"]);
    }

    #[test]
    fn malformed_payloads_rank_last() {
        let ranked = rank_results(
            TIMING_GAME,
            vec![
                entry("a", json!({"score": 1})),
                entry("b", json!({"errorMs": 300})),
            ],
        );
        assert_eq!(order(&ranked), ["b", "a"]);

        let ranked = rank_results(
            MEMORY_GAME,
            vec![entry("a", json!({})), entry("b", json!({"level": 1}))],
        );
        assert_eq!(order(&ranked), ["b", "a"]);
    }

    #[test]
    fn ties_break_by_user_id() {
        let ranked = rank_results(
            TIMING_GAME,
            vec![
                entry("zed", json!({"errorMs": 10})),
                entry("amy", json!({"errorMs": -10})),
            ],
        );
        assert_eq!(order(&ranked), ["amy", "zed"]);
    }

    #[test]
    fn other_game_types_rank_by_submission_time() {
        let mut early = entry("late-name", json!({}));
        early.submitted_at = SystemTime::UNIX_EPOCH + Duration::from_secs(1);
        let mut late = entry("early-name", json!({}));
        late.submitted_at = SystemTime::UNIX_EPOCH + Duration::from_secs(2);

        let ranked = rank_results("puzzle", vec![late, early]);
        assert_eq!(order(&ranked), ["late-name", "early-name"]);
    }

    #[test]
    fn ranking_is_idempotent() {
        let results = vec![
            entry("a", json!({"errorMs": 7})),
            entry("b", json!({"errorMs": -7})),
            entry("c", json!({"errorMs": 1})),
        ];
        let first = rank_results(TIMING_GAME, results.clone());
        let second = rank_results(TIMING_GAME, results.into_iter().rev().collect());
        assert_eq!(first, second);
    }
}
