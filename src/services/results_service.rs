use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    dao::{
        shard::ShardId,
        tournament_store::TournamentStore,
        transaction::{NewResult, Transaction, WriteOp},
    },
    dto::results::{ResultsResponse, SubmitResultResponse},
    error::ServiceError,
    services::{acting_user, ranking::rank_results, with_retries},
    state::SharedState,
};

/// Record a participant's result, overwriting any earlier one.
///
/// Fails with `not-found` for an unknown tournament and `permission-denied` when the
/// user is not on the roster; nothing is written in either case.
pub async fn submit_result(
    state: &SharedState,
    caller: &str,
    tournament_id: Uuid,
    requested_user: Option<&str>,
    result: Value,
) -> Result<SubmitResultResponse, ServiceError> {
    let user_id = acting_user(caller, requested_user)?;
    let store = state.require_store().await?;
    let shard = state.shards().shard_for_tournament(tournament_id);

    with_retries(state.config().transaction_max_attempts, || {
        write_member_result(
            Arc::clone(&store),
            shard,
            tournament_id,
            &user_id,
            result.clone(),
        )
    })
    .await?;

    info!(%tournament_id, user_id, "result submitted");
    Ok(SubmitResultResponse { success: true })
}

async fn write_member_result(
    store: Arc<dyn TournamentStore>,
    shard: ShardId,
    tournament_id: Uuid,
    user_id: &str,
    result: Value,
) -> Result<(), ServiceError> {
    let mut tx = Transaction::begin(store);
    let tournament = tx
        .find_tournament(shard, tournament_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Tournament not found".into()))?;

    if !tournament.has_player(user_id) {
        return Err(ServiceError::PermissionDenied(
            "Not in this tournament".into(),
        ));
    }

    tx.put_result(
        shard,
        tournament_id,
        NewResult {
            user_id: user_id.to_owned(),
            result,
            is_bot: false,
        },
    );
    tx.commit().await?;
    Ok(())
}

/// Trusted write path for synthetic players: no roster check, no read guard.
pub async fn record_bot_result(
    state: &SharedState,
    shard: ShardId,
    tournament_id: Uuid,
    bot_id: &str,
    result: Value,
) -> Result<(), ServiceError> {
    let store = state.require_store().await?;
    store
        .batch_write(vec![WriteOp::PutResult {
            shard,
            tournament_id,
            result: NewResult {
                user_id: bot_id.to_owned(),
                result,
                is_bot: true,
            },
        }])
        .await?;
    debug!(%tournament_id, bot_id, "bot result recorded");
    Ok(())
}

/// Ranked leaderboard of a tournament, ordered by its game type.
pub async fn get_results(
    state: &SharedState,
    caller: &str,
    tournament_id: Uuid,
) -> Result<ResultsResponse, ServiceError> {
    acting_user(caller, None)?;
    let store = state.require_store().await?;
    let shard = state.shards().shard_for_tournament(tournament_id);

    let tournament = store
        .find_tournament(shard, tournament_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Tournament not found".into()))?
        .value;
    let results = store.list_results(shard, tournament_id).await?;

    let ranked = rank_results(&tournament.game_type, results);
    Ok(ResultsResponse {
        success: true,
        results: ranked.into_iter().map(Into::into).collect(),
    })
}
