use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    dao::{
        tournament_store::TournamentStore,
        transaction::{NewQueueEntry, Transaction},
    },
    dto::queue::EnqueueResponse,
    error::ServiceError,
    services::{acting_user, allocator, with_retries},
    state::SharedState,
};

/// Put `caller` in the waiting queue of `game_type`, then trigger the allocator.
///
/// A caller already playing in a `waiting`/`active` tournament gets that tournament back,
/// and a caller already waiting in this queue keeps their place; neither writes a new entry.
pub async fn enqueue(
    state: &SharedState,
    caller: &str,
    requested_user: Option<&str>,
    game_type: &str,
) -> Result<EnqueueResponse, ServiceError> {
    let user_id = acting_user(caller, requested_user)?;
    let store = state.require_store().await?;

    let response = with_retries(state.config().transaction_max_attempts, || {
        join_queue(state, Arc::clone(&store), &user_id, game_type)
    })
    .await?;

    let trigger_state = Arc::clone(state);
    let trigger_game_type = game_type.to_owned();
    tokio::spawn(async move {
        allocator::trigger(&trigger_state, &trigger_game_type).await;
    });

    Ok(response)
}

async fn join_queue(
    state: &SharedState,
    store: Arc<dyn TournamentStore>,
    user_id: &str,
    game_type: &str,
) -> Result<EnqueueResponse, ServiceError> {
    let mut tx = Transaction::begin(store);

    for shard in state.shards().shards() {
        if let Some(tournament) = tx.find_user_tournament(shard, user_id).await? {
            debug!(user_id, tournament_id = %tournament.id, "user already in a tournament");
            return Ok(EnqueueResponse::in_tournament(tournament.id));
        }
    }

    let max_players = state.config().max_players;
    let waiting = tx.waiting_entries(game_type, None).await?;
    if let Some(index) = waiting.iter().position(|entry| entry.user_id == user_id) {
        debug!(user_id, game_type, "user already waiting in queue");
        return Ok(EnqueueResponse::queued(index + 1, max_players));
    }

    // A concurrent join of the same user makes the store reject this insert; the retry
    // then finds that entry above.
    tx.insert_queue_entry(NewQueueEntry {
        id: Uuid::new_v4(),
        user_id: user_id.to_owned(),
        game_type: game_type.to_owned(),
    });
    tx.commit().await?;

    let position = waiting.len() + 1;
    info!(user_id, game_type, position, "user joined tournament queue");
    Ok(EnqueueResponse::queued(position, max_players))
}
