//! Exactly-once queue drain.
//!
//! The allocator re-reads the oldest `waiting` entries inside an optimistic transaction
//! and commits the new tournament together with the `assigned` flip of every entry it
//! consumed. A racing allocator that drained any of those entries first makes the
//! commit fail as a whole, so no entry can end up in two tournaments.

use std::sync::Arc;

use indexmap::IndexSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        models::TournamentMetadata,
        transaction::{NewTournament, Transaction},
    },
    error::ServiceError,
    services::{bot_service, lifecycle_service},
    state::SharedState,
};

/// Outcome of one allocation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allocation {
    /// A tournament was created from the oldest waiting entries.
    Created(Uuid),
    /// The queue holds fewer entries than a drain requires.
    NotEnoughPlayers { waiting: usize, required: usize },
    /// Another allocation consumed the entries first.
    LostRace,
}

/// Try to drain one tournament worth of players from the `game_type` queue.
pub async fn allocate(state: &SharedState, game_type: &str) -> Result<Allocation, ServiceError> {
    let store = state.require_store().await?;
    let config = state.config();
    let required = config.min_human_players;

    // Cheap pre-check outside the transaction.
    let peek = store
        .waiting_entries(game_type, Some(config.max_players))
        .await?;
    let waiting = roster(peek.iter().map(|entry| entry.value.user_id.as_str())).len();
    if waiting < required {
        return Ok(Allocation::NotEnoughPlayers { waiting, required });
    }

    let mut tx = Transaction::begin(Arc::clone(&store));
    let entries = tx
        .waiting_entries(game_type, Some(config.max_players))
        .await?;
    let players = roster(entries.iter().map(|entry| entry.user_id.as_str()));
    if players.len() < required {
        debug!(game_type, waiting = players.len(), "queue drained concurrently");
        return Ok(Allocation::LostRace);
    }

    let tournament_id = Uuid::new_v4();
    let shard = state.shards().shard_for_tournament(tournament_id);
    let humans = players.len();

    tx.insert_tournament(
        shard,
        NewTournament {
            id: tournament_id,
            game_type: game_type.to_owned(),
            players: players.into_iter().map(str::to_owned).collect(),
            max_players: config.max_players,
            metadata: TournamentMetadata {
                has_real_players: true,
                auto_fill_with_bots: true,
            },
        },
    );
    for entry in &entries {
        tx.assign_queue_entry(entry.id, tournament_id);
    }

    match tx.commit().await {
        Ok(()) => {}
        Err(err) if err.is_conflict() => {
            debug!(game_type, error = %err, "allocation lost optimistic race");
            return Ok(Allocation::LostRace);
        }
        Err(err) => return Err(err.into()),
    }

    info!(
        %tournament_id,
        %shard,
        game_type,
        players = humans,
        entries = entries.len(),
        "tournament created from queue"
    );

    lifecycle_service::schedule_start(state, shard, tournament_id, config.auto_start_delay);
    let populate_state = Arc::clone(state);
    tokio::spawn(async move {
        bot_service::populate(&populate_state, shard, tournament_id).await;
    });

    Ok(Allocation::Created(tournament_id))
}

/// Distinct users in queue order. Only distinct users count towards a roster; a stray
/// second entry of a drained user is assigned along with the first.
fn roster<'a>(users: impl Iterator<Item = &'a str>) -> IndexSet<&'a str> {
    users.collect()
}

/// Fire-and-forget drain after an enqueue: keeps allocating while full batches are
/// available and gives up after repeated lost races. Failures are only logged.
pub async fn trigger(state: &SharedState, game_type: &str) {
    let max_attempts = state.config().transaction_max_attempts;
    let mut lost_races = 0;

    loop {
        match allocate(state, game_type).await {
            Ok(Allocation::Created(_)) => lost_races = 0,
            Ok(Allocation::NotEnoughPlayers { waiting, required }) => {
                debug!(game_type, waiting, required, "not enough players in queue");
                return;
            }
            Ok(Allocation::LostRace) => {
                lost_races += 1;
                if lost_races >= max_attempts {
                    debug!(game_type, "giving up allocation after repeated lost races");
                    return;
                }
            }
            Err(err) => {
                warn!(game_type, error = %err, "queue allocation failed");
                return;
            }
        }
    }
}
