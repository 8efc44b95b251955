//! Synthetic players.
//!
//! Population is idempotent: it only ever fills the open roster slots, inside a
//! transaction guarded on the tournament revision, so it can be re-run after a restart.

use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use rand::Rng;
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::{
        models::BotDifficulty,
        shard::ShardId,
        tournament_store::TournamentStore,
        transaction::{NewBot, Transaction},
    },
    error::ServiceError,
    services::{ranking::TIMING_GAME, results_service, with_retries},
    state::SharedState,
};

const TIMING_TARGET_MS: u64 = 3_000;

/// Bots added by one population run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Population {
    pub game_type: String,
    pub bot_ids: Vec<String>,
}

/// Fill the tournament's open slots with bots, then schedule one result per new bot.
///
/// Best effort: failures are logged and never reach the allocation that triggered it.
pub async fn populate(state: &SharedState, shard: ShardId, tournament_id: Uuid) {
    match fill_with_bots(state, shard, tournament_id).await {
        Ok(population) if population.bot_ids.is_empty() => {
            debug!(%tournament_id, "no bots needed");
        }
        Ok(population) => {
            info!(%tournament_id, bots = population.bot_ids.len(), "tournament filled with bots");
            schedule_bot_results(state, shard, tournament_id, population);
        }
        Err(err) => warn!(%tournament_id, error = %err, "bot population failed"),
    }
}

/// Add `max(0, max_players - player_count)` bots when the tournament allows auto-fill.
pub async fn fill_with_bots(
    state: &SharedState,
    shard: ShardId,
    tournament_id: Uuid,
) -> Result<Population, ServiceError> {
    let store = state.require_store().await?;
    with_retries(state.config().transaction_max_attempts, || {
        add_bots(state.config(), Arc::clone(&store), shard, tournament_id)
    })
    .await
}

async fn add_bots(
    config: &AppConfig,
    store: Arc<dyn TournamentStore>,
    shard: ShardId,
    tournament_id: Uuid,
) -> Result<Population, ServiceError> {
    let mut tx = Transaction::begin(store);
    let tournament = tx
        .find_tournament(shard, tournament_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("tournament {tournament_id}")))?;

    let open_slots = tournament.open_slots();
    if !tournament.metadata.auto_fill_with_bots || open_slots == 0 {
        return Ok(Population {
            game_type: tournament.game_type,
            bot_ids: Vec::new(),
        });
    }

    let bots: Vec<NewBot> = (0..open_slots)
        .map(|_| generate_bot(&config.bot_names, &tournament.game_type, tournament_id))
        .collect();
    let bot_ids: Vec<String> = bots.iter().map(|bot| bot.id.to_string()).collect();

    for bot in bots {
        tx.insert_bot(bot);
    }
    tx.add_tournament_players(shard, tournament_id, bot_ids.clone());
    tx.commit().await?;

    Ok(Population {
        game_type: tournament.game_type,
        bot_ids,
    })
}

fn schedule_bot_results(
    state: &SharedState,
    shard: ShardId,
    tournament_id: Uuid,
    population: Population,
) {
    let max_delay_ms = u64::try_from(state.config().bot_result_max_delay.as_millis())
        .unwrap_or(u64::MAX);

    for bot_id in population.bot_ids {
        let delay = if max_delay_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..max_delay_ms))
        };
        let task_state = Arc::clone(state);
        let game_type = population.game_type.clone();

        state.scheduler().schedule("bot-result", delay, async move {
            let result = generate_result(&game_type);
            if let Err(err) =
                results_service::record_bot_result(&task_state, shard, tournament_id, &bot_id, result)
                    .await
            {
                warn!(%tournament_id, bot_id, error = %err, "bot result submission failed");
            }
        });
    }
}

/// Random bot: a pool name with a numeric suffix and a random difficulty.
fn generate_bot(names: &[String], game_type: &str, tournament_id: Uuid) -> NewBot {
    let mut rng = rand::rng();
    let base = names
        .get(rng.random_range(0..names.len().max(1)))
        .map(String::as_str)
        .unwrap_or("Bot");
    let difficulty = BotDifficulty::ALL[rng.random_range(0..BotDifficulty::ALL.len())];

    NewBot {
        id: Uuid::new_v4(),
        name: format!("{base}_{}", rng.random_range(0..1000)),
        game_type: game_type.to_owned(),
        difficulty,
        tournament_id,
    }
}

/// Plausible result payload for `game_type`.
///
/// `timing` bots miss the 3 s target by 50 to 450 ms either way; every other game type
/// gets a memory-style level and completion time.
pub fn generate_result(game_type: &str) -> Value {
    let mut rng = rand::rng();
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default();

    if game_type == TIMING_GAME {
        let magnitude = 50.0 + rng.random::<f64>() * 400.0;
        let error = if rng.random_bool(0.5) {
            magnitude
        } else {
            -magnitude
        };
        json!({
            "type": "timing",
            "errorMs": error.round() as i64,
            "targetMs": TIMING_TARGET_MS,
            "timestamp": timestamp,
        })
    } else {
        let level: u32 = rng.random_range(1..=15);
        let completion = f64::from(level) * 8_000.0 + rng.random::<f64>() * 5_000.0;
        json!({
            "type": "memory",
            "level": level,
            "completionTimeMs": completion.round() as u64,
            "timestamp": timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use tokio::{task::yield_now, time::advance};

    use super::*;
    use crate::{
        dao::{
            models::TournamentMetadata,
            tournament_store::MemoryTournamentStore,
            transaction::{NewTournament, WriteOp},
        },
        state::AppState,
    };

    async fn seeded(
        players: &[&str],
        auto_fill_with_bots: bool,
    ) -> (SharedState, MemoryTournamentStore, ShardId, Uuid) {
        let memory = MemoryTournamentStore::new();
        let state = AppState::with_store(AppConfig::default(), Arc::new(memory.clone())).await;
        let id = Uuid::new_v4();
        let shard = state.shards().shard_for_tournament(id);
        memory
            .batch_write(vec![WriteOp::InsertTournament {
                shard,
                tournament: NewTournament {
                    id,
                    game_type: "timing".into(),
                    players: players.iter().map(|p| p.to_string()).collect(),
                    max_players: 4,
                    metadata: TournamentMetadata {
                        has_real_players: true,
                        auto_fill_with_bots,
                    },
                },
            }])
            .await
            .unwrap();
        (state, memory, shard, id)
    }

    #[test]
    fn timing_results_stay_in_range() {
        for _ in 0..200 {
            let result = generate_result("timing");
            let error = result["errorMs"].as_i64().unwrap().abs();
            assert!((50..=450).contains(&error));
            assert_eq!(result["targetMs"], 3000);
            assert_eq!(result["type"], "timing");
        }
    }

    #[test]
    fn other_results_are_memory_shaped() {
        for _ in 0..200 {
            let result = generate_result("puzzle");
            let level = result["level"].as_u64().unwrap();
            let completion = result["completionTimeMs"].as_u64().unwrap();
            assert!((1..=15).contains(&level));
            assert!(completion >= level * 8_000 && completion <= level * 8_000 + 5_000);
            assert_eq!(result["type"], "memory");
        }
    }

    #[test]
    fn bot_names_use_the_pool() {
        let names = vec!["BrainBox".to_string()];
        let bot = generate_bot(&names, "memory", Uuid::nil());
        assert!(bot.name.starts_with("BrainBox_"));
        assert_eq!(bot.game_type, "memory");
    }

    #[tokio::test]
    async fn fills_only_open_slots_and_is_idempotent() {
        let (state, memory, shard, id) = seeded(&["alice", "bob"], true).await;

        let first = fill_with_bots(&state, shard, id).await.unwrap();
        assert_eq!(first.bot_ids.len(), 2);
        let second = fill_with_bots(&state, shard, id).await.unwrap();
        assert!(second.bot_ids.is_empty());

        let (_, tournament) = memory.tournaments().await.pop().unwrap();
        assert_eq!(tournament.player_count, 4);
        assert_eq!(tournament.players.len(), 4);
        assert_eq!(memory.bots_for(id).await.len(), 2);
    }

    #[tokio::test]
    async fn respects_auto_fill_flag() {
        let (state, memory, shard, id) = seeded(&["alice"], false).await;
        let population = fill_with_bots(&state, shard, id).await.unwrap();
        assert!(population.bot_ids.is_empty());
        assert!(memory.bots_for(id).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn bot_results_arrive_within_max_delay() {
        let (state, memory, shard, id) = seeded(&["alice"], true).await;

        populate(&state, shard, id).await;
        assert_eq!(state.scheduler().pending(), 3);
        for _ in 0..8 {
            yield_now().await;
        }

        advance(Duration::from_secs(10)).await;
        for _ in 0..32 {
            yield_now().await;
        }

        assert_eq!(state.scheduler().pending(), 0);
        let results = memory.list_results(shard, id).await.unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|result| result.is_bot));
    }
}
