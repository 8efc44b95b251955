//! Application-level configuration loading: tournament sizing, timers and the bot name pool.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "TOURNEY_BACK_CONFIG_PATH";

const DEFAULT_MAX_PLAYERS: usize = 64;
const DEFAULT_SHARD_COUNT: u32 = 50;
const DEFAULT_AUTO_START_DELAY_MS: u64 = 20_000;
const DEFAULT_BOT_RESULT_MAX_DELAY_MS: u64 = 10_000;
const DEFAULT_TRANSACTION_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Roster capacity of every tournament.
    pub max_players: usize,
    /// Waiting entries required before the allocator drains the queue.
    pub min_human_players: usize,
    /// Number of tournament storage partitions.
    pub shard_count: u32,
    /// Delay between tournament creation and its transition to `active`.
    pub auto_start_delay: Duration,
    /// Upper bound (exclusive) of the random delay before a bot submits its result.
    pub bot_result_max_delay: Duration,
    /// Attempts made by caller-facing transactions before giving up on conflicts.
    pub transaction_max_attempts: u32,
    /// Base names picked from when generating bots.
    pub bot_names: Vec<String>,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        max_players = app_config.max_players,
                        shard_count = app_config.shard_count,
                        "loaded tournament settings from config"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    max_players: Option<usize>,
    min_human_players: Option<usize>,
    shard_count: Option<u32>,
    auto_start_delay_ms: Option<u64>,
    bot_result_max_delay_ms: Option<u64>,
    transaction_max_attempts: Option<u32>,
    bot_names: Option<Vec<String>>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let max_players = value.max_players.unwrap_or(DEFAULT_MAX_PLAYERS).max(1);
        // A drain always claims at least one entry and never more than a full roster.
        let min_human_players = value
            .min_human_players
            .unwrap_or(max_players)
            .clamp(1, max_players);
        let bot_names = value
            .bot_names
            .filter(|names| !names.is_empty())
            .unwrap_or_else(default_bot_names);

        Self {
            max_players,
            min_human_players,
            shard_count: value.shard_count.unwrap_or(DEFAULT_SHARD_COUNT).max(1),
            auto_start_delay: Duration::from_millis(
                value
                    .auto_start_delay_ms
                    .unwrap_or(DEFAULT_AUTO_START_DELAY_MS),
            ),
            bot_result_max_delay: Duration::from_millis(
                value
                    .bot_result_max_delay_ms
                    .unwrap_or(DEFAULT_BOT_RESULT_MAX_DELAY_MS),
            ),
            transaction_max_attempts: value
                .transaction_max_attempts
                .unwrap_or(DEFAULT_TRANSACTION_MAX_ATTEMPTS)
                .max(1),
            bot_names,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Built-in bot name pool shipped with the binary.
fn default_bot_names() -> Vec<String> {
    [
        "TimeMaster42",
        "PrecisionPro",
        "QuickReflexes",
        "SpeedDemon99",
        "MemoryMaster",
        "BrainBox",
        "RecallPro",
        "MindPalace",
        "NeuralNet",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_constants() {
        let config = AppConfig::default();
        assert_eq!(config.max_players, 64);
        assert_eq!(config.min_human_players, 64);
        assert_eq!(config.shard_count, 50);
        assert_eq!(config.auto_start_delay, Duration::from_secs(20));
        assert_eq!(config.bot_result_max_delay, Duration::from_secs(10));
        assert_eq!(config.bot_names.len(), 9);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let raw: RawConfig =
            serde_json::from_str(r#"{"max_players": 8, "min_human_players": 20}"#).unwrap();
        let config = AppConfig::from(raw);
        assert_eq!(config.max_players, 8);
        assert_eq!(config.min_human_players, 8); // clamped to capacity
        assert_eq!(config.shard_count, 50);
        assert_eq!(config.transaction_max_attempts, 5);
    }

    #[test]
    fn empty_name_pool_falls_back_to_defaults() {
        let raw: RawConfig = serde_json::from_str(r#"{"bot_names": []}"#).unwrap();
        let config = AppConfig::from(raw);
        assert_eq!(config.bot_names, default_bot_names());
    }
}
