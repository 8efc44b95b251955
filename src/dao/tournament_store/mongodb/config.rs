use std::time::Duration;

use mongodb::options::ClientOptions;

use super::error::{MongoDaoError, MongoResult};

const DEFAULT_DB: &str = "tourney";
const DEFAULT_CONNECT_ATTEMPTS: u32 = 10;
const DEFAULT_CONNECT_BACKOFF: Duration = Duration::from_millis(250);

/// Connection settings for the MongoDB backend.
#[derive(Clone)]
pub struct MongoConfig {
    pub options: ClientOptions,
    pub database_name: String,
    /// Number of `tournaments_<n>` / `tournament_results_<n>` collection pairs to manage.
    pub shard_count: u32,
    /// Pings attempted before a connection is given up.
    pub connect_attempts: u32,
    /// Delay after the first failed ping, doubled after every further failure.
    pub connect_backoff: Duration,
}

impl MongoConfig {
    pub async fn from_uri(uri: &str, db_name: Option<&str>, shard_count: u32) -> MongoResult<Self> {
        let options =
            ClientOptions::parse(uri)
                .await
                .map_err(|source| MongoDaoError::InvalidUri {
                    uri: uri.to_owned(),
                    source,
                })?;

        Ok(Self {
            options,
            database_name: db_name
                .filter(|name| !name.is_empty())
                .unwrap_or(DEFAULT_DB)
                .to_owned(),
            shard_count: shard_count.max(1),
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            connect_backoff: DEFAULT_CONNECT_BACKOFF,
        })
    }

    /// `MONGO_URI` is required; `MONGO_DB` and `MONGO_CONNECT_ATTEMPTS` are optional.
    pub async fn from_env(shard_count: u32) -> MongoResult<Self> {
        let uri = std::env::var("MONGO_URI")
            .map_err(|_| MongoDaoError::MissingEnvVar { var: "MONGO_URI" })?;
        let db = std::env::var("MONGO_DB").ok();
        let mut config = Self::from_uri(&uri, db.as_deref(), shard_count).await?;

        if let Some(attempts) = std::env::var("MONGO_CONNECT_ATTEMPTS")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
        {
            config.connect_attempts = attempts.max(1);
        }
        Ok(config)
    }

    /// Backoff before ping attempt `attempt + 1`, capped at five seconds.
    pub(super) fn backoff_after(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.connect_backoff
            .saturating_mul(factor)
            .min(Duration::from_secs(5))
    }
}
