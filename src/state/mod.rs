pub mod scheduler;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, watch};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::{shard::ShardRouter, tournament_store::TournamentStore},
    error::ServiceError,
};

pub use self::scheduler::{TaskId, TaskScheduler};

pub type SharedState = Arc<AppState>;

/// Central application state: configuration, the installed store and pending timers.
pub struct AppState {
    store: RwLock<Option<Arc<dyn TournamentStore>>>,
    degraded: watch::Sender<bool>,
    config: AppConfig,
    shards: ShardRouter,
    scheduler: TaskScheduler,
    start_timers: DashMap<Uuid, TaskId>,
    admin_token: Option<String>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig, admin_token: Option<String>) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            store: RwLock::new(None),
            degraded: degraded_tx,
            shards: ShardRouter::new(config.shard_count),
            config,
            scheduler: TaskScheduler::new(),
            start_timers: DashMap::new(),
            admin_token: admin_token.filter(|token| !token.is_empty()),
        })
    }

    /// Construct a state with `store` already installed.
    pub async fn with_store(config: AppConfig, store: Arc<dyn TournamentStore>) -> SharedState {
        let state = Self::new(config, None);
        state.set_store(store).await;
        state
    }

    /// Obtain the installed store or fail with [`ServiceError::Degraded`].
    pub async fn require_store(&self) -> Result<Arc<dyn TournamentStore>, ServiceError> {
        let guard = self.store.read().await;
        guard.as_ref().cloned().ok_or(ServiceError::Degraded)
    }

    /// Install a new store implementation and leave degraded mode.
    pub async fn set_store(&self, store: Arc<dyn TournamentStore>) {
        {
            let mut guard = self.store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false).await;
    }

    /// Remove the current store and enter degraded mode.
    pub async fn clear_store(&self) {
        {
            let mut guard = self.store.write().await;
            guard.take();
        }
        self.update_degraded(true).await;
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        let installed = self.store.read().await.is_some();
        !installed || *self.degraded.borrow()
    }

    /// Update the degraded flag when the value changes.
    pub async fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Shard routing for tournament documents.
    pub fn shards(&self) -> &ShardRouter {
        &self.shards
    }

    /// Timers for auto-start and bot results.
    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    /// Pending auto-start timer of each tournament scheduled by this process.
    pub fn start_timers(&self) -> &DashMap<Uuid, TaskId> {
        &self.start_timers
    }

    /// Token expected in `X-Admin-Token`; admin routes are open when unset.
    pub fn admin_token(&self) -> Option<&str> {
        self.admin_token.as_deref()
    }
}
