//! tourney-back binary entrypoint wiring the REST surface, the storage supervisor and the store backends.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use futures::{FutureExt, future::BoxFuture};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tourney_back::{
    config::AppConfig,
    dao::{
        storage::StorageError,
        tournament_store::{MemoryTournamentStore, TournamentStore},
    },
    routes,
    services::storage_supervisor,
    state::{AppState, SharedState},
};

const ADMIN_TOKEN_ENV: &str = "TOURNEY_ADMIN_TOKEN";

/// Which store backend the server runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreBackend {
    Memory,
    #[cfg(feature = "mongo-store")]
    Mongo,
}

impl StoreBackend {
    /// `STORE_BACKEND` wins; otherwise MongoDB is used whenever `MONGO_URI` is set.
    fn from_env() -> anyhow::Result<Self> {
        match env::var("STORE_BACKEND").ok().as_deref() {
            Some("memory") => Ok(StoreBackend::Memory),
            #[cfg(feature = "mongo-store")]
            Some("mongo") => Ok(StoreBackend::Mongo),
            Some(other) => anyhow::bail!("unsupported STORE_BACKEND `{other}`"),
            #[cfg(feature = "mongo-store")]
            None if env::var_os("MONGO_URI").is_some() => Ok(StoreBackend::Mongo),
            None => Ok(StoreBackend::Memory),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let backend = StoreBackend::from_env()?;
    let admin_token = env::var(ADMIN_TOKEN_ENV).ok();
    let app_state = AppState::new(config, admin_token);

    info!(?backend, "selected storage backend");
    tokio::spawn(storage_supervisor::run(
        app_state.clone(),
        connector(backend, &app_state),
    ));

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

type Connect = BoxFuture<'static, Result<Arc<dyn TournamentStore>, StorageError>>;

/// Connection factory handed to the storage supervisor.
fn connector(
    backend: StoreBackend,
    state: &SharedState,
) -> impl FnMut() -> Connect + Send + 'static {
    #[cfg(feature = "mongo-store")]
    let shard_count = state.config().shard_count;
    #[cfg(not(feature = "mongo-store"))]
    let _ = state;
    // A single in-memory store survives supervisor reconnects.
    let memory = MemoryTournamentStore::new();

    move || -> Connect {
        match backend {
            StoreBackend::Memory => {
                let store = memory.clone();
                async move { Ok(Arc::new(store) as Arc<dyn TournamentStore>) }.boxed()
            }
            #[cfg(feature = "mongo-store")]
            StoreBackend::Mongo => async move {
                use tourney_back::dao::tournament_store::mongodb::{
                    MongoConfig, MongoTournamentStore,
                };

                let config = MongoConfig::from_env(shard_count).await?;
                let store = MongoTournamentStore::connect(config).await?;
                Ok(Arc::new(store) as Arc<dyn TournamentStore>)
            }
            .boxed(),
        }
    }
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
