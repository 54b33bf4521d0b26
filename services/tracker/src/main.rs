use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod live;
mod routes;
mod state;
mod telegram;

use common::database::{DatabaseConfig, init_pool};
use tracking::{
    Broadcaster, DashboardQuery, IngestionPipeline, LinkTemplate, LocationLedger, MemoryStore,
    PgStore, PromptRegistry, SessionStore, TrackingSessionManager,
};

use crate::{
    config::{AppConfig, StorageBackend},
    state::AppState,
    telegram::{BotDispatcher, TelegramClient},
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    info!("Starting driver tracking service");
    config.validate()?;
    config.log_summary();

    let (sessions, ledger) = open_storage(config.storage_backend).await?;

    let client = TelegramClient::new(&config.telegram_api_url, &config.telegram_bot_token)?;
    let broadcaster = Broadcaster::new(config.broadcast_capacity);
    let prompts = PromptRegistry::new(Arc::new(client.clone()), config.prompt_interval());
    let manager = TrackingSessionManager::new(
        sessions.clone(),
        prompts,
        LinkTemplate::new(&config.telegram_bot_username),
    );
    let ingestion = IngestionPipeline::new(sessions.clone(), ledger.clone(), broadcaster.clone());
    let query = DashboardQuery::new(sessions, ledger);

    let shutdown = CancellationToken::new();
    let poller = tokio::spawn(
        BotDispatcher::new(client, manager.clone(), ingestion).run(shutdown.child_token()),
    );

    let app_state = AppState {
        sessions: manager.clone(),
        query,
        broadcaster,
    };
    let app = routes::create_router(app_state);

    let address = config.bind_address();
    let listener = TcpListener::bind(&address).await?;
    info!("Tracker listening on {}", address);

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down driver tracking service");
            server_shutdown.cancel();
        })
        .await?;

    shutdown.cancel();
    manager.shutdown().await;
    if let Err(e) = poller.await {
        warn!("Telegram poller ended abnormally: {}", e);
    }

    info!("Driver tracking service stopped");
    Ok(())
}

async fn open_storage(
    backend: StorageBackend,
) -> Result<(Arc<dyn SessionStore>, Arc<dyn LocationLedger>)> {
    match backend {
        StorageBackend::Postgres => {
            let db_config = DatabaseConfig::from_env()?;
            let pool = init_pool(&db_config).await?;

            if common::database::health_check(&pool).await {
                info!("Database connection successful");
            } else {
                anyhow::bail!("Failed to connect to database");
            }

            let store = PgStore::new(pool);
            store.ensure_schema().await?;
            let sessions: Arc<dyn SessionStore> = Arc::new(store.clone());
            let ledger: Arc<dyn LocationLedger> = Arc::new(store);
            Ok((sessions, ledger))
        }
        StorageBackend::Memory => {
            warn!("Using in-memory storage, data is lost on restart");
            let store = MemoryStore::new();
            let sessions: Arc<dyn SessionStore> = Arc::new(store.clone());
            let ledger: Arc<dyn LocationLedger> = Arc::new(store);
            Ok((sessions, ledger))
        }
    }
}
