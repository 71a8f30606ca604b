mod accounts;
mod api;
mod config;
mod db;
mod error;
mod mail;
mod migration;
mod publish;
mod store;
mod sync;
#[cfg(test)]
mod testing;

use sea_orm_migration::MigratorTrait;
use std::sync::Arc;

use accounts::{DbAccountStore, PassthroughVault};
use api::AppState;
use config::AppConfig;
use mail::connector::ImapConnector;
use publish::TopicHub;
use store::blob::{BlobStore, FsBlobStore};
use store::DbIngestionStore;
use sync::orchestrator::SyncOrchestrator;
use sync::scheduler::SyncScheduler;

/// Buffered events per topic before slow subscribers start losing the oldest
const TOPIC_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = AppConfig::from_env()?;
    tracing::info!("mailsync starting...");
    tracing::info!("Server: {}:{}", config.server.host, config.server.port);
    tracing::info!(
        "Sync: {} worker(s), {}ms between fetches, topic '{}'",
        config.sync.workers,
        config.sync.fetch_interval_ms,
        config.sync.topic
    );

    tokio::fs::create_dir_all(&config.storage.attachments_dir).await?;

    // Connect to database
    let db = db::connect(&config.database.url).await?;

    // Run migrations
    migration::Migrator::up(&db, None).await?;
    tracing::info!("Database migrations complete");

    let accounts = Arc::new(DbAccountStore::new(db.clone()));
    let connector = Arc::new(ImapConnector::new(
        config.mail.clone(),
        Arc::new(PassthroughVault),
    ));
    let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(&config.storage.attachments_dir));
    let store = Arc::new(DbIngestionStore::new(db, blobs.clone()));
    let hub = Arc::new(TopicHub::new(TOPIC_CAPACITY, config.sync.greeting.clone()));

    let orchestrator = Arc::new(SyncOrchestrator::new(
        accounts.clone(),
        connector,
        store.clone(),
        hub.clone(),
        config.sync.clone(),
    ));
    let scheduler = Arc::new(SyncScheduler::start(
        orchestrator,
        config.sync.workers,
        config.sync.queue_capacity,
    ));

    let state = AppState {
        accounts,
        store,
        blobs,
        scheduler: scheduler.clone(),
        hub,
        sync: config.sync.clone(),
    };
    let app = api::build_router(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("mailsync API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested, draining sync workers");
}
