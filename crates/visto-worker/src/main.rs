// Visto sweeper worker
//
// Runs the timeout sweeper against the shared database. Safe to run alongside
// the API and alongside other sweeper replicas.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use visto_core::{
    ActionExecutor, ApprovalGateway, ApproverResolver, DefinitionStore, EntityResolver,
    HistoryStore, InstanceStore,
};
use visto_storage::Database;
use visto_worker::collaborators::{
    FileDirectoryResolver, LoggingActionExecutor, SnapshotEntityResolver,
};
use visto_worker::{Sweeper, SweeperConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "visto_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    tracing::info!("visto-worker starting...");

    let database_url =
        std::env::var("DATABASE_URL").context("DATABASE_URL environment variable required")?;
    let db = Database::from_url(&database_url)
        .await
        .context("Failed to connect to database")?;
    visto_storage::MIGRATOR
        .run(db.pool())
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Connected to database, migrations applied");

    let db = Arc::new(db);
    let instance_store: Arc<dyn InstanceStore> = db.clone();
    let definition_store: Arc<dyn DefinitionStore> = db.clone();
    let history_store: Arc<dyn HistoryStore> = db.clone();

    let entities: Arc<dyn EntityResolver> =
        Arc::new(SnapshotEntityResolver::new(instance_store.clone()));
    let approvers: Arc<dyn ApproverResolver> = Arc::new(
        FileDirectoryResolver::from_env().context("Failed to load approver directory")?,
    );
    let actions: Arc<dyn ActionExecutor> = Arc::new(LoggingActionExecutor);

    let gateway = Arc::new(ApprovalGateway::new(
        definition_store,
        instance_store,
        history_store,
        entities,
        approvers,
        actions,
    ));

    let config = SweeperConfig::from_env();
    tracing::info!(interval_seconds = config.interval.as_secs(), "Sweeper configured");

    let sweeper = Sweeper::new(gateway, config);
    let shutdown = sweeper.shutdown_handle();

    let handle = tokio::spawn(sweeper.run());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");
    shutdown.send(true).ok();

    handle.await.context("Sweeper task panicked")??;
    tracing::info!("Worker shutdown complete");
    Ok(())
}
