//! Ledgerhouse engine entrypoint.
//!
//! Wires configuration → store → components, starts the periodic worker
//! cycle, and kicks off the startup index builds in the background. The HTTP
//! surface lives in a separate collaborator process; this binary only owns
//! the warehouse.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ledgerhouse_config::EngineConfig;
use ledgerhouse_core::aggregations::Aggregations;
use ledgerhouse_core::decode::FramedGzDecoder;
use ledgerhouse_core::files::FileIndex;
use ledgerhouse_core::governance::VoteRequestIndexer;
use ledgerhouse_core::ingest::Ingestor;
use ledgerhouse_core::store::AnalyticStore;
use ledgerhouse_core::supervisor::IndexerSupervisor;
use ledgerhouse_core::template_index::{TemplateFileIndex, TemplateIndexConfig};
use ledgerhouse_core::worker::EngineWorker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = EngineConfig::from_env().context("loading engine configuration")?;
    info!(
        "starting ledgerhouse engine (data dir {}, cycle every {:?})",
        config.paths.root().display(),
        config.cycle_interval
    );

    let store = AnalyticStore::open(config.paths.db_path())
        .await
        .context("opening analytic store")?;

    let supervisor = IndexerSupervisor::new();
    let decoder = Arc::new(FramedGzDecoder::new());
    let file_index = FileIndex::new(store.clone(), config.paths.clone());
    let ingestor = Ingestor::new(
        store.clone(),
        file_index.clone(),
        config.paths.clone(),
        decoder,
    );
    let aggregations = Aggregations::new(store.clone());
    let template_index = TemplateFileIndex::new(
        store.clone(),
        config.paths.clone(),
        TemplateIndexConfig::from_engine(&config),
    );
    let vote_indexer = VoteRequestIndexer::new(
        store.clone(),
        config.paths.clone(),
        template_index.clone(),
        Arc::clone(&supervisor),
    );

    let worker = Arc::new(EngineWorker::new(
        config,
        store,
        file_index,
        ingestor,
        aggregations,
        template_index,
        vote_indexer,
        Arc::clone(&supervisor),
    ));

    // Long-running builds are background tasks, outside cycle deadlines.
    let startup_worker = Arc::clone(&worker);
    let startup_builds = tokio::spawn(async move {
        startup_worker.run_startup_builds().await;
    });

    let cycle_loop = Arc::clone(&worker).spawn();

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("shutting down ledgerhouse engine");
    cycle_loop.abort();
    startup_builds.abort();
    Ok(())
}
