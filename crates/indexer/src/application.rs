//! Subcommand wiring: loads configuration, connects storage and the RPC pool,
//! and drives each component until it finishes or the process is signalled.

use order_indexer_domain::config::{ConfigError, IndexerConfig, StoreConfig};
use order_indexer_domain::model::InitOutcome;
use order_indexer_domain::services::telemetry::TelemetryError;
use order_indexer_domain::storage::{StorageError, StorageResult};
use order_indexer_storage::SeaOrmStorage;
use thiserror::Error;
use tracing::{info, warn};

use crate::decoder::MarketAbiDecoder;
use crate::init::init_db;
use crate::notifier::Notifier;
use crate::processor::Processor;
use crate::reindex::{ReindexError, ReindexReport, Reindexer};
use crate::rpc::{HttpChainClient, PoolStatus, ProviderConfig, RetryConfig, RpcError, RpcPool};
use crate::scanner::{ScanError, Scanner};

#[derive(Debug, Error)]
pub enum CliError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("rpc client error: {0}")]
    Rpc(#[from] RpcError),
    #[error("scanner stopped: {0}")]
    Scan(#[from] ScanError),
    #[error("reindex failed: {0}")]
    Reindex(#[from] ReindexError),
    #[error("cannot render output: {0}")]
    Json(#[from] serde_json::Error),
}

/// One pool entry per configured URL, with ids `rpc-0`, `rpc-1`, ...
pub fn build_pool(config: &IndexerConfig) -> Result<RpcPool<HttpChainClient>, RpcError> {
    let settings = config.rpc();
    let providers = config
        .rpc_urls()
        .iter()
        .enumerate()
        .map(|(index, url)| {
            let client = HttpChainClient::new(url.as_str(), settings.request_timeout)?;
            Ok(ProviderConfig::new(format!("rpc-{index}"), url.as_str(), client))
        })
        .collect::<Result<Vec<_>, RpcError>>()?;
    Ok(RpcPool::new(
        providers,
        RetryConfig::from(settings),
        settings.max_errors,
    ))
}

pub async fn connect_storage(database_url: &str) -> StorageResult<SeaOrmStorage> {
    SeaOrmStorage::builder()
        .database_url(database_url)
        .sqlx_logging(false)
        .build()
        .await
}

pub async fn run_init_db() -> Result<InitOutcome, CliError> {
    let config = StoreConfig::load_from_env()?;
    let storage = connect_storage(config.database_url()).await?;
    Ok(init_db(&storage, config.initialization_block()).await?)
}

pub async fn run_scanner() -> Result<(), CliError> {
    let config = IndexerConfig::load_from_env()?;
    let storage = connect_storage(config.database_url()).await?;
    let queue = storage.queue(config.store().processor().visibility_timeout);
    let pool = build_pool(&config)?;
    let _probe = pool.spawn_health_probe(config.rpc().health_check_interval);

    let mut scanner = Scanner::new(
        pool,
        MarketAbiDecoder::new(),
        storage,
        queue,
        config.contract_address(),
        *config.scanner(),
        config.store().processor().max_attempts,
    );
    tokio::select! {
        result = scanner.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("scanner interrupted; shutting down"),
    }
    Ok(())
}

pub async fn run_processor() -> Result<(), CliError> {
    let config = StoreConfig::load_from_env()?;
    let settings = *config.processor();
    let storage = connect_storage(config.database_url()).await?;
    let queue = storage.queue(settings.visibility_timeout);

    let processor = Processor::new(storage, queue, settings);
    tokio::select! {
        _ = processor.run() => {}
        _ = tokio::signal::ctrl_c() => info!("processor interrupted; shutting down"),
    }
    Ok(())
}

pub async fn run_notifier() -> Result<(), CliError> {
    let config = StoreConfig::load_from_env()?;
    let settings = config.processor();
    let storage = connect_storage(config.database_url()).await?;

    let notifier = Notifier::new(storage.queue(settings.visibility_timeout), settings.poll_interval);
    tokio::select! {
        _ = notifier.run() => {}
        _ = tokio::signal::ctrl_c() => info!("notifier interrupted; shutting down"),
    }
    Ok(())
}

pub async fn run_reindex(height: u64) -> Result<ReindexReport, CliError> {
    let config = IndexerConfig::load_from_env()?;
    let storage = connect_storage(config.database_url()).await?;
    let queue = storage.queue(config.store().processor().visibility_timeout);
    let reindexer = Reindexer::new(build_pool(&config)?, storage, queue);
    Ok(reindexer.reindex(height).await?)
}

/// Probes every provider once, then reports the pool snapshot.
pub async fn run_rpc_status() -> Result<PoolStatus, CliError> {
    let config = IndexerConfig::load_from_env()?;
    let pool = build_pool(&config)?;
    pool.health_check().await;
    let status = pool.status();
    if status.active == 0 {
        warn!(total = status.total, "no rpc provider is reachable");
    }
    Ok(status)
}
