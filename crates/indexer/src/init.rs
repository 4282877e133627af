use order_indexer_domain::model::InitOutcome;
use order_indexer_domain::storage::{ConfigStore, StorageResult};
use tracing::info;

/// Seeds the scanner cursor at `start_block`. Safe to run repeatedly: an
/// initialized database is left untouched.
pub async fn init_db<S>(store: &S, start_block: u64) -> StorageResult<InitOutcome>
where
    S: ConfigStore + ?Sized,
{
    let outcome = store.initialize_defaults(start_block).await?;
    match outcome {
        InitOutcome::Seeded => info!(start_block, "database initialized"),
        InitOutcome::AlreadyInitialized => info!("database already initialized; nothing to do"),
    }
    Ok(outcome)
}
