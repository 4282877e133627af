//! SeaORM-backed storage adapters that satisfy the domain storage and queue
//! traits while keeping the database backend swappable (SQLite by default,
//! PostgreSQL via feature flag).

mod builder;
mod codec;
mod config_store;
mod entity;
mod migration;
mod order_store;
mod queue;

use std::sync::Arc;
use std::time::Duration;

use builder::StorageBuilder;
use migration::run_migrations;
use order_indexer_domain::storage::{StorageError, StorageResult};
use sea_orm::{Database, DatabaseConnection};

pub use queue::SeaOrmQueue;

/// Shared storage handle used by every indexer subcommand.
#[derive(Clone)]
pub struct SeaOrmStorage {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmStorage {
    /// Connects to the provided database URL and ensures the schema is present.
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        let db = Database::connect(database_url)
            .await
            .map_err(StorageError::from_source)?;
        run_migrations(&db).await?;
        Ok(Self { db: Arc::new(db) })
    }

    pub fn builder() -> StorageBuilder {
        StorageBuilder::new()
    }

    pub(crate) fn from_connection(db: DatabaseConnection) -> Self {
        Self { db: Arc::new(db) }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        self.db.as_ref()
    }

    /// Table-backed queue sharing this connection pool.
    pub fn queue(&self, visibility_timeout: Duration) -> SeaOrmQueue {
        SeaOrmQueue::new(Arc::clone(&self.db), visibility_timeout)
    }
}
