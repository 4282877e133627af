use std::time::Duration;

use order_indexer_domain::storage::{StorageError, StorageResult};
use sea_orm::{ConnectOptions, Database};

use crate::{migration::run_migrations, SeaOrmStorage};

#[derive(Default)]
pub struct StorageBuilder {
    database_url: Option<String>,
    max_connections: Option<u32>,
    connect_timeout: Option<Duration>,
    sqlx_logging: bool,
}

impl StorageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = Some(max);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Statement-level logging from sqlx; off by default.
    pub fn sqlx_logging(mut self, enabled: bool) -> Self {
        self.sqlx_logging = enabled;
        self
    }

    pub async fn build(self) -> StorageResult<SeaOrmStorage> {
        let url = self
            .database_url
            .ok_or_else(|| StorageError::Database("missing database url".into()))?;

        let mut options = ConnectOptions::new(url);
        options.sqlx_logging(self.sqlx_logging);
        if let Some(max) = self.max_connections {
            options.max_connections(max);
        }
        if let Some(timeout) = self.connect_timeout {
            options.connect_timeout(timeout);
        }

        let db = Database::connect(options)
            .await
            .map_err(StorageError::from_source)?;
        run_migrations(&db).await?;
        Ok(SeaOrmStorage::from_connection(db))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use order_indexer_domain::storage::ConfigStore;

    #[tokio::test]
    async fn build_requires_a_database_url() {
        let err = StorageBuilder::new().build().await.err().unwrap();
        assert_eq!(err, StorageError::Database("missing database url".into()));
    }

    #[tokio::test]
    async fn build_runs_migrations() {
        let storage = StorageBuilder::new()
            .database_url("sqlite::memory:")
            .sqlx_logging(false)
            .build()
            .await
            .unwrap();
        assert_eq!(storage.get_config("anything").await.unwrap(), None);
    }
}
