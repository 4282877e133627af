use async_trait::async_trait;
use chrono::Utc;
use order_indexer_domain::model::{
    Cursor, EventKind, InitOutcome, ReindexPlan, RewindSummary, CURRENT_BLOCK_HEIGHT_KEY,
    INITIALIZATION_BLOCK_KEY, INITIALIZED_MARKER_KEY, UPDATED_AT_KEY,
};
use order_indexer_domain::storage::{
    ConfigStore, CursorStore, ReindexStore, StorageError, StorageResult,
};
use sea_orm::{
    sea_query::OnConflict, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QuerySelect, Set, TransactionTrait,
};
use tracing::debug;

use crate::codec::{height_to_db, parse_height};
use crate::entity::{applied_events, config, orders};
use crate::SeaOrmStorage;

async fn read_config<C: ConnectionTrait>(conn: &C, key: &str) -> StorageResult<Option<String>> {
    let maybe = config::Entity::find_by_id(key.to_string())
        .one(conn)
        .await
        .map_err(StorageError::from_source)?;
    Ok(maybe.map(|model| model.value))
}

async fn upsert_config<C: ConnectionTrait>(conn: &C, key: &str, value: &str) -> StorageResult<()> {
    let active = config::ActiveModel {
        key: Set(key.to_string()),
        value: Set(value.to_string()),
    };
    config::Entity::insert(active)
        .on_conflict(
            OnConflict::column(config::Column::Key)
                .update_column(config::Column::Value)
                .to_owned(),
        )
        .exec_without_returning(conn)
        .await
        .map_err(StorageError::from_source)?;
    Ok(())
}

/// Writes the cursor together with its `updateAt` stamp.
async fn write_current_height<C: ConnectionTrait>(conn: &C, height: u64) -> StorageResult<()> {
    upsert_config(conn, CURRENT_BLOCK_HEIGHT_KEY, &height.to_string()).await?;
    upsert_config(conn, UPDATED_AT_KEY, &Utc::now().to_rfc3339()).await
}

#[async_trait]
impl ConfigStore for SeaOrmStorage {
    async fn get_config(&self, key: &str) -> StorageResult<Option<String>> {
        read_config(self.connection(), key).await
    }

    async fn set_config(&self, key: &str, value: &str) -> StorageResult<()> {
        upsert_config(self.connection(), key, value).await
    }

    async fn initialize_defaults(&self, start_block: u64) -> StorageResult<InitOutcome> {
        let txn = self
            .connection()
            .begin()
            .await
            .map_err(StorageError::from_source)?;

        if read_config(&txn, INITIALIZED_MARKER_KEY).await?.is_some() {
            txn.commit().await.map_err(StorageError::from_source)?;
            debug!("database already initialized");
            return Ok(InitOutcome::AlreadyInitialized);
        }

        upsert_config(&txn, INITIALIZATION_BLOCK_KEY, &start_block.to_string()).await?;
        write_current_height(&txn, start_block).await?;
        upsert_config(&txn, INITIALIZED_MARKER_KEY, "true").await?;
        txn.commit().await.map_err(StorageError::from_source)?;

        debug!(start_block, "config defaults seeded");
        Ok(InitOutcome::Seeded)
    }
}

#[async_trait]
impl CursorStore for SeaOrmStorage {
    async fn load_cursor(&self) -> StorageResult<Option<Cursor>> {
        let conn = self.connection();
        let initialization = read_config(conn, INITIALIZATION_BLOCK_KEY).await?;
        let current = read_config(conn, CURRENT_BLOCK_HEIGHT_KEY).await?;

        let (Some(initialization), Some(current)) = (initialization, current) else {
            return Ok(None);
        };

        Ok(Some(Cursor {
            initialization_block: parse_height(INITIALIZATION_BLOCK_KEY, &initialization)?,
            current_block_height: parse_height(CURRENT_BLOCK_HEIGHT_KEY, &current)?,
        }))
    }

    async fn save_current_block_height(&self, height: u64) -> StorageResult<()> {
        write_current_height(self.connection(), height).await
    }
}

#[async_trait]
impl ReindexStore for SeaOrmStorage {
    async fn rewind(&self, plan: ReindexPlan) -> StorageResult<RewindSummary> {
        let txn = self
            .connection()
            .begin()
            .await
            .map_err(StorageError::from_source)?;

        let summary = match plan {
            ReindexPlan::FullReset { .. } => {
                let orders = orders::Entity::delete_many()
                    .exec(&txn)
                    .await
                    .map_err(StorageError::from_source)?;
                let ledger = applied_events::Entity::delete_many()
                    .exec(&txn)
                    .await
                    .map_err(StorageError::from_source)?;
                RewindSummary {
                    orders_deleted: orders.rows_affected,
                    ledger_entries_deleted: ledger.rows_affected,
                    orphaned_orders: 0,
                }
            }
            ReindexPlan::Rewind {
                from_block,
                to_block,
            } => {
                let from = height_to_db(from_block)?;
                let to = height_to_db(to_block)?;
                let orphaned_orders = count_orphaned(&txn, from, to).await?;
                let orders = orders::Entity::delete_many()
                    .filter(orders::Column::CreatedAtBlockNumber.between(from, to))
                    .exec(&txn)
                    .await
                    .map_err(StorageError::from_source)?;
                let ledger = applied_events::Entity::delete_many()
                    .filter(applied_events::Column::BlockNumber.gte(from))
                    .exec(&txn)
                    .await
                    .map_err(StorageError::from_source)?;
                RewindSummary {
                    orders_deleted: orders.rows_affected,
                    ledger_entries_deleted: ledger.rows_affected,
                    orphaned_orders,
                }
            }
        };

        write_current_height(&txn, plan.current_block_height()).await?;
        txn.commit().await.map_err(StorageError::from_source)?;
        Ok(summary)
    }
}

/// Orders in the rewind window that were placed before `from`.
async fn count_orphaned<C: ConnectionTrait>(conn: &C, from: i64, to: i64) -> StorageResult<u64> {
    let doomed: Vec<String> = orders::Entity::find()
        .select_only()
        .column(orders::Column::OrderId)
        .filter(orders::Column::CreatedAtBlockNumber.between(from, to))
        .into_tuple()
        .all(conn)
        .await
        .map_err(StorageError::from_source)?;
    if doomed.is_empty() {
        return Ok(0);
    }
    applied_events::Entity::find()
        .filter(applied_events::Column::OrderId.is_in(doomed))
        .filter(applied_events::Column::EventKind.eq(EventKind::OrderPlaced.to_string()))
        .filter(applied_events::Column::BlockNumber.lt(from))
        .count(conn)
        .await
        .map_err(StorageError::from_source)
}
