use async_trait::async_trait;
use chrono::Utc;
use order_indexer_domain::model::{self, EventKey, EventMeta, Order, OrderEvent, OrderId};
use order_indexer_domain::storage::{ApplyOutcome, OrderStore, StorageError, StorageResult};
use sea_orm::{sea_query::OnConflict, EntityTrait, Set, TransactionTrait};
use tracing::debug;

use crate::codec::{height_to_db, order_from_model, order_to_active};
use crate::entity::{applied_events, orders};
use crate::SeaOrmStorage;

#[async_trait]
impl OrderStore for SeaOrmStorage {
    async fn find_order(&self, order_id: &OrderId) -> StorageResult<Option<Order>> {
        let maybe = orders::Entity::find_by_id(order_id.to_string())
            .one(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        maybe.map(order_from_model).transpose()
    }

    async fn apply_event(
        &self,
        event: &OrderEvent,
        meta: EventMeta,
    ) -> StorageResult<ApplyOutcome> {
        let Some(order_id) = event.order_id() else {
            return Ok(ApplyOutcome::Ignored);
        };
        let key = EventKey::new(order_id, event.kind(), meta).to_string();

        let txn = self
            .connection()
            .begin()
            .await
            .map_err(StorageError::from_source)?;

        let seen = applied_events::Entity::find_by_id(key.clone())
            .one(&txn)
            .await
            .map_err(StorageError::from_source)?;
        if seen.is_some() {
            txn.rollback().await.map_err(StorageError::from_source)?;
            debug!(event_key = %key, "event already applied");
            return Ok(ApplyOutcome::Duplicate);
        }

        let current = orders::Entity::find_by_id(order_id.to_string())
            .one(&txn)
            .await
            .map_err(StorageError::from_source)?
            .map(order_from_model)
            .transpose()?;

        let next = match model::apply_event(current, event, meta.block_number) {
            Ok(Some(order)) => order,
            Ok(None) => {
                txn.rollback().await.map_err(StorageError::from_source)?;
                return Ok(ApplyOutcome::Ignored);
            }
            Err(err) => {
                txn.rollback().await.map_err(StorageError::from_source)?;
                return Ok(ApplyOutcome::Rejected(err));
            }
        };

        orders::Entity::insert(order_to_active(&next)?)
            .on_conflict(
                OnConflict::column(orders::Column::OrderId)
                    .update_columns([
                        orders::Column::AmountRemaining,
                        orders::Column::PricePerToken,
                        orders::Column::MinOrderSize,
                        orders::Column::IsActive,
                        orders::Column::CreatedAtBlockNumber,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&txn)
            .await
            .map_err(StorageError::from_source)?;

        let ledger = applied_events::ActiveModel {
            event_key: Set(key),
            order_id: Set(order_id.to_string()),
            event_kind: Set(event.kind().to_string()),
            block_number: Set(height_to_db(meta.block_number)?),
            applied_at: Set(Utc::now()),
        };
        applied_events::Entity::insert(ledger)
            .exec_without_returning(&txn)
            .await
            .map_err(StorageError::from_source)?;

        txn.commit().await.map_err(StorageError::from_source)?;
        Ok(ApplyOutcome::Applied(next))
    }
}
