use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::B256;
use async_trait::async_trait;
use chrono::Utc;
use order_indexer_domain::model::{Delivery, EventKind, EventMeta, QueueMessage, QueueName};
use order_indexer_domain::storage::{QueueError, QueueResult, QueueTransport};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use tracing::{debug, warn};

use crate::entity::queue_messages;

/// Claims lost to a concurrent consumer before `receive` gives up for this poll.
const CLAIM_ATTEMPTS: usize = 3;

/// Durable queue stored in the `queue_messages` table.
///
/// A received row stays in the table with `available_at` pushed forward by the
/// visibility timeout; if the consumer dies before acknowledging, the row
/// becomes claimable again.
#[derive(Clone)]
pub struct SeaOrmQueue {
    db: Arc<DatabaseConnection>,
    visibility_timeout: Duration,
}

impl SeaOrmQueue {
    pub(crate) fn new(db: Arc<DatabaseConnection>, visibility_timeout: Duration) -> Self {
        Self {
            db,
            visibility_timeout,
        }
    }

    fn connection(&self) -> &DatabaseConnection {
        self.db.as_ref()
    }

    /// Number of rows currently stored under `queue`, claimed or not.
    pub async fn depth(&self, queue: &str) -> QueueResult<u64> {
        queue_messages::Entity::find()
            .filter(queue_messages::Column::Queue.eq(queue))
            .count(self.connection())
            .await
            .map_err(QueueError::from_source)
    }

    /// Oldest dead-lettered rows for `queue`, with their recorded error.
    pub async fn dead_letters(
        &self,
        queue: QueueName,
        limit: u64,
    ) -> QueueResult<Vec<(QueueMessage, Option<String>)>> {
        let rows = queue_messages::Entity::find()
            .filter(queue_messages::Column::Queue.eq(queue.dead_letter()))
            .order_by_asc(queue_messages::Column::Id)
            .paginate(self.connection(), limit.max(1))
            .fetch_page(0)
            .await
            .map_err(QueueError::from_source)?;
        rows.into_iter()
            .map(|row| {
                let reason = row.last_error.clone();
                message_from_row(row).map(|message| (message, reason))
            })
            .collect()
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn to_db<T: TryInto<i64>>(field: &str, value: T) -> QueueResult<i64> {
    value
        .try_into()
        .map_err(|_| QueueError::Encode(format!("{field} exceeds i64")))
}

fn corrupt(row: i64, err: impl std::fmt::Display) -> QueueError {
    QueueError::Storage(format!("corrupt queue row {row}: {err}"))
}

fn message_to_row(
    queue: &str,
    message: &QueueMessage,
    available_at: i64,
) -> QueueResult<queue_messages::ActiveModel> {
    let payload = serde_json::to_string(message.payload())
        .map_err(|err| QueueError::Encode(err.to_string()))?;
    Ok(queue_messages::ActiveModel {
        queue: Set(queue.to_string()),
        event_kind: Set(message.event_kind().to_string()),
        payload: Set(payload),
        block_number: Set(to_db("block_number", message.block_number())?),
        transaction_hash: Set(message.transaction_hash().to_string()),
        log_index: Set(to_db("log_index", message.meta().log_index)?),
        attempt_count: Set(i32::try_from(message.attempt_count()).unwrap_or(i32::MAX)),
        max_attempts: Set(i32::try_from(message.max_attempts()).unwrap_or(i32::MAX)),
        first_seen_at: Set(message.first_seen_at()),
        available_at: Set(available_at),
        last_error: Set(None),
        ..Default::default()
    })
}

fn message_from_row(row: queue_messages::Model) -> QueueResult<QueueMessage> {
    let id = row.id;
    let event_kind = EventKind::from_str(&row.event_kind).map_err(|err| corrupt(id, err))?;
    let payload = serde_json::from_str(&row.payload).map_err(|err| corrupt(id, err))?;
    let meta = EventMeta {
        block_number: u64::try_from(row.block_number).map_err(|err| corrupt(id, err))?,
        transaction_hash: B256::from_str(&row.transaction_hash).map_err(|err| corrupt(id, err))?,
        log_index: u64::try_from(row.log_index).map_err(|err| corrupt(id, err))?,
    };
    let max_attempts = u32::try_from(row.max_attempts).map_err(|err| corrupt(id, err))?;
    let attempt_count = u32::try_from(row.attempt_count).map_err(|err| corrupt(id, err))?;

    Ok(QueueMessage::new(event_kind, payload, meta, max_attempts)
        .with_delivery_state(attempt_count, row.first_seen_at))
}

#[async_trait]
impl QueueTransport for SeaOrmQueue {
    async fn publish(&self, queue: QueueName, message: &QueueMessage) -> QueueResult<()> {
        message_to_row(queue.as_str(), message, now_millis())?
            .insert(self.connection())
            .await
            .map_err(QueueError::from_source)?;
        Ok(())
    }

    async fn receive(&self, queue: QueueName) -> QueueResult<Option<Delivery>> {
        for _ in 0..CLAIM_ATTEMPTS {
            let now = now_millis();
            let candidate = queue_messages::Entity::find()
                .filter(queue_messages::Column::Queue.eq(queue.as_str()))
                .filter(queue_messages::Column::AvailableAt.lte(now))
                .order_by_asc(queue_messages::Column::Id)
                .one(self.connection())
                .await
                .map_err(QueueError::from_source)?;
            let Some(row) = candidate else {
                return Ok(None);
            };

            // Compare-and-set on the observed `available_at` so two consumers
            // cannot claim the same row.
            let claimed = queue_messages::Entity::update_many()
                .col_expr(
                    queue_messages::Column::AvailableAt,
                    Expr::value(now.saturating_add(millis(self.visibility_timeout))),
                )
                .filter(queue_messages::Column::Id.eq(row.id))
                .filter(queue_messages::Column::AvailableAt.eq(row.available_at))
                .exec(self.connection())
                .await
                .map_err(QueueError::from_source)?;
            if claimed.rows_affected == 0 {
                debug!(queue = queue.as_str(), id = row.id, "lost claim race");
                continue;
            }

            let tag = row.id;
            let message = message_from_row(row)?;
            return Ok(Some(Delivery {
                tag,
                queue,
                message,
            }));
        }
        Ok(None)
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        let deleted = queue_messages::Entity::delete_by_id(delivery.tag)
            .exec(self.connection())
            .await
            .map_err(QueueError::from_source)?;
        if deleted.rows_affected == 0 {
            warn!(
                queue = delivery.queue.as_str(),
                tag = delivery.tag,
                "ack for a message that is already gone"
            );
        }
        Ok(())
    }

    async fn requeue(
        &self,
        delivery: &Delivery,
        next: &QueueMessage,
        delay_ms: u64,
    ) -> QueueResult<()> {
        let available_at = now_millis().saturating_add(to_db("delay_ms", delay_ms)?);
        let row = message_to_row(delivery.queue.as_str(), next, available_at)?;

        let txn = self
            .connection()
            .begin()
            .await
            .map_err(QueueError::from_source)?;
        let deleted = queue_messages::Entity::delete_by_id(delivery.tag)
            .exec(&txn)
            .await
            .map_err(QueueError::from_source)?;
        if deleted.rows_affected == 0 {
            txn.rollback().await.map_err(QueueError::from_source)?;
            return Err(QueueError::UnknownDelivery(delivery.tag));
        }
        row.insert(&txn).await.map_err(QueueError::from_source)?;
        txn.commit().await.map_err(QueueError::from_source)?;
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> QueueResult<()> {
        let moved = queue_messages::Entity::update_many()
            .col_expr(
                queue_messages::Column::Queue,
                Expr::value(delivery.queue.dead_letter()),
            )
            .col_expr(
                queue_messages::Column::LastError,
                Expr::value(reason.to_string()),
            )
            .filter(queue_messages::Column::Id.eq(delivery.tag))
            .exec(self.connection())
            .await
            .map_err(QueueError::from_source)?;
        if moved.rows_affected == 0 {
            return Err(QueueError::UnknownDelivery(delivery.tag));
        }
        Ok(())
    }

    async fn publish_dead_letter(
        &self,
        queue: QueueName,
        message: &QueueMessage,
        reason: &str,
    ) -> QueueResult<()> {
        let mut row = message_to_row(&queue.dead_letter(), message, now_millis())?;
        row.last_error = Set(Some(reason.to_string()));
        row.insert(self.connection())
            .await
            .map_err(QueueError::from_source)?;
        Ok(())
    }

    async fn purge_from_block(&self, queue: QueueName, block_number: u64) -> QueueResult<u64> {
        let purged = queue_messages::Entity::delete_many()
            .filter(queue_messages::Column::Queue.eq(queue.as_str()))
            .filter(queue_messages::Column::BlockNumber.gte(to_db("block_number", block_number)?))
            .exec(self.connection())
            .await
            .map_err(QueueError::from_source)?;
        Ok(purged.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SeaOrmStorage;
    use alloy_primitives::Address;
    use order_indexer_domain::model::{DecodedLog, OrderCancelled, OrderEvent, OrderId};

    async fn queue(visibility: Duration) -> SeaOrmQueue {
        SeaOrmStorage::connect("sqlite::memory:")
            .await
            .unwrap()
            .queue(visibility)
    }

    fn message(block_number: u64) -> QueueMessage {
        let decoded = DecodedLog {
            event: OrderEvent::Cancelled(OrderCancelled {
                order_id: OrderId::from(block_number),
                seller: Address::repeat_byte(0xaa),
            }),
            meta: EventMeta {
                block_number,
                transaction_hash: B256::repeat_byte(0x0f),
                log_index: 1,
            },
        };
        QueueMessage::for_event(&decoded, 3).unwrap()
    }

    #[tokio::test]
    async fn messages_are_delivered_in_publish_order() {
        let queue = queue(Duration::from_secs(30)).await;
        queue.publish(QueueName::RawEvents, &message(1)).await.unwrap();
        queue.publish(QueueName::RawEvents, &message(2)).await.unwrap();

        let first = queue.receive(QueueName::RawEvents).await.unwrap().unwrap();
        let second = queue.receive(QueueName::RawEvents).await.unwrap().unwrap();
        assert_eq!(first.message.block_number(), 1);
        assert_eq!(second.message.block_number(), 2);
        assert_eq!(first.message.decode_event().unwrap(), message(1).decode_event().unwrap());
        assert!(queue.receive(QueueName::RawEvents).await.unwrap().is_none());
        assert!(queue
            .receive(QueueName::ProcessedEvents)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn unacked_messages_reappear_after_visibility_timeout() {
        let queue = queue(Duration::ZERO).await;
        queue.publish(QueueName::RawEvents, &message(7)).await.unwrap();

        let first = queue.receive(QueueName::RawEvents).await.unwrap().unwrap();
        let again = queue.receive(QueueName::RawEvents).await.unwrap().unwrap();
        assert_eq!(first.tag, again.tag);

        queue.ack(&again).await.unwrap();
        assert!(queue.receive(QueueName::RawEvents).await.unwrap().is_none());
        assert_eq!(queue.depth(QueueName::RawEvents.as_str()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn requeue_replaces_the_envelope() {
        let queue = queue(Duration::from_secs(30)).await;
        queue.publish(QueueName::RawEvents, &message(3)).await.unwrap();
        let delivery = queue.receive(QueueName::RawEvents).await.unwrap().unwrap();

        let next = delivery.message.redelivery();
        queue.requeue(&delivery, &next, 0).await.unwrap();

        let redelivered = queue.receive(QueueName::RawEvents).await.unwrap().unwrap();
        assert_ne!(redelivered.tag, delivery.tag);
        assert_eq!(redelivered.message.attempt_count(), 1);
        assert_eq!(queue.depth(QueueName::RawEvents.as_str()).await.unwrap(), 1);

        let err = queue.requeue(&delivery, &next, 0).await.unwrap_err();
        assert_eq!(err, QueueError::UnknownDelivery(delivery.tag));
    }

    #[tokio::test]
    async fn delayed_requeue_is_not_immediately_visible() {
        let queue = queue(Duration::from_secs(30)).await;
        queue.publish(QueueName::RawEvents, &message(3)).await.unwrap();
        let delivery = queue.receive(QueueName::RawEvents).await.unwrap().unwrap();

        queue
            .requeue(&delivery, &delivery.message.redelivery(), 60_000)
            .await
            .unwrap();
        assert!(queue.receive(QueueName::RawEvents).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dead_letter_moves_message_with_reason() {
        let queue = queue(Duration::from_secs(30)).await;
        queue.publish(QueueName::RawEvents, &message(4)).await.unwrap();
        let delivery = queue.receive(QueueName::RawEvents).await.unwrap().unwrap();

        queue
            .dead_letter(&delivery, "order not found: 4")
            .await
            .unwrap();

        assert_eq!(queue.depth(QueueName::RawEvents.as_str()).await.unwrap(), 0);
        let letters = queue.dead_letters(QueueName::RawEvents, 10).await.unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].0.block_number(), 4);
        assert_eq!(letters[0].1.as_deref(), Some("order not found: 4"));
    }

    #[tokio::test]
    async fn dead_letter_can_be_published_without_a_delivery() {
        let queue = queue(Duration::from_secs(30)).await;
        queue
            .publish_dead_letter(QueueName::RawEvents, &message(6), "buffer overrun")
            .await
            .unwrap();

        assert!(queue.receive(QueueName::RawEvents).await.unwrap().is_none());
        let letters = queue.dead_letters(QueueName::RawEvents, 10).await.unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].0.block_number(), 6);
        assert_eq!(letters[0].1.as_deref(), Some("buffer overrun"));
    }

    #[tokio::test]
    async fn purge_drops_pending_messages_at_or_above_block() {
        let queue = queue(Duration::from_secs(30)).await;
        for block in [10, 20, 30] {
            queue
                .publish(QueueName::RawEvents, &message(block))
                .await
                .unwrap();
        }
        queue
            .publish(QueueName::ProcessedEvents, &message(30))
            .await
            .unwrap();

        let purged = queue
            .purge_from_block(QueueName::RawEvents, 20)
            .await
            .unwrap();
        assert_eq!(purged, 2);
        let remaining = queue.receive(QueueName::RawEvents).await.unwrap().unwrap();
        assert_eq!(remaining.message.block_number(), 10);
        assert_eq!(
            queue
                .depth(QueueName::ProcessedEvents.as_str())
                .await
                .unwrap(),
            1
        );
    }
}
