//! Processed-event consumer. Downstream delivery is not wired yet, so each
//! notification is logged and acknowledged.

use std::time::Duration;

use metrics::counter;
use order_indexer_domain::model::QueueName;
use order_indexer_domain::storage::{QueueError, QueueTransport};
use tokio::time::sleep;
use tracing::{info, warn};

pub struct Notifier<Q> {
    queue: Q,
    poll_interval: Duration,
}

impl<Q: QueueTransport> Notifier<Q> {
    pub fn new(queue: Q, poll_interval: Duration) -> Self {
        Self {
            queue,
            poll_interval,
        }
    }

    pub async fn run(&self) {
        info!(queue = QueueName::ProcessedEvents.as_str(), "notifier started");
        loop {
            match self.notify_next().await {
                Ok(true) => {}
                Ok(false) => sleep(self.poll_interval).await,
                Err(err) => {
                    warn!(error = %err, "queue transport failed");
                    sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Handles one notification. Returns `false` when the queue was empty.
    pub async fn notify_next(&self) -> Result<bool, QueueError> {
        let Some(delivery) = self.queue.receive(QueueName::ProcessedEvents).await? else {
            return Ok(false);
        };
        let message = &delivery.message;
        info!(
            kind = %message.event_kind(),
            block = message.block_number(),
            tx = %message.transaction_hash(),
            order = %message.payload(),
            "order event processed"
        );
        self.queue.ack(&delivery).await?;
        counter!("notifier_messages_total").increment(1);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;
    use order_indexer_domain::model::{EventKind, EventMeta, QueueMessage};
    use order_indexer_storage::SeaOrmStorage;

    #[tokio::test]
    async fn drains_processed_events() {
        let storage = SeaOrmStorage::connect("sqlite::memory:").await.unwrap();
        let queue = storage.queue(Duration::from_secs(30));
        let message = QueueMessage::new(
            EventKind::OrderCancelled,
            serde_json::json!({ "orderId": "4", "isActive": false }),
            EventMeta {
                block_number: 12,
                transaction_hash: B256::repeat_byte(1),
                log_index: 0,
            },
            3,
        );
        queue.publish(QueueName::ProcessedEvents, &message).await.unwrap();
        queue.publish(QueueName::RawEvents, &message).await.unwrap();

        let notifier = Notifier::new(queue.clone(), Duration::from_millis(10));
        assert!(notifier.notify_next().await.unwrap());
        assert!(!notifier.notify_next().await.unwrap());
        assert_eq!(queue.depth(QueueName::ProcessedEvents.as_str()).await.unwrap(), 0);
        assert_eq!(queue.depth(QueueName::RawEvents.as_str()).await.unwrap(), 1);
    }
}
