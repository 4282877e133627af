//! Raw-event consumer: applies decoded events to the order projection with
//! bounded retry and dead-lettering.

use metrics::counter;
use order_indexer_domain::config::ProcessorSettings;
use order_indexer_domain::model::{Delivery, EventKind, Order, OrderError, QueueMessage, QueueName};
use order_indexer_domain::storage::{
    ApplyOutcome, OrderStore, QueueError, QueueTransport, StorageError,
};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Failure to apply one message. Always recovered by retry or dead-letter.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Order(#[from] OrderError),
    #[error("cannot decode payload: {0}")]
    Decode(String),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// What happened to the message taken by [`Processor::process_next`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Nothing was available.
    Idle,
    Applied(EventKind),
    Duplicate,
    Ignored,
    Retried { attempt: u32 },
    DeadLettered,
}

pub struct Processor<S, Q> {
    store: S,
    queue: Q,
    settings: ProcessorSettings,
}

impl<S, Q> Processor<S, Q>
where
    S: OrderStore,
    Q: QueueTransport,
{
    pub fn new(store: S, queue: Q, settings: ProcessorSettings) -> Self {
        Self {
            store,
            queue,
            settings,
        }
    }

    /// Consumes the raw-event queue forever. Transport errors are logged and
    /// retried after the poll interval.
    pub async fn run(&self) {
        info!(
            queue = QueueName::RawEvents.as_str(),
            max_attempts = self.settings.max_attempts,
            "processor started"
        );
        loop {
            match self.process_next().await {
                Ok(ProcessOutcome::Idle) => sleep(self.settings.poll_interval).await,
                Ok(_) => {}
                Err(err) => {
                    warn!(error = %err, "queue transport failed");
                    sleep(self.settings.poll_interval).await;
                }
            }
        }
    }

    pub async fn process_next(&self) -> Result<ProcessOutcome, QueueError> {
        let Some(delivery) = self.queue.receive(QueueName::RawEvents).await? else {
            return Ok(ProcessOutcome::Idle);
        };
        let message = &delivery.message;
        let kind = message.event_kind();

        if kind == EventKind::Unknown {
            info!(block = message.block_number(), "dropping unknown event");
            self.queue.ack(&delivery).await?;
            counter!("processor_messages_total", "result" => "ignored").increment(1);
            return Ok(ProcessOutcome::Ignored);
        }

        match self.handle(message).await {
            Ok(ApplyOutcome::Applied(order)) => {
                self.notify(message, &order).await?;
                self.queue.ack(&delivery).await?;
                counter!("processor_messages_total", "result" => "applied", "kind" => kind.as_ref().to_owned())
                    .increment(1);
                debug!(%kind, order_id = %order.order_id, "event applied");
                Ok(ProcessOutcome::Applied(kind))
            }
            Ok(ApplyOutcome::Duplicate) => {
                // A redelivery after a failed publish lands here; the
                // notification is re-sent from the stored order.
                match self.stored_order(message).await {
                    Ok(Some(order)) => self.notify(message, &order).await?,
                    Ok(None) => {}
                    Err(err) => return self.fail(&delivery, err).await,
                }
                self.queue.ack(&delivery).await?;
                counter!("processor_messages_total", "result" => "duplicate").increment(1);
                info!(%kind, block = message.block_number(), "event already applied");
                Ok(ProcessOutcome::Duplicate)
            }
            Ok(ApplyOutcome::Ignored) => {
                self.queue.ack(&delivery).await?;
                counter!("processor_messages_total", "result" => "ignored").increment(1);
                Ok(ProcessOutcome::Ignored)
            }
            Ok(ApplyOutcome::Rejected(err)) => self.fail(&delivery, HandlerError::Order(err)).await,
            Err(err) => self.fail(&delivery, err).await,
        }
    }

    async fn handle(&self, message: &QueueMessage) -> Result<ApplyOutcome, HandlerError> {
        let event = message
            .decode_event()
            .map_err(|err| HandlerError::Decode(err.to_string()))?;
        Ok(self.store.apply_event(&event, message.meta()).await?)
    }

    async fn stored_order(&self, message: &QueueMessage) -> Result<Option<Order>, HandlerError> {
        let event = message
            .decode_event()
            .map_err(|err| HandlerError::Decode(err.to_string()))?;
        match event.order_id() {
            Some(order_id) => Ok(self.store.find_order(&order_id).await?),
            None => Ok(None),
        }
    }

    async fn notify(&self, message: &QueueMessage, order: &Order) -> Result<(), QueueError> {
        let payload =
            serde_json::to_value(order).map_err(|err| QueueError::Encode(err.to_string()))?;
        let notification = QueueMessage::new(
            message.event_kind(),
            payload,
            message.meta(),
            self.settings.max_attempts,
        );
        self.queue
            .publish(QueueName::ProcessedEvents, &notification)
            .await
    }

    async fn fail(
        &self,
        delivery: &Delivery,
        err: HandlerError,
    ) -> Result<ProcessOutcome, QueueError> {
        let message = &delivery.message;
        if message.can_retry() {
            let next = message.redelivery();
            let delay_ms = self.settings.retry_delay.as_millis() as u64;
            warn!(
                kind = %message.event_kind(),
                block = message.block_number(),
                attempt = next.attempt_count(),
                max_attempts = message.max_attempts(),
                delay_ms,
                error = %err,
                "event failed; scheduling retry"
            );
            self.queue.requeue(delivery, &next, delay_ms).await?;
            counter!("processor_messages_total", "result" => "retried").increment(1);
            return Ok(ProcessOutcome::Retried {
                attempt: next.attempt_count(),
            });
        }

        let reason = err.to_string();
        error!(
            kind = %message.event_kind(),
            block = message.block_number(),
            tx = %message.transaction_hash(),
            log_index = message.meta().log_index,
            attempts = message.attempt_count(),
            first_seen_at = %message.first_seen_at(),
            payload = %message.payload(),
            error = %reason,
            "event exhausted retries; dead-lettering"
        );
        self.queue.dead_letter(delivery, &reason).await?;
        counter!("processor_messages_total", "result" => "dead_lettered").increment(1);
        Ok(ProcessOutcome::DeadLettered)
    }
}
