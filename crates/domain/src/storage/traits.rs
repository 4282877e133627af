use async_trait::async_trait;
use thiserror::Error;

use crate::model::{
    Cursor, DecodedLog, Delivery, EventMeta, InitOutcome, Order, OrderError, OrderEvent, OrderId,
    QueueMessage, QueueName, ReindexPlan, RewindSummary,
};

/// Common result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),
    #[error("corrupt value for `{key}`: {reason}")]
    Corrupt { key: String, reason: String },
}

impl StorageError {
    pub fn from_source(err: impl std::fmt::Display) -> Self {
        Self::Database(err.to_string())
    }

    pub fn corrupt(key: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Corrupt {
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}

/// Key/value rows of the `config` table.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get_config(&self, key: &str) -> StorageResult<Option<String>>;
    async fn set_config(&self, key: &str, value: &str) -> StorageResult<()>;
    /// Seeds the cursor once; later calls leave every row untouched.
    async fn initialize_defaults(&self, start_block: u64) -> StorageResult<InitOutcome>;
}

#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Returns `None` until the database has been initialized.
    async fn load_cursor(&self) -> StorageResult<Option<Cursor>>;
    async fn save_current_block_height(&self, height: u64) -> StorageResult<()>;
}

/// Result of gating an event through the applied-event ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied(Order),
    /// The ledger already holds this event; nothing changed.
    Duplicate,
    /// The event conflicts with current state; nothing changed.
    Rejected(OrderError),
    /// The event carries no order mutation.
    Ignored,
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn find_order(&self, order_id: &OrderId) -> StorageResult<Option<Order>>;
    /// Applies `event` and records it in the ledger inside one transaction.
    async fn apply_event(&self, event: &OrderEvent, meta: EventMeta)
        -> StorageResult<ApplyOutcome>;
}

#[async_trait]
pub trait ReindexStore: Send + Sync {
    /// Deletes the rows selected by `plan` and moves the cursor, atomically.
    async fn rewind(&self, plan: ReindexPlan) -> StorageResult<RewindSummary>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue storage error: {0}")]
    Storage(String),
    #[error("cannot encode message: {0}")]
    Encode(String),
    #[error("delivery {0} is no longer held by this consumer")]
    UnknownDelivery(i64),
}

impl QueueError {
    pub fn from_source(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }
}

pub type QueueResult<T> = Result<T, QueueError>;

/// Durable at-least-once transport with explicit acknowledgement.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    async fn publish(&self, queue: QueueName, message: &QueueMessage) -> QueueResult<()>;
    /// Claims the next available message, if any.
    async fn receive(&self, queue: QueueName) -> QueueResult<Option<Delivery>>;
    async fn ack(&self, delivery: &Delivery) -> QueueResult<()>;
    /// Replaces the delivery with `next`, visible again after `delay_ms`.
    async fn requeue(
        &self,
        delivery: &Delivery,
        next: &QueueMessage,
        delay_ms: u64,
    ) -> QueueResult<()>;
    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> QueueResult<()>;
    /// Stores `message` straight in the dead-letter queue of `queue`, for
    /// input that never reached a consumer.
    async fn publish_dead_letter(
        &self,
        queue: QueueName,
        message: &QueueMessage,
        reason: &str,
    ) -> QueueResult<()>;
    /// Drops pending messages at or above `block_number`. Returns how many.
    async fn purge_from_block(&self, queue: QueueName, block_number: u64) -> QueueResult<u64>;
}

/// Publishes a decoded log as a fresh envelope.
pub async fn publish_decoded<Q>(
    transport: &Q,
    queue: QueueName,
    decoded: &DecodedLog,
    max_attempts: u32,
) -> QueueResult<()>
where
    Q: QueueTransport + ?Sized,
{
    let message = QueueMessage::for_event(decoded, max_attempts)
        .map_err(|err| QueueError::Encode(err.to_string()))?;
    transport.publish(queue, &message).await
}
