use alloy_primitives::B256;
use chrono::{DateTime, Utc};

use super::event::{DecodedLog, EventKind, EventMeta, OrderEvent};

/// Durable queues shared by the scanner, processor and notifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueName {
    RawEvents,
    ProcessedEvents,
}

impl QueueName {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RawEvents => "indexer.raw_log.q",
            Self::ProcessedEvents => "indexer.processed_events.q",
        }
    }

    pub fn dead_letter(&self) -> String {
        format!("{}.dlq", self.as_str())
    }
}

/// Immutable envelope carried by the queue transport.
///
/// Retrying never mutates an envelope in place: [`QueueMessage::redelivery`]
/// builds the next one.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMessage {
    event_kind: EventKind,
    payload: serde_json::Value,
    meta: EventMeta,
    attempt_count: u32,
    max_attempts: u32,
    first_seen_at: DateTime<Utc>,
}

impl QueueMessage {
    pub fn new(
        event_kind: EventKind,
        payload: serde_json::Value,
        meta: EventMeta,
        max_attempts: u32,
    ) -> Self {
        Self {
            event_kind,
            payload,
            meta,
            attempt_count: 0,
            max_attempts,
            first_seen_at: Utc::now(),
        }
    }

    pub fn for_event(decoded: &DecodedLog, max_attempts: u32) -> serde_json::Result<Self> {
        Ok(Self::new(
            decoded.event.kind(),
            decoded.event.to_payload()?,
            decoded.meta,
            max_attempts,
        ))
    }

    /// Restores delivery bookkeeping for an envelope read back from the
    /// transport.
    pub fn with_delivery_state(mut self, attempt_count: u32, first_seen_at: DateTime<Utc>) -> Self {
        self.attempt_count = attempt_count;
        self.first_seen_at = first_seen_at;
        self
    }

    pub fn redelivery(&self) -> Self {
        Self {
            attempt_count: self.attempt_count.saturating_add(1),
            ..self.clone()
        }
    }

    pub fn can_retry(&self) -> bool {
        self.attempt_count < self.max_attempts
    }

    pub fn decode_event(&self) -> serde_json::Result<OrderEvent> {
        OrderEvent::from_payload(self.event_kind, self.payload.clone())
    }

    pub fn event_kind(&self) -> EventKind {
        self.event_kind
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn meta(&self) -> EventMeta {
        self.meta
    }

    pub fn block_number(&self) -> u64 {
        self.meta.block_number
    }

    pub fn transaction_hash(&self) -> B256 {
        self.meta.transaction_hash
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn first_seen_at(&self) -> DateTime<Utc> {
        self.first_seen_at
    }
}

/// A message handed out by the transport; it stays owned by the consumer
/// until acknowledged, requeued or dead-lettered.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub tag: i64,
    pub queue: QueueName,
    pub message: QueueMessage,
}
