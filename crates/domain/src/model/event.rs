use std::fmt;

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use super::order::OrderId;

/// Names of the contract events the indexer understands.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, Serialize, Deserialize,
)]
pub enum EventKind {
    OrderPlaced,
    OrderFilled,
    OrderCancelled,
    OrderUpdated,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPlaced {
    pub order_id: OrderId,
    pub seller: Address,
    pub token_to_sell: Address,
    pub token_to_pay: Address,
    pub amount_to_sell: U256,
    pub price_per_token: U256,
    pub min_order_size: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFilled {
    pub order_id: OrderId,
    pub buyer: Address,
    pub amount_filled: U256,
    pub payment_amount: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCancelled {
    pub order_id: OrderId,
    pub seller: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderUpdated {
    pub order_id: OrderId,
    pub new_price: U256,
    pub new_min_order_size: U256,
}

/// A log emitted by the contract whose signature is not one of ours.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnknownEvent {
    pub signature: B256,
}

/// Closed set of events the processor dispatches on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderEvent {
    Placed(OrderPlaced),
    Filled(OrderFilled),
    Cancelled(OrderCancelled),
    Updated(OrderUpdated),
    Unknown(UnknownEvent),
}

impl OrderEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Placed(_) => EventKind::OrderPlaced,
            Self::Filled(_) => EventKind::OrderFilled,
            Self::Cancelled(_) => EventKind::OrderCancelled,
            Self::Updated(_) => EventKind::OrderUpdated,
            Self::Unknown(_) => EventKind::Unknown,
        }
    }

    pub fn order_id(&self) -> Option<OrderId> {
        match self {
            Self::Placed(event) => Some(event.order_id),
            Self::Filled(event) => Some(event.order_id),
            Self::Cancelled(event) => Some(event.order_id),
            Self::Updated(event) => Some(event.order_id),
            Self::Unknown(_) => None,
        }
    }

    /// Serializes the typed fields without the kind tag; the kind travels
    /// next to the payload in the queue envelope.
    pub fn to_payload(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            Self::Placed(event) => serde_json::to_value(event),
            Self::Filled(event) => serde_json::to_value(event),
            Self::Cancelled(event) => serde_json::to_value(event),
            Self::Updated(event) => serde_json::to_value(event),
            Self::Unknown(event) => serde_json::to_value(event),
        }
    }

    pub fn from_payload(kind: EventKind, payload: serde_json::Value) -> serde_json::Result<Self> {
        Ok(match kind {
            EventKind::OrderPlaced => Self::Placed(serde_json::from_value(payload)?),
            EventKind::OrderFilled => Self::Filled(serde_json::from_value(payload)?),
            EventKind::OrderCancelled => Self::Cancelled(serde_json::from_value(payload)?),
            EventKind::OrderUpdated => Self::Updated(serde_json::from_value(payload)?),
            EventKind::Unknown => Self::Unknown(serde_json::from_value(payload)?),
        })
    }
}

/// Chain position of a log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMeta {
    pub block_number: u64,
    pub transaction_hash: B256,
    pub log_index: u64,
}

/// Output of the log decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedLog {
    pub event: OrderEvent,
    pub meta: EventMeta,
}

/// Identity of one applied mutation. Redelivered copies of a message map to
/// the same key; distinct logs in the same block do not.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub order_id: OrderId,
    pub event_kind: EventKind,
    pub meta: EventMeta,
}

impl EventKey {
    pub fn new(order_id: OrderId, event_kind: EventKind, meta: EventMeta) -> Self {
        Self {
            order_id,
            event_kind,
            meta,
        }
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}",
            self.order_id,
            self.meta.block_number,
            self.event_kind,
            self.meta.transaction_hash,
            self.meta.log_index
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn event_kind_names_match_contract_events() {
        assert_eq!(EventKind::OrderFilled.to_string(), "OrderFilled");
        assert_eq!(
            EventKind::from_str("OrderCancelled").unwrap(),
            EventKind::OrderCancelled
        );
        assert!(EventKind::from_str("OrderExpired").is_err());
    }

    #[test]
    fn payload_decodes_back_into_the_same_variant() {
        let event = OrderEvent::Updated(OrderUpdated {
            order_id: OrderId::from(3),
            new_price: U256::from(42),
            new_min_order_size: U256::from(2),
        });
        let payload = event.to_payload().unwrap();
        assert_eq!(payload["orderId"], "3");
        let decoded = OrderEvent::from_payload(event.kind(), payload).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn payload_with_wrong_shape_fails() {
        let payload = serde_json::json!({ "orderId": "3" });
        assert!(OrderEvent::from_payload(EventKind::OrderFilled, payload).is_err());
    }

    #[test]
    fn event_key_separates_logs_within_a_block() {
        let meta = EventMeta {
            block_number: 10,
            transaction_hash: B256::repeat_byte(1),
            log_index: 0,
        };
        let first = EventKey::new(OrderId::from(1), EventKind::OrderFilled, meta);
        let second = EventKey::new(
            OrderId::from(1),
            EventKind::OrderFilled,
            EventMeta {
                log_index: 1,
                ..meta
            },
        );
        assert_ne!(first.to_string(), second.to_string());
        assert_eq!(
            first.to_string(),
            EventKey::new(OrderId::from(1), EventKind::OrderFilled, meta).to_string()
        );
    }

    #[test]
    fn redelivered_key_collapses_in_a_set() {
        let meta = EventMeta {
            block_number: 10,
            transaction_hash: B256::repeat_byte(1),
            log_index: 0,
        };
        let keys: std::collections::HashSet<EventKey> = [
            EventKey::new(OrderId::from(1), EventKind::OrderFilled, meta),
            EventKey::new(OrderId::from(1), EventKind::OrderFilled, meta),
            EventKey::new(OrderId::from(1), EventKind::OrderCancelled, meta),
        ]
        .into_iter()
        .collect();
        assert_eq!(keys.len(), 2);
    }
}
