use std::fmt;
use std::str::FromStr;

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::event::{OrderEvent, OrderFilled, OrderPlaced, OrderUpdated};

/// On-chain order identifier (`uint256`), rendered as a decimal string in
/// storage and on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrderId(U256);

impl OrderId {
    pub const fn new(value: U256) -> Self {
        Self(value)
    }

    pub fn as_u256(&self) -> U256 {
        self.0
    }
}

impl From<u64> for OrderId {
    fn from(value: u64) -> Self {
        Self(U256::from(value))
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OrderId {
    type Err = InvalidOrderId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<U256>()
            .map(Self)
            .map_err(|_| InvalidOrderId(s.to_string()))
    }
}

impl TryFrom<String> for OrderId {
    type Error = InvalidOrderId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OrderId> for String {
    fn from(value: OrderId) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid order id `{0}`")]
pub struct InvalidOrderId(pub String);

/// Projected state of a single order-book order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_id: OrderId,
    pub seller: Address,
    pub token_to_sell: Address,
    pub token_to_pay: Address,
    pub amount_to_sell: U256,
    pub amount_remaining: U256,
    pub price_per_token: U256,
    pub min_order_size: U256,
    pub is_active: bool,
    /// Block of the most recently applied mutation.
    pub created_at_block_number: u64,
}

impl Order {
    /// Builds the initial row for an `OrderPlaced` event. Nothing has been
    /// filled yet, so the remaining amount equals the amount offered.
    pub fn place(event: &OrderPlaced, block_number: u64) -> Self {
        Self {
            order_id: event.order_id,
            seller: event.seller,
            token_to_sell: event.token_to_sell,
            token_to_pay: event.token_to_pay,
            amount_to_sell: event.amount_to_sell,
            amount_remaining: event.amount_to_sell,
            price_per_token: event.price_per_token,
            min_order_size: event.min_order_size,
            is_active: true,
            created_at_block_number: block_number,
        }
    }

    pub fn fill(&mut self, event: &OrderFilled, block_number: u64) -> Result<(), OrderError> {
        self.amount_remaining = self
            .amount_remaining
            .checked_sub(event.amount_filled)
            .ok_or(OrderError::Overfill {
                order_id: self.order_id,
                remaining: self.amount_remaining,
                filled: event.amount_filled,
            })?;
        self.created_at_block_number = block_number;
        Ok(())
    }

    pub fn cancel(&mut self, block_number: u64) {
        self.is_active = false;
        self.created_at_block_number = block_number;
    }

    pub fn update(&mut self, event: &OrderUpdated, block_number: u64) {
        self.price_per_token = event.new_price;
        self.min_order_size = event.new_min_order_size;
        self.created_at_block_number = block_number;
    }
}

/// Reasons an event cannot be applied to the current order snapshot.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrderError {
    #[error("order not found: {0}")]
    NotFound(OrderId),
    #[error("order {0} already exists")]
    Duplicate(OrderId),
    #[error("fill of {filled} exceeds remaining {remaining} on order {order_id}")]
    Overfill {
        order_id: OrderId,
        remaining: U256,
        filled: U256,
    },
}

/// Computes the next snapshot of an order after `event`.
///
/// `current` is the stored row (if any). Returns `Ok(None)` for events that do
/// not touch order state.
pub fn apply_event(
    current: Option<Order>,
    event: &OrderEvent,
    block_number: u64,
) -> Result<Option<Order>, OrderError> {
    match event {
        OrderEvent::Placed(placed) => match current {
            Some(_) => Err(OrderError::Duplicate(placed.order_id)),
            None => Ok(Some(Order::place(placed, block_number))),
        },
        OrderEvent::Filled(filled) => {
            let mut order = current.ok_or(OrderError::NotFound(filled.order_id))?;
            order.fill(filled, block_number)?;
            Ok(Some(order))
        }
        OrderEvent::Cancelled(cancelled) => {
            let mut order = current.ok_or(OrderError::NotFound(cancelled.order_id))?;
            order.cancel(block_number);
            Ok(Some(order))
        }
        OrderEvent::Updated(updated) => {
            let mut order = current.ok_or(OrderError::NotFound(updated.order_id))?;
            order.update(updated, block_number);
            Ok(Some(order))
        }
        OrderEvent::Unknown(_) => Ok(None),
    }
}
