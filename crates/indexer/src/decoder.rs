//! Raw log to typed event decoding for the order-book contract ABI.

use alloy_primitives::B256;
use alloy_sol_types::{sol, SolEvent};
use order_indexer_domain::model::{
    DecodedLog, EventKind, EventMeta, OrderCancelled, OrderEvent, OrderFilled, OrderId,
    OrderPlaced, OrderUpdated, UnknownEvent,
};
use thiserror::Error;

use crate::rpc::RawLog;

sol! {
    /// `orderId` and the acting address are indexed.
    interface OrderBook {
        event OrderPlaced(
            uint256 indexed orderId,
            address indexed seller,
            address tokenToSell,
            address tokenToPay,
            uint256 amountToSell,
            uint256 pricePerToken,
            uint256 minOrderSize
        );
        event OrderFilled(
            uint256 indexed orderId,
            address indexed buyer,
            uint256 amountFilled,
            uint256 paymentAmount
        );
        event OrderCancelled(uint256 indexed orderId, address indexed seller);
        event OrderUpdated(uint256 indexed orderId, uint256 newPrice, uint256 newMinOrderSize);
    }
}

/// Turns a raw log into a named, typed event.
pub trait LogDecoder: Send + Sync {
    /// Logs with an unrecognized signature decode to [`OrderEvent::Unknown`];
    /// errors are reserved for recognized logs with a broken layout.
    fn decode(&self, log: &RawLog) -> Result<DecodedLog, DecodeError>;
}

#[derive(Debug, Error)]
#[error("cannot decode {event} log: {source}")]
pub struct DecodeError {
    pub event: EventKind,
    #[source]
    pub source: alloy_sol_types::Error,
}

/// Decoder for `OrderPlaced`, `OrderFilled`, `OrderCancelled` and
/// `OrderUpdated`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarketAbiDecoder;

impl MarketAbiDecoder {
    pub fn new() -> Self {
        Self
    }

    pub fn topic_for(&self, kind: EventKind) -> Option<B256> {
        match kind {
            EventKind::OrderPlaced => Some(OrderBook::OrderPlaced::SIGNATURE_HASH),
            EventKind::OrderFilled => Some(OrderBook::OrderFilled::SIGNATURE_HASH),
            EventKind::OrderCancelled => Some(OrderBook::OrderCancelled::SIGNATURE_HASH),
            EventKind::OrderUpdated => Some(OrderBook::OrderUpdated::SIGNATURE_HASH),
            EventKind::Unknown => None,
        }
    }

    fn kind_of(&self, signature: &B256) -> EventKind {
        [
            EventKind::OrderPlaced,
            EventKind::OrderFilled,
            EventKind::OrderCancelled,
            EventKind::OrderUpdated,
        ]
        .into_iter()
        .find(|kind| self.topic_for(*kind).as_ref() == Some(signature))
        .unwrap_or(EventKind::Unknown)
    }
}

fn decode_as<E: SolEvent>(kind: EventKind, log: &RawLog) -> Result<E, DecodeError> {
    E::decode_raw_log(log.topics.iter().copied(), &log.data).map_err(|source| DecodeError {
        event: kind,
        source,
    })
}

impl LogDecoder for MarketAbiDecoder {
    fn decode(&self, log: &RawLog) -> Result<DecodedLog, DecodeError> {
        let meta = EventMeta {
            block_number: log.block_number,
            transaction_hash: log.transaction_hash,
            log_index: log.log_index,
        };
        let signature = log.topics.first().copied().unwrap_or(B256::ZERO);
        let kind = self.kind_of(&signature);

        let event = match kind {
            EventKind::OrderPlaced => {
                let placed: OrderBook::OrderPlaced = decode_as(kind, log)?;
                OrderEvent::Placed(OrderPlaced {
                    order_id: OrderId::new(placed.orderId),
                    seller: placed.seller,
                    token_to_sell: placed.tokenToSell,
                    token_to_pay: placed.tokenToPay,
                    amount_to_sell: placed.amountToSell,
                    price_per_token: placed.pricePerToken,
                    min_order_size: placed.minOrderSize,
                })
            }
            EventKind::OrderFilled => {
                let filled: OrderBook::OrderFilled = decode_as(kind, log)?;
                OrderEvent::Filled(OrderFilled {
                    order_id: OrderId::new(filled.orderId),
                    buyer: filled.buyer,
                    amount_filled: filled.amountFilled,
                    payment_amount: filled.paymentAmount,
                })
            }
            EventKind::OrderCancelled => {
                let cancelled: OrderBook::OrderCancelled = decode_as(kind, log)?;
                OrderEvent::Cancelled(OrderCancelled {
                    order_id: OrderId::new(cancelled.orderId),
                    seller: cancelled.seller,
                })
            }
            EventKind::OrderUpdated => {
                let updated: OrderBook::OrderUpdated = decode_as(kind, log)?;
                OrderEvent::Updated(OrderUpdated {
                    order_id: OrderId::new(updated.orderId),
                    new_price: updated.newPrice,
                    new_min_order_size: updated.newMinOrderSize,
                })
            }
            EventKind::Unknown => OrderEvent::Unknown(UnknownEvent { signature }),
        };

        Ok(DecodedLog { event, meta })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use alloy_primitives::{Address, Bytes, U256};

    pub(crate) fn word_u64(value: u64) -> [u8; 32] {
        U256::from(value).to_be_bytes::<32>()
    }

    pub(crate) fn raw_log(topics: Vec<B256>, words: Vec<[u8; 32]>, block: u64, index: u64) -> RawLog {
        RawLog {
            address: Address::repeat_byte(0xcc),
            topics,
            data: Bytes::from(words.concat()),
            block_number: block,
            transaction_hash: B256::repeat_byte(0xee),
            log_index: index,
        }
    }

    fn encoded_log(event: &impl SolEvent, block: u64, index: u64) -> RawLog {
        let (topics, data) = event.encode_log_data().split();
        RawLog {
            data,
            ..raw_log(topics, vec![], block, index)
        }
    }

    pub(crate) fn placed_log(order_id: u64, amount: u64, block: u64, index: u64) -> RawLog {
        let event = OrderBook::OrderPlaced {
            orderId: U256::from(order_id),
            seller: Address::repeat_byte(0x11),
            tokenToSell: Address::repeat_byte(0x22),
            tokenToPay: Address::repeat_byte(0x33),
            amountToSell: U256::from(amount),
            pricePerToken: U256::from(5),
            minOrderSize: U256::from(1),
        };
        encoded_log(&event, block, index)
    }

    pub(crate) fn filled_log(order_id: u64, amount: u64, block: u64, index: u64) -> RawLog {
        let event = OrderBook::OrderFilled {
            orderId: U256::from(order_id),
            buyer: Address::repeat_byte(0x44),
            amountFilled: U256::from(amount),
            paymentAmount: U256::from(amount * 5),
        };
        encoded_log(&event, block, index)
    }

    #[test]
    fn topic_hash_matches_keccak_of_signature() {
        assert_eq!(
            OrderBook::OrderFilled::SIGNATURE,
            "OrderFilled(uint256,address,uint256,uint256)"
        );
        assert_eq!(
            MarketAbiDecoder::new().topic_for(EventKind::OrderFilled),
            Some(alloy_primitives::keccak256(
                "OrderFilled(uint256,address,uint256,uint256)"
            ))
        );
    }

    #[test]
    fn decodes_order_placed() {
        let decoded = MarketAbiDecoder::new()
            .decode(&placed_log(9, 1_000, 120, 3))
            .unwrap();

        assert_eq!(decoded.meta.block_number, 120);
        assert_eq!(decoded.meta.log_index, 3);
        let OrderEvent::Placed(placed) = decoded.event else {
            panic!("expected OrderPlaced");
        };
        assert_eq!(placed.order_id, OrderId::from(9));
        assert_eq!(placed.seller, Address::repeat_byte(0x11));
        assert_eq!(placed.token_to_sell, Address::repeat_byte(0x22));
        assert_eq!(placed.token_to_pay, Address::repeat_byte(0x33));
        assert_eq!(placed.amount_to_sell, U256::from(1_000));
    }

    #[test]
    fn decodes_order_filled() {
        let decoded = MarketAbiDecoder::new()
            .decode(&filled_log(9, 300, 121, 0))
            .unwrap();
        assert_eq!(
            decoded.event,
            OrderEvent::Filled(OrderFilled {
                order_id: OrderId::from(9),
                buyer: Address::repeat_byte(0x44),
                amount_filled: U256::from(300),
                payment_amount: U256::from(1_500),
            })
        );
    }

    #[test]
    fn decodes_cancel_and_update() {
        let decoder = MarketAbiDecoder::new();
        let cancel = encoded_log(
            &OrderBook::OrderCancelled {
                orderId: U256::from(4),
                seller: Address::repeat_byte(0x11),
            },
            10,
            0,
        );
        assert_eq!(
            decoder.decode(&cancel).unwrap().event,
            OrderEvent::Cancelled(OrderCancelled {
                order_id: OrderId::from(4),
                seller: Address::repeat_byte(0x11),
            })
        );

        let update = raw_log(
            vec![
                decoder.topic_for(EventKind::OrderUpdated).unwrap(),
                B256::from(word_u64(4)),
            ],
            vec![word_u64(8), word_u64(2)],
            11,
            0,
        );
        assert_eq!(
            decoder.decode(&update).unwrap().event,
            OrderEvent::Updated(OrderUpdated {
                order_id: OrderId::from(4),
                new_price: U256::from(8),
                new_min_order_size: U256::from(2),
            })
        );
    }

    #[test]
    fn unknown_signature_is_not_an_error() {
        let log = raw_log(vec![B256::repeat_byte(0x99)], vec![], 5, 0);
        let decoded = MarketAbiDecoder::new().decode(&log).unwrap();
        assert_eq!(decoded.event.kind(), EventKind::Unknown);

        let anonymous = raw_log(vec![], vec![], 5, 1);
        assert_eq!(
            MarketAbiDecoder::new().decode(&anonymous).unwrap().event,
            OrderEvent::Unknown(UnknownEvent {
                signature: B256::ZERO
            })
        );
    }

    #[test]
    fn truncated_known_log_is_rejected() {
        let mut log = filled_log(1, 10, 5, 0);
        log.data = Bytes::from(word_u64(10).to_vec());
        let err = MarketAbiDecoder::new().decode(&log).unwrap_err();
        assert_eq!(err.event, EventKind::OrderFilled);

        let mut log = filled_log(1, 10, 5, 0);
        log.topics.truncate(1);
        let err = MarketAbiDecoder::new().decode(&log).unwrap_err();
        assert_eq!(err.event, EventKind::OrderFilled);
        assert!(err.to_string().starts_with("cannot decode OrderFilled log"));
    }
}
