//! Conversions between domain values and their column representations.

use std::str::FromStr;

use alloy_primitives::{Address, U256};
use order_indexer_domain::model::{Order, OrderId};
use order_indexer_domain::storage::{StorageError, StorageResult};
use sea_orm::Set;

use crate::entity::orders;

pub(crate) fn height_to_db(height: u64) -> StorageResult<i64> {
    i64::try_from(height)
        .map_err(|_| StorageError::Database(format!("block number {height} exceeds i64")))
}

pub(crate) fn height_from_db(column: &str, value: i64) -> StorageResult<u64> {
    u64::try_from(value).map_err(|err| StorageError::corrupt(column, err))
}

pub(crate) fn parse_height(key: &str, raw: &str) -> StorageResult<u64> {
    raw.trim()
        .parse()
        .map_err(|err| StorageError::corrupt(key, err))
}

fn parse_u256(column: &str, raw: &str) -> StorageResult<U256> {
    U256::from_str(raw).map_err(|err| StorageError::corrupt(column, err))
}

fn parse_address(column: &str, raw: &str) -> StorageResult<Address> {
    Address::from_str(raw).map_err(|err| StorageError::corrupt(column, err))
}

pub(crate) fn order_from_model(model: orders::Model) -> StorageResult<Order> {
    Ok(Order {
        order_id: OrderId::from_str(&model.order_id)
            .map_err(|err| StorageError::corrupt("orders.order_id", err))?,
        seller: parse_address("orders.seller", &model.seller)?,
        token_to_sell: parse_address("orders.token_to_sell", &model.token_to_sell)?,
        token_to_pay: parse_address("orders.token_to_pay", &model.token_to_pay)?,
        amount_to_sell: parse_u256("orders.amount_to_sell", &model.amount_to_sell)?,
        amount_remaining: parse_u256("orders.amount_remaining", &model.amount_remaining)?,
        price_per_token: parse_u256("orders.price_per_token", &model.price_per_token)?,
        min_order_size: parse_u256("orders.min_order_size", &model.min_order_size)?,
        is_active: model.is_active,
        created_at_block_number: height_from_db(
            "orders.created_at_block_number",
            model.created_at_block_number,
        )?,
    })
}

pub(crate) fn order_to_active(order: &Order) -> StorageResult<orders::ActiveModel> {
    Ok(orders::ActiveModel {
        order_id: Set(order.order_id.to_string()),
        seller: Set(order.seller.to_string()),
        token_to_sell: Set(order.token_to_sell.to_string()),
        token_to_pay: Set(order.token_to_pay.to_string()),
        amount_to_sell: Set(order.amount_to_sell.to_string()),
        amount_remaining: Set(order.amount_remaining.to_string()),
        price_per_token: Set(order.price_per_token.to_string()),
        min_order_size: Set(order.min_order_size.to_string()),
        is_active: Set(order.is_active),
        created_at_block_number: Set(height_to_db(order.created_at_block_number)?),
    })
}
