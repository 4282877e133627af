//! Operator-driven rewind of the order projection to an earlier block.

use metrics::counter;
use order_indexer_domain::model::{Cursor, QueueName, ReindexPlan, RewindSummary};
use order_indexer_domain::storage::{
    CursorStore, QueueError, QueueTransport, ReindexStore, StorageError,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::rpc::{ChainClient, PoolError, RpcPool};

#[derive(Debug, Error)]
pub enum ReindexError {
    #[error("cannot reindex from block {target}: scanner cursor is only at {current}")]
    Precondition { target: u64, current: u64 },
    #[error("database is not initialized; run `init-db` first")]
    NotInitialized,
    #[error("rpc error: {0}")]
    Pool(#[from] PoolError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReindexReport {
    pub plan: ReindexPlan,
    pub summary: RewindSummary,
    pub purged_messages: u64,
}

/// Chooses the store mutations for a reindex to `target`.
///
/// Targets below the initialization block reset everything; targets past the
/// cursor are rejected because those blocks were never scanned.
pub fn plan_reindex(target: u64, cursor: Cursor, head: u64) -> Result<ReindexPlan, ReindexError> {
    if target > cursor.current_block_height {
        return Err(ReindexError::Precondition {
            target,
            current: cursor.current_block_height,
        });
    }
    if target < cursor.initialization_block {
        return Ok(ReindexPlan::FullReset {
            current_block_height: cursor.initialization_block,
        });
    }
    // The head may lag the cursor on a freshly switched provider.
    Ok(ReindexPlan::Rewind {
        from_block: target,
        to_block: head.max(cursor.current_block_height),
    })
}

pub struct Reindexer<C, S, Q> {
    pool: RpcPool<C>,
    store: S,
    queue: Q,
}

impl<C, S, Q> Reindexer<C, S, Q>
where
    C: ChainClient + 'static,
    S: CursorStore + ReindexStore,
    Q: QueueTransport,
{
    pub fn new(pool: RpcPool<C>, store: S, queue: Q) -> Self {
        Self { pool, store, queue }
    }

    pub async fn reindex(&self, target: u64) -> Result<ReindexReport, ReindexError> {
        let cursor = self
            .store
            .load_cursor()
            .await?
            .ok_or(ReindexError::NotInitialized)?;
        if target > cursor.current_block_height {
            warn!(target, current = cursor.current_block_height, "reindex target ahead of cursor");
            return Err(ReindexError::Precondition {
                target,
                current: cursor.current_block_height,
            });
        }

        let head = self.pool.block_number().await?;
        let plan = plan_reindex(target, cursor, head)?;
        let summary = self.store.rewind(plan).await?;
        if summary.orphaned_orders > 0 {
            warn!(
                target,
                orphaned_orders = summary.orphaned_orders,
                "deleted orders were placed before the target; their replayed events will be dead-lettered"
            );
        }
        let purged_messages = self
            .queue
            .purge_from_block(QueueName::RawEvents, plan.current_block_height())
            .await?;

        counter!("reindex_runs_total").increment(1);
        info!(
            target,
            head,
            cursor = plan.current_block_height(),
            orders_deleted = summary.orders_deleted,
            ledger_entries_deleted = summary.ledger_entries_deleted,
            orphaned_orders = summary.orphaned_orders,
            purged_messages,
            "reindex complete"
        );
        Ok(ReindexReport {
            plan,
            summary,
            purged_messages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{LogFilter, ProviderConfig, RawLog, RetryConfig, RpcError};
    use alloy_primitives::{Address, B256, U256};
    use async_trait::async_trait;
    use order_indexer_domain::model::{
        EventMeta, OrderEvent, OrderFilled, OrderId, OrderPlaced, QueueMessage,
    };
    use order_indexer_domain::storage::{ConfigStore, OrderStore};
    use order_indexer_storage::{SeaOrmQueue, SeaOrmStorage};
    use std::time::Duration;

    struct StaticHead(u64);

    #[async_trait]
    impl ChainClient for StaticHead {
        async fn block_number(&self) -> Result<u64, RpcError> {
            Ok(self.0)
        }

        async fn get_logs(&self, _filter: &LogFilter) -> Result<Vec<RawLog>, RpcError> {
            Ok(Vec::new())
        }
    }

    const CURSOR: Cursor = Cursor {
        initialization_block: 100,
        current_block_height: 500,
    };

    #[test]
    fn target_before_initialization_is_a_full_reset() {
        assert_eq!(
            plan_reindex(50, CURSOR, 520).unwrap(),
            ReindexPlan::FullReset {
                current_block_height: 100
            }
        );
    }

    #[test]
    fn target_inside_scanned_range_rewinds() {
        assert_eq!(
            plan_reindex(300, CURSOR, 520).unwrap(),
            ReindexPlan::Rewind {
                from_block: 300,
                to_block: 520
            }
        );
        assert_eq!(plan_reindex(100, CURSOR, 520).unwrap().current_block_height(), 100);
        assert_eq!(plan_reindex(500, CURSOR, 520).unwrap().current_block_height(), 500);
    }

    #[test]
    fn target_past_cursor_is_rejected() {
        assert!(matches!(
            plan_reindex(600, CURSOR, 520),
            Err(ReindexError::Precondition {
                target: 600,
                current: 500
            })
        ));
    }

    fn placed(order_id: u64, block_number: u64) -> (OrderEvent, EventMeta) {
        (
            OrderEvent::Placed(OrderPlaced {
                order_id: OrderId::from(order_id),
                seller: Address::repeat_byte(0x11),
                token_to_sell: Address::repeat_byte(0x22),
                token_to_pay: Address::repeat_byte(0x33),
                amount_to_sell: U256::from(1_000),
                price_per_token: U256::from(5),
                min_order_size: U256::from(1),
            }),
            EventMeta {
                block_number,
                transaction_hash: B256::repeat_byte(order_id as u8),
                log_index: 0,
            },
        )
    }

    async fn seeded() -> (Reindexer<StaticHead, SeaOrmStorage, SeaOrmQueue>, SeaOrmStorage, SeaOrmQueue) {
        let storage = SeaOrmStorage::connect("sqlite::memory:").await.unwrap();
        storage.initialize_defaults(100).await.unwrap();
        storage.save_current_block_height(500).await.unwrap();
        for (order_id, block) in [(1, 150), (2, 350)] {
            let (event, meta) = placed(order_id, block);
            storage.apply_event(&event, meta).await.unwrap();
        }

        let queue = storage.queue(Duration::from_secs(30));
        for block in [200, 400] {
            let (event, meta) = placed(block, block);
            let message =
                QueueMessage::new(event.kind(), event.to_payload().unwrap(), meta, 3);
            queue.publish(QueueName::RawEvents, &message).await.unwrap();
        }

        let pool = RpcPool::new(
            vec![ProviderConfig::new("rpc-0", "http://fake", StaticHead(520))],
            RetryConfig::default(),
            5,
        );
        let reindexer = Reindexer::new(pool, storage.clone(), queue.clone());
        (reindexer, storage, queue)
    }

    async fn cursor(storage: &SeaOrmStorage) -> u64 {
        storage.load_cursor().await.unwrap().unwrap().current_block_height
    }

    #[tokio::test]
    async fn rejected_target_changes_nothing() {
        let (reindexer, storage, queue) = seeded().await;
        assert!(matches!(
            reindexer.reindex(600).await,
            Err(ReindexError::Precondition { .. })
        ));
        assert_eq!(cursor(&storage).await, 500);
        assert!(storage.find_order(&OrderId::from(2)).await.unwrap().is_some());
        assert_eq!(queue.depth(QueueName::RawEvents.as_str()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn rewind_drops_later_orders_and_queued_events() {
        let (reindexer, storage, queue) = seeded().await;
        let report = reindexer.reindex(300).await.unwrap();

        assert_eq!(report.summary.orders_deleted, 1);
        assert_eq!(report.summary.ledger_entries_deleted, 1);
        assert_eq!(report.summary.orphaned_orders, 0);
        assert_eq!(report.purged_messages, 1);
        assert_eq!(cursor(&storage).await, 300);
        assert!(storage.find_order(&OrderId::from(1)).await.unwrap().is_some());
        assert!(storage.find_order(&OrderId::from(2)).await.unwrap().is_none());
        let remaining = queue.receive(QueueName::RawEvents).await.unwrap().unwrap();
        assert_eq!(remaining.message.block_number(), 200);
    }

    #[tokio::test]
    async fn rewind_counts_orders_placed_before_the_target() {
        let (reindexer, storage, _queue) = seeded().await;
        let fill = OrderEvent::Filled(OrderFilled {
            order_id: OrderId::from(1),
            buyer: Address::repeat_byte(0x44),
            amount_filled: U256::from(100),
            payment_amount: U256::from(500),
        });
        let meta = EventMeta {
            block_number: 320,
            transaction_hash: B256::repeat_byte(0x32),
            log_index: 0,
        };
        storage.apply_event(&fill, meta).await.unwrap();

        let report = reindexer.reindex(300).await.unwrap();

        assert_eq!(report.summary.orders_deleted, 2);
        assert_eq!(report.summary.ledger_entries_deleted, 2);
        assert_eq!(report.summary.orphaned_orders, 1);
        assert!(storage.find_order(&OrderId::from(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn full_reset_restarts_from_initialization_block() {
        let (reindexer, storage, queue) = seeded().await;
        let report = reindexer.reindex(50).await.unwrap();

        assert_eq!(
            report.plan,
            ReindexPlan::FullReset {
                current_block_height: 100
            }
        );
        assert_eq!(report.summary.orders_deleted, 2);
        assert_eq!(cursor(&storage).await, 100);
        assert_eq!(queue.depth(QueueName::RawEvents.as_str()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn uninitialized_database_is_rejected() {
        let storage = SeaOrmStorage::connect("sqlite::memory:").await.unwrap();
        let pool = RpcPool::new(
            vec![ProviderConfig::new("rpc-0", "http://fake", StaticHead(10))],
            RetryConfig::default(),
            5,
        );
        let reindexer = Reindexer::new(pool, storage.clone(), storage.queue(Duration::from_secs(1)));
        assert!(matches!(
            reindexer.reindex(5).await,
            Err(ReindexError::NotInitialized)
        ));
    }
}
