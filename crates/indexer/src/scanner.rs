//! Block-range scanner: tails the contract's logs and publishes decoded events
//! to the raw-event queue, advancing the persisted cursor only after a range
//! has been fully published.

use alloy_primitives::Address;
use metrics::{counter, gauge, histogram};
use order_indexer_domain::config::ScannerSettings;
use order_indexer_domain::model::{EventKind, EventMeta, QueueMessage, QueueName};
use order_indexer_domain::storage::{
    publish_decoded, CursorStore, QueueError, QueueTransport, StorageError,
};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::decoder::LogDecoder;
use crate::rpc::{ChainClient, LogFilter, PoolError, RawLog, RpcPool};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("database is not initialized; run `init-db` first")]
    NotInitialized,
    #[error("rpc error: {0}")]
    Pool(#[from] PoolError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("failed to publish event from block {block}: {source}")]
    Dispatch {
        block: u64,
        #[source]
        source: QueueError,
    },
}

/// Result of one scanner iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    Scanned {
        from: u64,
        to: u64,
        published: usize,
        skipped: usize,
        /// Recognized logs that failed to decode, stored in the raw dead-letter
        /// queue.
        dead_lettered: usize,
        /// The range ended at the known chain head.
        at_head: bool,
    },
    /// The cursor is past the chain head.
    Idle,
}

#[derive(Debug, Default)]
struct Dispatched {
    published: usize,
    skipped: usize,
    dead_lettered: usize,
}

/// Envelope for a log the decoder recognized but could not read, kept
/// verbatim for the operator.
fn undecodable_message(log: &RawLog, kind: EventKind, max_attempts: u32) -> QueueMessage {
    let payload = serde_json::json!({
        "address": log.address,
        "topics": log.topics,
        "data": log.data,
    });
    let meta = EventMeta {
        block_number: log.block_number,
        transaction_hash: log.transaction_hash,
        log_index: log.log_index,
    };
    QueueMessage::new(kind, payload, meta, max_attempts)
}

pub struct Scanner<C, D, S, Q> {
    pool: RpcPool<C>,
    decoder: D,
    cursor_store: S,
    queue: Q,
    contract: Address,
    settings: ScannerSettings,
    max_attempts: u32,
    known_head: Option<u64>,
}

impl<C, D, S, Q> Scanner<C, D, S, Q>
where
    C: ChainClient + 'static,
    D: LogDecoder,
    S: CursorStore,
    Q: QueueTransport,
{
    pub fn new(
        pool: RpcPool<C>,
        decoder: D,
        cursor_store: S,
        queue: Q,
        contract: Address,
        settings: ScannerSettings,
        max_attempts: u32,
    ) -> Self {
        Self {
            pool,
            decoder,
            cursor_store,
            queue,
            contract,
            settings,
            max_attempts,
            known_head: None,
        }
    }

    /// Loops over [`Scanner::scan_once`], sleeping whenever it has caught up
    /// with the chain. Returns only on error.
    pub async fn run(&mut self) -> Result<(), ScanError> {
        info!(
            contract = %self.contract,
            batch_size = self.settings.batch_size,
            "scanner started"
        );
        loop {
            match self.scan_once().await? {
                ScanOutcome::Scanned { at_head: false, .. } => {}
                ScanOutcome::Scanned { at_head: true, .. } | ScanOutcome::Idle => {
                    sleep(self.settings.idle_interval).await;
                }
            }
        }
    }

    pub async fn scan_once(&mut self) -> Result<ScanOutcome, ScanError> {
        let cursor = self
            .cursor_store
            .load_cursor()
            .await?
            .ok_or(ScanError::NotInitialized)?
            .current_block_height;
        gauge!("scanner_cursor").set(cursor as f64);

        let head = self.refresh_head(cursor).await?;
        if cursor > head {
            debug!(cursor, head, "cursor ahead of chain head");
            return Ok(ScanOutcome::Idle);
        }

        let end = cursor.saturating_add(self.settings.batch_size).min(head);
        let mut logs = self
            .pool
            .get_logs(&LogFilter {
                from_block: cursor,
                to_block: end,
                address: self.contract,
            })
            .await?;
        logs.sort_by_key(|log| (log.block_number, log.log_index));
        histogram!("scanner_logs_per_range").record(logs.len() as f64);

        let Dispatched {
            published,
            skipped,
            dead_lettered,
        } = self.dispatch(&logs).await?;

        let next = end + 1;
        self.cursor_store.save_current_block_height(next).await?;
        counter!("scanner_blocks_scanned_total").increment(end - cursor + 1);
        gauge!("scanner_cursor").set(next as f64);
        info!(
            from = cursor,
            to = end,
            published,
            skipped,
            dead_lettered,
            "range scanned"
        );

        Ok(ScanOutcome::Scanned {
            from: cursor,
            to: end,
            published,
            skipped,
            dead_lettered,
            at_head: end >= head,
        })
    }

    /// Queries the chain only when the cached head is close to (or behind)
    /// the cursor.
    async fn refresh_head(&mut self, cursor: u64) -> Result<u64, ScanError> {
        if let Some(head) = self.known_head {
            if head >= cursor && head - cursor >= self.settings.batch_size {
                return Ok(head);
            }
        }
        let head = self.pool.block_number().await?;
        gauge!("scanner_chain_head").set(head as f64);
        self.known_head = Some(head);
        Ok(head)
    }

    async fn dispatch(&self, logs: &[RawLog]) -> Result<Dispatched, ScanError> {
        let mut counts = Dispatched::default();

        for log in logs {
            let decoded = match self.decoder.decode(log) {
                Ok(decoded) => decoded,
                Err(err) => {
                    error!(
                        block = log.block_number,
                        log_index = log.log_index,
                        tx = %log.transaction_hash,
                        data = %log.data,
                        error = %err,
                        "undecodable log moved to dead-letter queue"
                    );
                    let message = undecodable_message(log, err.event, self.max_attempts);
                    if let Err(source) = self
                        .queue
                        .publish_dead_letter(QueueName::RawEvents, &message, &err.to_string())
                        .await
                    {
                        return self.hold_cursor(log.block_number, source).await;
                    }
                    counter!("scanner_logs_total", "result" => "undecodable").increment(1);
                    counts.dead_lettered += 1;
                    continue;
                }
            };

            if decoded.event.kind() == EventKind::Unknown {
                info!(
                    block = log.block_number,
                    log_index = log.log_index,
                    "unrecognized event skipped"
                );
                counter!("scanner_logs_total", "result" => "unknown").increment(1);
                counts.skipped += 1;
                continue;
            }

            if let Err(source) =
                publish_decoded(&self.queue, QueueName::RawEvents, &decoded, self.max_attempts)
                    .await
            {
                return self.hold_cursor(log.block_number, source).await;
            }
            counter!("scanner_logs_total", "result" => "published").increment(1);
            counts.published += 1;
        }

        Ok(counts)
    }

    /// Persists `block` as the cursor so a restart begins with the log that
    /// could not be queued.
    async fn hold_cursor(&self, block: u64, source: QueueError) -> Result<Dispatched, ScanError> {
        error!(block, error = %source, "publish failed; holding cursor at block");
        self.cursor_store.save_current_block_height(block).await?;
        gauge!("scanner_cursor").set(block as f64);
        Err(ScanError::Dispatch { block, source })
    }
}
