//! Order-book event indexer: scans contract logs through a failover RPC pool,
//! queues decoded events, and projects them into the order tables.

pub mod application;
pub mod decoder;
pub mod init;
pub mod notifier;
pub mod processor;
pub mod reindex;
pub mod rpc;
pub mod scanner;

pub use application::CliError;
pub use decoder::{DecodeError, LogDecoder, MarketAbiDecoder};
pub use notifier::Notifier;
pub use processor::{HandlerError, ProcessOutcome, Processor};
pub use reindex::{plan_reindex, ReindexError, ReindexReport, Reindexer};
pub use rpc::{ChainClient, HttpChainClient, PoolError, RpcError, RpcPool};
pub use scanner::{ScanError, ScanOutcome, Scanner};
