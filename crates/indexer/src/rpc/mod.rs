//! Chain access: the `ChainClient` seam, its HTTP provider implementation, and the
//! failover pool in front of it.

use async_trait::async_trait;

mod http;
mod pool;
mod types;

pub use http::HttpChainClient;
pub use pool::{
    HealthProbeHandle, PoolError, PoolStatus, ProviderConfig, ProviderStatus, RetryConfig,
    RetryOverrides, RpcPool, SelectedProvider,
};
pub use types::{LogFilter, RawLog, RpcError};

/// "Latest height" and "logs in range" against a single endpoint.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn block_number(&self) -> Result<u64, RpcError>;
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, RpcError>;
}
