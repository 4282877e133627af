use std::future::Future;
use std::time::Duration;

use alloy_provider::{Provider, RootProvider};
use alloy_rpc_types::Filter;
use alloy_transport::TransportResult;
use alloy_transport_http::reqwest::Url;
use async_trait::async_trait;
use tokio::time::timeout;
use tracing::debug;

use super::types::{LogFilter, RawLog, RpcError};
use super::ChainClient;

/// One EVM node endpoint behind an alloy HTTP provider. Every call is
/// bounded by `timeout`.
#[derive(Debug, Clone)]
pub struct HttpChainClient {
    provider: RootProvider,
    url: Url,
    timeout: Duration,
}

impl HttpChainClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, RpcError> {
        let parsed: Url = url.parse().map_err(|err| RpcError::InvalidUrl {
            url: url.to_string(),
            reason: format!("{err}"),
        })?;
        Ok(Self {
            provider: RootProvider::new_http(parsed.clone()),
            url: parsed,
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn bounded<T, F>(&self, method: &'static str, call: F) -> Result<T, RpcError>
    where
        F: Future<Output = TransportResult<T>>,
    {
        match timeout(self.timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                debug!(method, url = %self.url, error = %err, "rpc call failed");
                Err(RpcError::from(err))
            }
            Err(_) => Err(RpcError::Timeout),
        }
    }
}

#[async_trait]
impl ChainClient for HttpChainClient {
    async fn block_number(&self) -> Result<u64, RpcError> {
        self.bounded("eth_blockNumber", async {
            self.provider.get_block_number().await
        })
        .await
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, RpcError> {
        let filter = Filter::from(filter);
        let logs = self
            .bounded("eth_getLogs", async { self.provider.get_logs(&filter).await })
            .await?;
        logs.into_iter()
            .filter(|log| !log.removed)
            .map(RawLog::try_from)
            .collect()
    }
}
