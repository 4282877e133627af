use alloy_primitives::{Address, Bytes, B256};
use alloy_rpc_types::{Filter, Log};
use alloy_transport::{TransportError, TransportErrorKind};
use thiserror::Error;

/// `eth_getLogs` filter over an inclusive block range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogFilter {
    pub from_block: u64,
    pub to_block: u64,
    pub address: Address,
}

impl From<&LogFilter> for Filter {
    fn from(filter: &LogFilter) -> Self {
        Filter::new()
            .address(filter.address)
            .from_block(filter.from_block)
            .to_block(filter.to_block)
    }
}

/// A mined log with its chain position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
    pub transaction_hash: B256,
    pub log_index: u64,
}

impl TryFrom<Log> for RawLog {
    type Error = RpcError;

    fn try_from(log: Log) -> Result<Self, Self::Error> {
        let (Some(block_number), Some(transaction_hash), Some(log_index)) =
            (log.block_number, log.transaction_hash, log.log_index)
        else {
            return Err(RpcError::Malformed("log without block position".to_string()));
        };
        let address = log.inner.address;
        let (topics, data) = log.inner.data.split();
        Ok(Self {
            address,
            topics,
            data,
            block_number,
            transaction_hash,
            log_index,
        })
    }
}

/// Failure of a single request against one endpoint.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("http status {status}: {body}")]
    Http { status: u16, body: String },
    #[error("json-rpc error {code}: {message}")]
    JsonRpc { code: i64, message: String },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("invalid endpoint url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// JSON-RPC code used by common providers for "limit exceeded".
const LIMIT_EXCEEDED: i64 = -32005;

impl RpcError {
    /// Transient failures worth another attempt, possibly on another endpoint.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout | Self::RateLimited(_) => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::JsonRpc { .. } | Self::Malformed(_) | Self::InvalidUrl { .. } => false,
        }
    }

    pub(crate) fn from_json_rpc(code: i64, message: String) -> Self {
        let lowered = message.to_ascii_lowercase();
        if code == LIMIT_EXCEEDED || lowered.contains("rate limit") {
            Self::RateLimited(message)
        } else {
            Self::JsonRpc { code, message }
        }
    }
}

impl From<TransportError> for RpcError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::ErrorResp(payload) => {
                Self::from_json_rpc(payload.code, payload.message.to_string())
            }
            TransportError::Transport(TransportErrorKind::HttpError(http)) => {
                if http.status == 429 {
                    Self::RateLimited(http.body)
                } else {
                    Self::Http {
                        status: http.status,
                        body: http.body,
                    }
                }
            }
            TransportError::NullResp => Self::Malformed("null response".to_string()),
            TransportError::DeserError { err, .. } => Self::Malformed(err.to_string()),
            other => Self::Transport(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(RpcError::Timeout.is_retryable());
        assert!(RpcError::Transport("connection reset".into()).is_retryable());
        assert!(RpcError::Http {
            status: 429,
            body: String::new()
        }
        .is_retryable());
        assert!(RpcError::Http {
            status: 503,
            body: String::new()
        }
        .is_retryable());
        assert!(!RpcError::Http {
            status: 400,
            body: String::new()
        }
        .is_retryable());
        assert!(!RpcError::Malformed("bad".into()).is_retryable());
        assert!(RpcError::from_json_rpc(-32005, "limit exceeded".into()).is_retryable());
        assert!(!RpcError::from_json_rpc(-32602, "invalid params".into()).is_retryable());
    }

    #[test]
    fn transport_errors_keep_their_retry_class() {
        assert_eq!(
            RpcError::from(TransportErrorKind::http_error(429, "slow down".into())),
            RpcError::RateLimited("slow down".into())
        );
        assert_eq!(
            RpcError::from(TransportErrorKind::http_error(502, "bad gateway".into())),
            RpcError::Http {
                status: 502,
                body: "bad gateway".into()
            }
        );
        assert!(RpcError::from(TransportErrorKind::custom_str("connection reset")).is_retryable());
        assert!(RpcError::from(TransportErrorKind::backend_gone()).is_retryable());
        assert!(!RpcError::from(TransportError::NullResp).is_retryable());
    }

    #[test]
    fn node_log_converts_with_position() {
        let json = serde_json::json!({
            "address": "0x5fbdb2315678afecb367f032d93f642f64180aa3",
            "topics": ["0x0000000000000000000000000000000000000000000000000000000000000001"],
            "data": "0x",
            "blockNumber": "0x1b4",
            "transactionHash": "0x0101010101010101010101010101010101010101010101010101010101010101",
            "logIndex": "0x2",
            "removed": false
        });
        let log: Log = serde_json::from_value(json).unwrap();
        let log = RawLog::try_from(log).unwrap();
        assert_eq!(log.block_number, 436);
        assert_eq!(log.log_index, 2);
        assert_eq!(log.topics.len(), 1);
        assert_eq!(log.transaction_hash, B256::repeat_byte(1));
    }

    #[test]
    fn pending_log_is_malformed() {
        let json = serde_json::json!({
            "address": "0x5fbdb2315678afecb367f032d93f642f64180aa3",
            "topics": [],
            "data": "0x",
            "blockNumber": null,
            "transactionHash": null,
            "logIndex": null
        });
        let log: Log = serde_json::from_value(json).unwrap();
        assert!(matches!(RawLog::try_from(log), Err(RpcError::Malformed(_))));
    }

    #[test]
    fn filter_serializes_as_quantities() {
        let filter = LogFilter {
            from_block: 16,
            to_block: 26,
            address: Address::ZERO,
        };
        let value = serde_json::to_value(Filter::from(&filter)).unwrap();
        assert_eq!(value["fromBlock"], "0x10");
        assert_eq!(value["toBlock"], "0x1a");
    }
}
