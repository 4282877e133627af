//! Environment-driven configuration structures shared by all subcommands.

use std::{env, num::ParseIntError, str::FromStr, time::Duration};

use alloy_primitives::Address;
use thiserror::Error;

/// Store-only configuration for subcommands that never talk to the chain
/// (`init-db`, `start-processor`, `start-notifier`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    database_url: String,
    initialization_block: u64,
    processor: ProcessorSettings,
}

impl StoreConfig {
    pub fn load_from_env() -> Result<Self, ConfigError> {
        hydrate_env_file()?;

        Ok(Self {
            database_url: get_required_var("DATABASE_URL")?,
            initialization_block: get_number_or("INITIALIZATION_BLOCK", 0)?,
            processor: ProcessorSettings::from_env()?,
        })
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn initialization_block(&self) -> u64 {
        self.initialization_block
    }

    pub fn processor(&self) -> &ProcessorSettings {
        &self.processor
    }
}

/// Full configuration for subcommands that reach the chain (`start-scanner`,
/// `reindex`, `rpc-status`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexerConfig {
    store: StoreConfig,
    rpc_urls: Vec<String>,
    contract_address: Address,
    rpc: RpcSettings,
    scanner: ScannerSettings,
}

impl IndexerConfig {
    pub fn load_from_env() -> Result<Self, ConfigError> {
        let store = StoreConfig::load_from_env()?;

        let rpc_urls: Vec<String> = get_required_var("RPC_URLS")?
            .split(',')
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .collect();
        if rpc_urls.is_empty() {
            return Err(ConfigError::MissingVar { key: "RPC_URLS" });
        }

        let raw_address = get_required_var("CONTRACT_ADDRESS")?;
        let contract_address =
            Address::from_str(&raw_address).map_err(|err| ConfigError::InvalidValue {
                key: "CONTRACT_ADDRESS",
                reason: err.to_string(),
            })?;

        Ok(Self {
            store,
            rpc_urls,
            contract_address,
            rpc: RpcSettings::from_env()?,
            scanner: ScannerSettings::from_env()?,
        })
    }

    pub fn store(&self) -> &StoreConfig {
        &self.store
    }

    pub fn database_url(&self) -> &str {
        self.store.database_url()
    }

    pub fn rpc_urls(&self) -> &[String] {
        &self.rpc_urls
    }

    pub fn contract_address(&self) -> Address {
        self.contract_address
    }

    pub fn rpc(&self) -> &RpcSettings {
        &self.rpc
    }

    pub fn scanner(&self) -> &ScannerSettings {
        &self.scanner
    }
}

/// Retry, failover and health-probe knobs for the RPC pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcSettings {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: u32,
    pub max_errors: u32,
    pub health_check_interval: Duration,
    pub request_timeout: Duration,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            max_retries: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(30_000),
            backoff_multiplier: 2,
            max_errors: 5,
            health_check_interval: Duration::from_millis(5_000),
            request_timeout: Duration::from_millis(10_000),
        }
    }
}

impl RpcSettings {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            max_retries: get_number_or("RPC_MAX_RETRIES", defaults.max_retries)?,
            base_delay: get_millis_or("RPC_BASE_DELAY_MS", defaults.base_delay)?,
            max_delay: get_millis_or("RPC_MAX_DELAY_MS", defaults.max_delay)?,
            backoff_multiplier: get_number_or(
                "RPC_BACKOFF_MULTIPLIER",
                defaults.backoff_multiplier,
            )?,
            max_errors: get_number_or("RPC_MAX_ERRORS", defaults.max_errors)?.max(1),
            health_check_interval: get_millis_or(
                "RPC_HEALTH_CHECK_MS",
                defaults.health_check_interval,
            )?,
            request_timeout: get_millis_or("RPC_TIMEOUT_MS", defaults.request_timeout)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScannerSettings {
    pub batch_size: u64,
    pub idle_interval: Duration,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            idle_interval: Duration::from_millis(1_000),
        }
    }
}

impl ScannerSettings {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let batch_size = get_number_or("SCAN_BATCH_SIZE", defaults.batch_size)?;
        if batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SCAN_BATCH_SIZE",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(Self {
            batch_size,
            idle_interval: get_millis_or("SCAN_IDLE_MS", defaults.idle_interval)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorSettings {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub poll_interval: Duration,
    pub visibility_timeout: Duration,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_millis(5_000),
            poll_interval: Duration::from_millis(500),
            visibility_timeout: Duration::from_millis(30_000),
        }
    }
}

impl ProcessorSettings {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            max_attempts: get_number_or("PROCESSOR_MAX_ATTEMPTS", defaults.max_attempts)?,
            retry_delay: get_millis_or("PROCESSOR_RETRY_DELAY_MS", defaults.retry_delay)?,
            poll_interval: get_millis_or("QUEUE_POLL_MS", defaults.poll_interval)?,
            visibility_timeout: get_millis_or(
                "QUEUE_VISIBILITY_TIMEOUT_MS",
                defaults.visibility_timeout,
            )?,
        })
    }
}

fn get_required_var(key: &'static str) -> Result<String, ConfigError> {
    get_optional_var(key).ok_or(ConfigError::MissingVar { key })
}

fn get_optional_var(key: &'static str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn get_number_or<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr<Err = ParseIntError>,
{
    match get_optional_var(key) {
        Some(raw) => raw
            .parse()
            .map_err(|source| ConfigError::InvalidNumber { key, source }),
        None => Ok(default),
    }
}

fn get_millis_or(key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    let millis = get_number_or(key, u64::try_from(default.as_millis()).unwrap_or(u64::MAX))?;
    Ok(Duration::from_millis(millis))
}

pub fn hydrate_env_file() -> Result<(), ConfigError> {
    if env::var_os("ORDER_INDEXER_SKIP_DOTENV").is_some() {
        return Ok(());
    }
    match dotenvy::dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(ConfigError::Dotenv { source: err }),
    }

    Ok(())
}

/// Errors emitted when `.env` hydration or environment parsing fails.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable `{key}`")]
    MissingVar { key: &'static str },
    #[error("invalid integer in `{key}`: {source}")]
    InvalidNumber {
        key: &'static str,
        #[source]
        source: ParseIntError,
    },
    #[error("invalid value in `{key}`: {reason}")]
    InvalidValue { key: &'static str, reason: String },
    #[error("failed to load .env file: {source}")]
    Dotenv {
        #[from]
        source: dotenvy::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_GUARD: Mutex<()> = Mutex::new(());

    const TUNABLES: &[&str] = &[
        "INITIALIZATION_BLOCK",
        "SCAN_BATCH_SIZE",
        "SCAN_IDLE_MS",
        "RPC_MAX_RETRIES",
        "RPC_BASE_DELAY_MS",
        "RPC_MAX_DELAY_MS",
        "RPC_BACKOFF_MULTIPLIER",
        "RPC_MAX_ERRORS",
        "RPC_HEALTH_CHECK_MS",
        "RPC_TIMEOUT_MS",
        "PROCESSOR_MAX_ATTEMPTS",
        "PROCESSOR_RETRY_DELAY_MS",
        "QUEUE_POLL_MS",
        "QUEUE_VISIBILITY_TIMEOUT_MS",
    ];

    fn set_env() {
        std::env::set_var("ORDER_INDEXER_SKIP_DOTENV", "1");
        std::env::set_var("DATABASE_URL", "sqlite://test.db");
        std::env::set_var(
            "RPC_URLS",
            "http://localhost:8545, http://localhost:8546",
        );
        std::env::set_var(
            "CONTRACT_ADDRESS",
            "0x5FbDB2315678afecb367f032d93F642f64180aa3",
        );
        for key in TUNABLES {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn indexer_config_reads_env_with_defaults() {
        let _guard = ENV_GUARD.lock().unwrap();
        set_env();

        let config = IndexerConfig::load_from_env().expect("config loads");
        assert_eq!(config.database_url(), "sqlite://test.db");
        assert_eq!(
            config.rpc_urls(),
            ["http://localhost:8545", "http://localhost:8546"]
        );
        assert_eq!(config.store().initialization_block(), 0);
        assert_eq!(*config.rpc(), RpcSettings::default());
        assert_eq!(*config.scanner(), ScannerSettings::default());
        assert_eq!(*config.store().processor(), ProcessorSettings::default());
    }

    #[test]
    fn tunables_override_defaults() {
        let _guard = ENV_GUARD.lock().unwrap();
        set_env();
        std::env::set_var("INITIALIZATION_BLOCK", "100");
        std::env::set_var("SCAN_BATCH_SIZE", "25");
        std::env::set_var("RPC_MAX_RETRIES", "4");
        std::env::set_var("RPC_BASE_DELAY_MS", "10");
        std::env::set_var("PROCESSOR_MAX_ATTEMPTS", "7");

        let config = IndexerConfig::load_from_env().expect("config loads");
        assert_eq!(config.store().initialization_block(), 100);
        assert_eq!(config.scanner().batch_size, 25);
        assert_eq!(config.rpc().max_retries, 4);
        assert_eq!(config.rpc().base_delay, Duration::from_millis(10));
        assert_eq!(config.store().processor().max_attempts, 7);

        set_env();
    }

    #[test]
    fn store_config_only_requires_database_url() {
        let _guard = ENV_GUARD.lock().unwrap();
        set_env();
        std::env::remove_var("RPC_URLS");
        std::env::remove_var("CONTRACT_ADDRESS");

        let config = StoreConfig::load_from_env().expect("store config loads");
        assert_eq!(config.database_url(), "sqlite://test.db");
        assert!(matches!(
            IndexerConfig::load_from_env().unwrap_err(),
            ConfigError::MissingVar { key: "RPC_URLS" }
        ));

        set_env();
    }

    #[test]
    fn malformed_values_are_reported_by_key() {
        let _guard = ENV_GUARD.lock().unwrap();
        set_env();
        std::env::set_var("SCAN_BATCH_SIZE", "ten");
        assert!(matches!(
            IndexerConfig::load_from_env().unwrap_err(),
            ConfigError::InvalidNumber {
                key: "SCAN_BATCH_SIZE",
                ..
            }
        ));

        std::env::set_var("SCAN_BATCH_SIZE", "0");
        assert!(matches!(
            IndexerConfig::load_from_env().unwrap_err(),
            ConfigError::InvalidValue {
                key: "SCAN_BATCH_SIZE",
                ..
            }
        ));

        std::env::remove_var("SCAN_BATCH_SIZE");
        std::env::set_var("CONTRACT_ADDRESS", "0x1234");
        assert!(matches!(
            IndexerConfig::load_from_env().unwrap_err(),
            ConfigError::InvalidValue {
                key: "CONTRACT_ADDRESS",
                ..
            }
        ));

        set_env();
    }

    #[test]
    fn empty_required_env_var_is_treated_as_missing() {
        let _guard = ENV_GUARD.lock().unwrap();
        set_env();
        std::env::set_var("DATABASE_URL", "   ");

        let err = StoreConfig::load_from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingVar {
                key: "DATABASE_URL"
            }
        ));

        set_env();
    }
}
