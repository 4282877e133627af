use std::{env, net::SocketAddr};

use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::hydrate_env_file;

static SUBSCRIBER_INSTALLED: OnceCell<()> = OnceCell::new();
static METRICS_ADDRESS: OnceCell<Option<SocketAddr>> = OnceCell::new();

/// Shared observability options for binaries.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    log_filter: String,
    metrics_address: Option<String>,
}

impl TelemetryConfig {
    /// Reads `<PREFIX>_LOG_FILTER` and `<PREFIX>_METRICS_ADDRESS`, e.g.
    /// `SCANNER_LOG_FILTER`. Missing entries fall back to `info` and no
    /// exporter.
    pub fn from_env(prefix: &str) -> Self {
        let _ = hydrate_env_file();
        let upper = prefix.trim().to_ascii_uppercase();
        let log_key = format!("{}_LOG_FILTER", upper);
        let metrics_key = format!("{}_METRICS_ADDRESS", upper);

        let log_filter = env::var(log_key).unwrap_or_else(|_| "info".to_string());
        let metrics_address = env::var(metrics_key).ok().and_then(|value| {
            if value.trim().is_empty() {
                None
            } else {
                Some(value)
            }
        });

        Self {
            log_filter,
            metrics_address,
        }
    }

    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    pub fn metrics_address(&self) -> Option<&str> {
        self.metrics_address.as_deref()
    }
}

/// Guard returned after telemetry initialization.
#[derive(Debug, Clone, Copy)]
pub struct TelemetryGuard {
    metrics_address: Option<SocketAddr>,
}

impl TelemetryGuard {
    /// Address the Prometheus exporter listens on, if one was requested.
    pub fn metrics_address(&self) -> Option<SocketAddr> {
        self.metrics_address
    }
}

/// Centralized helper to wire up tracing + metrics exporters once per process.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    install_tracing(config)?;
    let metrics_address = install_metrics(config)?;

    info!(
        log_filter = config.log_filter(),
        metrics_address = config.metrics_address().unwrap_or("disabled"),
        "telemetry initialized"
    );

    Ok(TelemetryGuard { metrics_address })
}

fn install_tracing(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    if SUBSCRIBER_INSTALLED.get().is_some() {
        return Ok(());
    }

    let env_filter = EnvFilter::try_new(config.log_filter())
        .map_err(|err| TelemetryError::InvalidLogFilter(err.to_string()))?;

    if SUBSCRIBER_INSTALLED.set(()).is_ok() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
            .map_err(|err| TelemetryError::Tracing(err.to_string()))?;
    }

    Ok(())
}

/// Installs the Prometheus recorder and its HTTP listener. Without an address
/// no recorder is installed and the metric macros stay no-ops.
fn install_metrics(config: &TelemetryConfig) -> Result<Option<SocketAddr>, TelemetryError> {
    METRICS_ADDRESS
        .get_or_try_init(|| {
            let Some(addr) = config.metrics_address() else {
                return Ok(None);
            };
            let socket: SocketAddr = addr.parse().map_err(|err: std::net::AddrParseError| {
                TelemetryError::InvalidMetricsAddress(addr.to_string(), err.to_string())
            })?;

            PrometheusBuilder::new()
                .with_http_listener(socket)
                .install()
                .map_err(|err| TelemetryError::Metrics(err.to_string()))?;
            Ok(Some(socket))
        })
        .copied()
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid log filter: {0}")]
    InvalidLogFilter(String),
    #[error("failed to install tracing subscriber: {0}")]
    Tracing(String),
    #[error("invalid metrics address `{0}`: {1}")]
    InvalidMetricsAddress(String, String),
    #[error("failed to install metrics recorder: {0}")]
    Metrics(String),
}
