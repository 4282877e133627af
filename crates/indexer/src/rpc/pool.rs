use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use order_indexer_domain::config::RpcSettings;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{info, warn};

use super::types::{LogFilter, RawLog, RpcError};
use super::ChainClient;

const DEFAULT_WEIGHT: u32 = 1;

/// Backoff parameters for [`RpcPool::execute_with_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&RpcSettings::default())
    }
}

impl From<&RpcSettings> for RetryConfig {
    fn from(settings: &RpcSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: settings.base_delay,
            max_delay: settings.max_delay,
            backoff_multiplier: settings.backoff_multiplier,
        }
    }
}

impl RetryConfig {
    /// `min(base_delay * multiplier^attempt, max_delay)`, saturating.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self
            .backoff_multiplier
            .checked_pow(attempt)
            .unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Per-call overrides; unset fields fall back to the pool's configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryOverrides {
    pub max_retries: Option<u32>,
    pub base_delay: Option<Duration>,
    pub max_delay: Option<Duration>,
    pub backoff_multiplier: Option<u32>,
}

impl RetryOverrides {
    fn apply(&self, base: &RetryConfig) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries.unwrap_or(base.max_retries),
            base_delay: self.base_delay.unwrap_or(base.base_delay),
            max_delay: self.max_delay.unwrap_or(base.max_delay),
            backoff_multiplier: self.backoff_multiplier.unwrap_or(base.backoff_multiplier),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("no active rpc providers available")]
    NoActiveProviders,
    #[error("provider {provider} failed permanently: {source}")]
    Permanent {
        provider: String,
        #[source]
        source: RpcError,
    },
    #[error("rpc retries exhausted after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: RpcError,
    },
}

/// Static description of one endpoint handed to [`RpcPool::new`].
pub struct ProviderConfig<C> {
    pub id: String,
    pub url: String,
    pub client: C,
    pub weight: Option<u32>,
    pub max_errors: Option<u32>,
}

impl<C> ProviderConfig<C> {
    pub fn new(id: impl Into<String>, url: impl Into<String>, client: C) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            client,
            weight: None,
            max_errors: None,
        }
    }
}

struct Provider<C> {
    id: String,
    url: String,
    client: Arc<C>,
    is_active: bool,
    last_used_at: Option<DateTime<Utc>>,
    error_count: u32,
    max_errors: u32,
    weight: u32,
}

struct PoolState<C> {
    providers: Vec<Provider<C>>,
    next_index: usize,
}

/// Provider chosen for one attempt.
pub struct SelectedProvider<C> {
    pub id: String,
    pub url: String,
    pub client: Arc<C>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    pub id: String,
    pub url: String,
    pub is_active: bool,
    pub error_count: u32,
    pub last_used_at: Option<DateTime<Utc>>,
    pub weight: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatus {
    pub total: usize,
    pub active: usize,
    pub providers: Vec<ProviderStatus>,
}

/// Interchangeable RPC endpoints with failover and exponential backoff.
///
/// All mutable provider state sits behind one mutex that is never held across
/// an `.await`; clones share that state.
pub struct RpcPool<C> {
    state: Arc<Mutex<PoolState<C>>>,
    retry: RetryConfig,
    default_max_errors: u32,
}

impl<C> Clone for RpcPool<C> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            retry: self.retry,
            default_max_errors: self.default_max_errors,
        }
    }
}

impl<C> RpcPool<C>
where
    C: ChainClient + 'static,
{
    pub fn new(
        providers: Vec<ProviderConfig<C>>,
        retry: RetryConfig,
        default_max_errors: u32,
    ) -> Self {
        let default_max_errors = default_max_errors.max(1);
        let providers = providers
            .into_iter()
            .map(|config| Provider {
                id: config.id,
                url: config.url,
                client: Arc::new(config.client),
                is_active: true,
                last_used_at: None,
                error_count: 0,
                max_errors: config.max_errors.unwrap_or(default_max_errors).max(1),
                weight: config.weight.unwrap_or(DEFAULT_WEIGHT),
            })
            .collect::<Vec<_>>();
        gauge!("rpc_active_providers").set(providers.len() as f64);

        Self {
            state: Arc::new(Mutex::new(PoolState {
                providers,
                next_index: 0,
            })),
            retry,
            default_max_errors,
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState<C>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn retry_config(&self) -> RetryConfig {
        self.retry
    }

    pub fn provider_count(&self) -> usize {
        self.lock().providers.len()
    }

    /// Round-robin over active providers only.
    pub fn next_provider(&self) -> Result<SelectedProvider<C>, PoolError> {
        let mut state = self.lock();
        let active: Vec<usize> = state
            .providers
            .iter()
            .enumerate()
            .filter(|(_, provider)| provider.is_active)
            .map(|(index, _)| index)
            .collect();
        if active.is_empty() {
            return Err(PoolError::NoActiveProviders);
        }

        let slot = state.next_index % active.len();
        state.next_index = (state.next_index + 1) % active.len();
        let provider = &mut state.providers[active[slot]];
        provider.last_used_at = Some(Utc::now());

        Ok(SelectedProvider {
            id: provider.id.clone(),
            url: provider.url.clone(),
            client: Arc::clone(&provider.client),
        })
    }

    pub fn mark_provider_error(&self, id: &str) {
        let mut state = self.lock();
        let Some(provider) = state.providers.iter_mut().find(|p| p.id == id) else {
            return;
        };
        provider.error_count = provider.error_count.saturating_add(1);
        if provider.is_active && provider.error_count >= provider.max_errors {
            provider.is_active = false;
            warn!(
                provider = id,
                errors = provider.error_count,
                "provider marked inactive due to too many errors"
            );
            counter!("rpc_provider_deactivations_total", "provider" => id.to_string())
                .increment(1);
        }
        let active = state.providers.iter().filter(|p| p.is_active).count();
        gauge!("rpc_active_providers").set(active as f64);
    }

    pub fn mark_provider_success(&self, id: &str) {
        let mut state = self.lock();
        let Some(provider) = state.providers.iter_mut().find(|p| p.id == id) else {
            return;
        };
        provider.error_count = 0;
        if !provider.is_active {
            provider.is_active = true;
            info!(provider = id, "provider reactivated");
        }
        let active = state.providers.iter().filter(|p| p.is_active).count();
        gauge!("rpc_active_providers").set(active as f64);
    }

    /// Operator override: clears the error count and reactivates. Returns
    /// `false` for an unknown id.
    pub fn reactivate_provider(&self, id: &str) -> bool {
        let mut state = self.lock();
        match state.providers.iter_mut().find(|p| p.id == id) {
            Some(provider) => {
                provider.is_active = true;
                provider.error_count = 0;
                info!(provider = id, "provider manually reactivated");
                true
            }
            None => false,
        }
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.lock();
        let providers: Vec<ProviderStatus> = state
            .providers
            .iter()
            .map(|p| ProviderStatus {
                id: p.id.clone(),
                url: p.url.clone(),
                is_active: p.is_active,
                error_count: p.error_count,
                last_used_at: p.last_used_at,
                weight: p.weight,
            })
            .collect();
        PoolStatus {
            total: providers.len(),
            active: providers.iter().filter(|p| p.is_active).count(),
            providers,
        }
    }

    pub async fn execute_with_retry<T, F, Fut>(&self, op: F) -> Result<T, PoolError>
    where
        F: Fn(Arc<C>) -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        self.execute_with_retry_config(RetryOverrides::default(), op)
            .await
    }

    /// Runs `op` on successive providers until it succeeds, fails with a
    /// non-retryable error, or `max_retries + 1` attempts have been made.
    pub async fn execute_with_retry_config<T, F, Fut>(
        &self,
        overrides: RetryOverrides,
        op: F,
    ) -> Result<T, PoolError>
    where
        F: Fn(Arc<C>) -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let config = overrides.apply(&self.retry);
        let mut attempt: u32 = 0;

        loop {
            let provider = self.next_provider()?;
            match op(Arc::clone(&provider.client)).await {
                Ok(value) => {
                    self.mark_provider_success(&provider.id);
                    counter!("rpc_requests_total", "provider" => provider.id, "result" => "ok")
                        .increment(1);
                    return Ok(value);
                }
                Err(err) if !err.is_retryable() => {
                    counter!("rpc_requests_total", "provider" => provider.id.clone(), "result" => "permanent")
                        .increment(1);
                    return Err(PoolError::Permanent {
                        provider: provider.id,
                        source: err,
                    });
                }
                Err(err) => {
                    self.mark_provider_error(&provider.id);
                    counter!("rpc_requests_total", "provider" => provider.id.clone(), "result" => "retryable")
                        .increment(1);

                    if attempt >= config.max_retries {
                        return Err(PoolError::RetriesExhausted {
                            attempts: attempt + 1,
                            source: err,
                        });
                    }

                    let delay = config.delay_for(attempt);
                    warn!(
                        provider = %provider.id,
                        attempt = attempt + 1,
                        max_attempts = config.max_retries + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "rpc request failed; retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    pub async fn block_number(&self) -> Result<u64, PoolError> {
        self.execute_with_retry(|client| async move { client.block_number().await })
            .await
    }

    pub async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, PoolError> {
        let filter = *filter;
        self.execute_with_retry(move |client| async move { client.get_logs(&filter).await })
            .await
    }

    /// Probes every provider once with `block_number`, outside the request
    /// path.
    pub async fn health_check(&self) {
        let targets: Vec<(String, Arc<C>)> = {
            let state = self.lock();
            state
                .providers
                .iter()
                .map(|p| (p.id.clone(), Arc::clone(&p.client)))
                .collect()
        };

        for (id, client) in targets {
            match client.block_number().await {
                Ok(_) => self.mark_provider_success(&id),
                Err(err) => {
                    warn!(provider = %id, error = %err, "health check failed");
                    self.mark_provider_error(&id);
                }
            }
        }
    }

    /// Starts the periodic probe. Returns `None` for a single-provider pool.
    pub fn spawn_health_probe(&self, every: Duration) -> Option<HealthProbeHandle> {
        if self.provider_count() <= 1 {
            return None;
        }

        let pool = self.clone();
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                pool.health_check().await;
            }
        });
        Some(HealthProbeHandle { task: Some(task) })
    }
}

/// Stops the background health probe when dropped.
#[derive(Debug)]
pub struct HealthProbeHandle {
    task: Option<JoinHandle<()>>,
}

impl HealthProbeHandle {
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for HealthProbeHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
