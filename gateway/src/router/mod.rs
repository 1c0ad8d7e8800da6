//! Provider routing and failover engine
//!
//! Given a fallback chain in declared priority order, pick a healthy
//! provider, retry with backoff on retryable failures, and fall back down
//! the chain. Holds no socket state; safe to call from many concurrent
//! dispatches.

pub mod health;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use gate_protocol::GatewayError;
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::config::GatewayConfig;
use crate::providers::{ProviderClient, ProviderError, ProviderRequest, ProviderResponse};
use health::HealthBook;

/// Routing policy knobs, extracted from the gateway config
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Attempts per provider, first try included
    pub retry_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub circuit_threshold: u32,
    pub circuit_cooldown: Duration,
    pub decision_ttl: Duration,
}

impl RouterConfig {
    pub fn from_config(cfg: &GatewayConfig) -> Self {
        Self {
            retry_attempts: cfg.retry_attempts.max(1),
            backoff_base: cfg.backoff_base(),
            backoff_cap: cfg.backoff_cap(),
            circuit_threshold: cfg.circuit_threshold,
            circuit_cooldown: cfg.circuit_cooldown(),
            decision_ttl: cfg.decision_ttl(),
        }
    }
}

/// Cached choice of provider for a given tool/model requirement
struct RoutingDecision {
    provider_id: String,
    decided_at: Instant,
    ttl: Duration,
}

impl RoutingDecision {
    fn is_fresh(&self) -> bool {
        self.decided_at.elapsed() < self.ttl
    }
}

/// Selects, retries and falls back across the provider chain
pub struct ProviderRouter {
    chain: Vec<Arc<dyn ProviderClient>>,
    health: HealthBook,
    cache: Mutex<HashMap<String, RoutingDecision>>,
    cfg: RouterConfig,
}

impl ProviderRouter {
    pub fn new(chain: Vec<Arc<dyn ProviderClient>>, cfg: RouterConfig) -> Self {
        let health = HealthBook::new(cfg.circuit_threshold, cfg.circuit_cooldown);
        Self {
            chain,
            health,
            cache: Mutex::new(HashMap::new()),
            cfg,
        }
    }

    /// Health book, exposed for the health surface
    pub fn health(&self) -> &HealthBook {
        &self.health
    }

    fn cache_key(request: &ProviderRequest) -> String {
        format!(
            "{}::{}",
            request.tool,
            request.model.as_deref().unwrap_or("default")
        )
    }

    /// A still-fresh cached decision whose provider's circuit is closed.
    /// Stale or circuit-open entries are dropped on the way out.
    fn cached_provider(&self, key: &str) -> Option<Arc<dyn ProviderClient>> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let decision = cache.get(key)?;
        if !decision.is_fresh() || self.health.is_open(&decision.provider_id) {
            cache.remove(key);
            return None;
        }
        let id = decision.provider_id.clone();
        drop(cache);
        self.chain.iter().find(|p| p.id() == id).cloned()
    }

    fn remember(&self, key: &str, provider_id: &str) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.insert(
            key.to_string(),
            RoutingDecision {
                provider_id: provider_id.to_string(),
                decided_at: Instant::now(),
                ttl: self.cfg.decision_ttl,
            },
        );
    }

    fn invalidate(&self, key: &str) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.remove(key);
    }

    /// Exponential backoff with jitter, capped
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self
            .cfg
            .backoff_base
            .saturating_mul(1u32 << attempt.min(16))
            .min(self.cfg.backoff_cap);
        let jitter = rand::thread_rng().gen_range(0.5..1.0);
        exp.mul_f64(jitter)
    }

    /// Run one provider through the bounded retry loop. Returns the last
    /// error once attempts are exhausted; permanent errors short-circuit.
    async fn call_with_retries(
        &self,
        provider: &Arc<dyn ProviderClient>,
        request: &ProviderRequest,
        cancel: &CancellationToken,
    ) -> Result<ProviderResponse, ProviderError> {
        let mut last_err = ProviderError::Connect("no attempt made".to_string());
        for attempt in 0..self.cfg.retry_attempts {
            if attempt > 0 {
                let delay = self.backoff_delay(attempt - 1);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                }
            }

            match provider.call(request, cancel).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable() => {
                    tracing::debug!(
                        "Provider {} attempt {}/{} failed: {}",
                        provider.id(),
                        attempt + 1,
                        self.cfg.retry_attempts,
                        err
                    );
                    last_err = err;
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err)
    }

    /// Select a provider for `request`, execute with retry/fallback, and
    /// keep per-provider health current.
    pub async fn route(
        &self,
        request: &ProviderRequest,
        cancel: &CancellationToken,
    ) -> Result<ProviderResponse, GatewayError> {
        let key = Self::cache_key(request);
        let mut skip_id: Option<String> = None;

        // Fast path: a cached, healthy decision
        if let Some(provider) = self.cached_provider(&key) {
            match self.call_with_retries(&provider, request, cancel).await {
                Ok(response) => {
                    self.health.record_success(provider.id());
                    self.remember(&key, provider.id());
                    return Ok(response);
                }
                Err(err) if err.is_retryable() => {
                    self.invalidate(&key);
                    if self.health.record_failure(provider.id()) {
                        tracing::warn!("Circuit opened for provider {}", provider.id());
                    }
                    // Already exhausted retries here; don't try it again in
                    // the chain scan below.
                    skip_id = Some(provider.id().to_string());
                }
                Err(err) => {
                    self.invalidate(&key);
                    return Err(map_permanent(err));
                }
            }
        }

        for provider in &self.chain {
            if skip_id.as_deref() == Some(provider.id()) {
                continue;
            }
            if self.health.is_open(provider.id()) {
                tracing::debug!("Skipping provider {} (circuit open)", provider.id());
                continue;
            }

            match self.call_with_retries(provider, request, cancel).await {
                Ok(response) => {
                    self.health.record_success(provider.id());
                    self.remember(&key, provider.id());
                    return Ok(response);
                }
                Err(err) if err.is_retryable() => {
                    if self.health.record_failure(provider.id()) {
                        tracing::warn!("Circuit opened for provider {}", provider.id());
                    }
                    tracing::info!(
                        "Provider {} exhausted, falling back: {}",
                        provider.id(),
                        err
                    );
                }
                Err(ProviderError::Cancelled) => {
                    return Err(GatewayError::Timeout("provider call cancelled".to_string()));
                }
                Err(err) => return Err(map_permanent(err)),
            }
        }

        Err(GatewayError::ProviderUnavailable(
            "all providers in the chain are exhausted or circuit-open".to_string(),
        ))
    }
}

/// Permanent failures propagate as request-terminal tool errors; they would
/// fail identically on every provider, so no fallback.
fn map_permanent(err: ProviderError) -> GatewayError {
    match err {
        ProviderError::Cancelled => GatewayError::Timeout("provider call cancelled".to_string()),
        other => GatewayError::ToolExecution(other.to_string()),
    }
}
