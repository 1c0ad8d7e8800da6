//! Provider client abstraction
//!
//! Vendor payload shapes are out of scope; a backend only has to answer a
//! generic JSON invoke call and a trivial ping. The router never sees
//! anything but this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::ProviderConfig;

/// Failure classes for a provider call. Retry policy keys off
/// [`ProviderError::is_retryable`].
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("rate limited")]
    RateLimited,

    #[error("server error: {0}")]
    Server(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("call cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Timeouts, connection failures and 429/5xx-equivalents are worth
    /// retrying; bad requests and auth failures never are.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Connect(_) | Self::RateLimited | Self::Server(_)
        )
    }
}

/// Request handed to a provider backend
#[derive(Debug, Clone, Serialize)]
pub struct ProviderRequest {
    pub tool: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub input: Value,
}

/// Response from a provider backend
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderResponse {
    #[serde(default)]
    pub provider_id: String,
    #[serde(default)]
    pub model: Option<String>,
    pub output: Value,
}

/// One interchangeable backend in the fallback chain
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Stable id used for health/circuit bookkeeping
    fn id(&self) -> &str;

    /// Execute one call; must observe `cancel` promptly
    async fn call(
        &self,
        request: &ProviderRequest,
        cancel: &CancellationToken,
    ) -> Result<ProviderResponse, ProviderError>;

    /// Trivial verifying call used by warmup and health checks
    async fn ping(&self) -> Result<(), ProviderError>;
}

// ============================================================================
// HTTP provider
// ============================================================================

/// Generic JSON-over-HTTP backend: POST `{base_url}/v1/invoke`, GET
/// `{base_url}/healthz` for ping
pub struct HttpProvider {
    id: String,
    base_url: String,
    model: Option<String>,
    client: reqwest::Client,
}

impl HttpProvider {
    pub fn new(id: &str, base_url: &str, model: Option<String>, call_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(call_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            id: id.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            client,
        }
    }

    fn classify(err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_connect() {
            ProviderError::Connect(err.to_string())
        } else {
            ProviderError::Server(err.to_string())
        }
    }

    fn classify_status(status: reqwest::StatusCode, body: String) -> ProviderError {
        match status.as_u16() {
            429 => ProviderError::RateLimited,
            401 | 403 => ProviderError::Auth(body),
            400..=499 => ProviderError::BadRequest(body),
            _ => ProviderError::Server(format!("{status}: {body}")),
        }
    }
}

#[async_trait]
impl ProviderClient for HttpProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn call(
        &self,
        request: &ProviderRequest,
        cancel: &CancellationToken,
    ) -> Result<ProviderResponse, ProviderError> {
        let mut request = request.clone();
        if request.model.is_none() {
            request.model = self.model.clone();
        }

        let url = format!("{}/v1/invoke", self.base_url);
        let send = self.client.post(&url).json(&request).send();

        let response = tokio::select! {
            res = send => res.map_err(Self::classify)?,
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, body));
        }

        let mut parsed: ProviderResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Server(format!("bad response body: {e}")))?;
        if parsed.provider_id.is_empty() {
            parsed.provider_id = self.id.clone();
        }
        Ok(parsed)
    }

    async fn ping(&self) -> Result<(), ProviderError> {
        let url = format!("{}/healthz", self.base_url);
        let response = self.client.get(&url).send().await.map_err(Self::classify)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::classify_status(
                response.status(),
                "ping failed".to_string(),
            ))
        }
    }
}

// ============================================================================
// Static provider
// ============================================================================

/// In-process backend that echoes its input. Used as the default dev chain
/// and as the deterministic end of test chains.
pub struct StaticProvider {
    id: String,
    model: Option<String>,
}

impl StaticProvider {
    pub fn new(id: &str, model: Option<String>) -> Self {
        Self {
            id: id.to_string(),
            model,
        }
    }
}

#[async_trait]
impl ProviderClient for StaticProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn call(
        &self,
        request: &ProviderRequest,
        _cancel: &CancellationToken,
    ) -> Result<ProviderResponse, ProviderError> {
        Ok(ProviderResponse {
            provider_id: self.id.clone(),
            model: self.model.clone(),
            output: serde_json::json!({
                "tool": request.tool,
                "echo": request.input,
            }),
        })
    }

    async fn ping(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Build the provider chain from config, priority order preserved
pub fn build_chain(
    configs: &[ProviderConfig],
    call_timeout: Duration,
) -> anyhow::Result<Vec<Arc<dyn ProviderClient>>> {
    let mut chain: Vec<Arc<dyn ProviderClient>> = Vec::with_capacity(configs.len());
    for cfg in configs {
        match cfg.kind.as_str() {
            "static" => chain.push(Arc::new(StaticProvider::new(&cfg.id, cfg.model.clone()))),
            "http" => {
                let base_url = cfg.base_url.as_deref().ok_or_else(|| {
                    anyhow::anyhow!("provider '{}' is http but has no base_url", cfg.id)
                })?;
                chain.push(Arc::new(HttpProvider::new(
                    &cfg.id,
                    base_url,
                    cfg.model.clone(),
                    call_timeout,
                )));
            }
            other => anyhow::bail!("provider '{}' has unknown kind '{}'", cfg.id, other),
        }
    }
    if chain.is_empty() {
        anyhow::bail!("provider chain is empty");
    }
    Ok(chain)
}
