//! Startup warmup for external dependencies
//!
//! Pings every configured provider in parallel so the first real request
//! does not pay cold-start latency. A failed warmup is logged and recorded
//! but never stops the daemon from accepting connections.

use futures_util::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::providers::ProviderClient;

/// Outcome of one provider's warmup ping
#[derive(Debug, Clone, Serialize)]
pub struct WarmupEntry {
    pub provider_id: String,
    pub ok: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Warmup results, exposed on the health surface
#[derive(Debug, Clone, Default, Serialize)]
pub struct WarmupReport {
    pub entries: Vec<WarmupEntry>,
}

impl WarmupReport {
    pub fn all_ok(&self) -> bool {
        self.entries.iter().all(|e| e.ok)
    }
}

/// Ping every provider once, in parallel, each bounded by `timeout`
pub async fn run(providers: &[Arc<dyn ProviderClient>], timeout: Duration) -> WarmupReport {
    let pings = providers.iter().map(|provider| {
        let provider = Arc::clone(provider);
        async move {
            let started = Instant::now();
            let result = tokio::time::timeout(timeout, provider.ping()).await;
            let latency_ms = started.elapsed().as_millis() as u64;
            match result {
                Ok(Ok(())) => {
                    tracing::info!("Warmup ok for provider {} ({}ms)", provider.id(), latency_ms);
                    WarmupEntry {
                        provider_id: provider.id().to_string(),
                        ok: true,
                        latency_ms,
                        error: None,
                    }
                }
                Ok(Err(e)) => {
                    tracing::warn!("Warmup failed for provider {}: {}", provider.id(), e);
                    WarmupEntry {
                        provider_id: provider.id().to_string(),
                        ok: false,
                        latency_ms,
                        error: Some(e.to_string()),
                    }
                }
                Err(_) => {
                    tracing::warn!("Warmup timed out for provider {}", provider.id());
                    WarmupEntry {
                        provider_id: provider.id().to_string(),
                        ok: false,
                        latency_ms,
                        error: Some("warmup timed out".to_string()),
                    }
                }
            }
        }
    });

    WarmupReport {
        entries: join_all(pings).await,
    }
}
