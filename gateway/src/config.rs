//! Configuration loading
//!
//! All tunables live in one typed config with documented defaults. Values are
//! read from `.gateway.toml` (found by walking up the directory tree), then
//! overridden by CLI flags / environment via `main.rs`.

use anyhow::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Find a config file by walking up the directory tree from cwd.
///
/// Returns the path if found, None otherwise.
fn find_config_file(filename: &str) -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let candidate = current.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break, // Reached filesystem root
        }
    }

    None
}

/// One backend provider in the fallback chain, in declared priority order
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Unique provider id, used in health/circuit bookkeeping
    pub id: String,
    /// `"http"` for a real backend, `"static"` for the built-in local echo
    /// backend (dev and tests)
    #[serde(default = "default_provider_kind")]
    pub kind: String,
    /// Base URL for `http` providers
    #[serde(default)]
    pub base_url: Option<String>,
    /// Model identifier passed through to the backend
    #[serde(default)]
    pub model: Option<String>,
}

fn default_provider_kind() -> String {
    "http".to_string()
}

/// Gateway configuration (.gateway.toml)
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Port for the WebSocket + health listener
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bearer token clients must present in `hello`; unset disables auth
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Total concurrent tool executions across all sessions
    #[serde(default = "default_global_permits")]
    pub global_permits: usize,

    /// Concurrent tool executions allowed per session
    #[serde(default = "default_session_permits")]
    pub session_permits: usize,

    /// How long a request may wait for a global slot before fail-fast
    /// rejection
    #[serde(default = "default_admission_timeout_ms")]
    pub admission_timeout_ms: u64,

    /// Deadline for the first `hello` frame after connect
    #[serde(default = "default_hello_timeout_ms")]
    pub hello_timeout_ms: u64,

    /// Idle time after which a session with no in-flight work is swept
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,

    /// Fixed sweep interval, independent of request volume
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Overall per-tool execution deadline
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    /// Attempts per provider before falling back (first try included)
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Base delay for exponential backoff between retries
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Backoff ceiling
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,

    /// Consecutive failures that open a provider's circuit
    #[serde(default = "default_circuit_threshold")]
    pub circuit_threshold: u32,

    /// How long an open circuit refuses traffic
    #[serde(default = "default_circuit_cooldown_secs")]
    pub circuit_cooldown_secs: u64,

    /// Lifetime of a cached routing decision
    #[serde(default = "default_decision_ttl_secs")]
    pub decision_ttl_secs: u64,

    /// Per-provider bound on the startup warmup ping
    #[serde(default = "default_warmup_timeout_secs")]
    pub warmup_timeout_secs: u64,

    /// Provider fallback chain, highest priority first
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderConfig>,
}

fn default_port() -> u16 {
    7070
}
fn default_global_permits() -> usize {
    32
}
fn default_session_permits() -> usize {
    4
}
fn default_admission_timeout_ms() -> u64 {
    5_000
}
fn default_hello_timeout_ms() -> u64 {
    15_000
}
fn default_session_idle_secs() -> u64 {
    300
}
fn default_sweep_interval_secs() -> u64 {
    30
}
fn default_tool_timeout_secs() -> u64 {
    120
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    200
}
fn default_backoff_cap_ms() -> u64 {
    5_000
}
fn default_circuit_threshold() -> u32 {
    5
}
fn default_circuit_cooldown_secs() -> u64 {
    30
}
fn default_decision_ttl_secs() -> u64 {
    60
}
fn default_warmup_timeout_secs() -> u64 {
    10
}

fn default_providers() -> Vec<ProviderConfig> {
    vec![ProviderConfig {
        id: "local".to_string(),
        kind: "static".to_string(),
        base_url: None,
        model: None,
    }]
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            auth_token: None,
            global_permits: default_global_permits(),
            session_permits: default_session_permits(),
            admission_timeout_ms: default_admission_timeout_ms(),
            hello_timeout_ms: default_hello_timeout_ms(),
            session_idle_secs: default_session_idle_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            tool_timeout_secs: default_tool_timeout_secs(),
            retry_attempts: default_retry_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            circuit_threshold: default_circuit_threshold(),
            circuit_cooldown_secs: default_circuit_cooldown_secs(),
            decision_ttl_secs: default_decision_ttl_secs(),
            warmup_timeout_secs: default_warmup_timeout_secs(),
            providers: default_providers(),
        }
    }
}

impl GatewayConfig {
    /// Load config from `.gateway.toml`, falling back to defaults when the
    /// file is absent
    pub fn load() -> Result<Self> {
        if let Some(config_path) = find_config_file(".gateway.toml") {
            tracing::debug!("Loading gateway config from: {}", config_path.display());
            return Self::load_from_path(&config_path);
        }

        tracing::debug!("No .gateway.toml found, using defaults");
        Ok(Self::default())
    }

    /// Load from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: GatewayConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn admission_timeout(&self) -> Duration {
        Duration::from_millis(self.admission_timeout_ms)
    }

    pub fn hello_timeout(&self) -> Duration {
        Duration::from_millis(self.hello_timeout_ms)
    }

    pub fn session_idle(&self) -> Duration {
        Duration::from_secs(self.session_idle_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }

    pub fn circuit_cooldown(&self) -> Duration {
        Duration::from_secs(self.circuit_cooldown_secs)
    }

    pub fn decision_ttl(&self) -> Duration {
        Duration::from_secs(self.decision_ttl_secs)
    }

    pub fn warmup_timeout(&self) -> Duration {
        Duration::from_secs(self.warmup_timeout_secs)
    }
}
