use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use toolgate::config::GatewayConfig;
use toolgate::providers;
use toolgate::server;
use toolgate::warmup;

#[derive(Parser)]
#[command(name = "gateway")]
#[command(about = "AI tool-call gateway daemon")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Listen port (overrides .gateway.toml)
    #[arg(long, env = "GATEWAY_PORT")]
    port: Option<u16>,

    /// Bearer token clients must present; unset disables auth
    #[arg(long, env = "GATEWAY_TOKEN")]
    token: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway daemon
    Serve {
        /// Total concurrent tool executions across all sessions
        #[arg(long, env = "GATEWAY_GLOBAL_PERMITS")]
        global_permits: Option<usize>,

        /// Concurrent tool executions allowed per session
        #[arg(long, env = "GATEWAY_SESSION_PERMITS")]
        session_permits: Option<usize>,
    },
    /// Ping every configured provider and report health
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = GatewayConfig::load()?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    if cli.token.is_some() {
        config.auth_token = cli.token;
    }

    match cli.command {
        Commands::Serve {
            global_permits,
            session_permits,
        } => {
            if let Some(n) = global_permits {
                config.global_permits = n;
            }
            if let Some(n) = session_permits {
                config.session_permits = n;
            }
            server::serve(config).await
        }
        Commands::Check => run_check(config).await,
    }
}

/// Ping the provider chain once and report, non-zero exit on any failure
async fn run_check(config: GatewayConfig) -> Result<()> {
    let chain = providers::build_chain(&config.providers, config.tool_timeout())?;
    let report = warmup::run(&chain, config.warmup_timeout()).await;

    for entry in &report.entries {
        if entry.ok {
            tracing::info!("provider {}: ok ({}ms)", entry.provider_id, entry.latency_ms);
        } else {
            tracing::warn!(
                "provider {}: FAILED ({})",
                entry.provider_id,
                entry.error.as_deref().unwrap_or("unknown")
            );
        }
    }

    if report.all_ok() {
        Ok(())
    } else {
        anyhow::bail!("one or more providers failed the health check")
    }
}
