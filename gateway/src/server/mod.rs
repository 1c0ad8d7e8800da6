//! HTTP/WebSocket server
//!
//! One axum router carries both surfaces: the client protocol on `/ws` and
//! the operator-facing health check on `/healthz`.

use anyhow::Result;
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::admission::AdmissionController;
use crate::audit::AuditSink;
use crate::auth::TokenVerifier;
use crate::config::GatewayConfig;
use crate::dispatch::Dispatcher;
use crate::providers;
use crate::router::{ProviderRouter, RouterConfig};
use crate::session::{self, SessionRegistry};
use crate::tools::ToolRegistry;
use crate::warmup::{self, WarmupReport};

pub mod ws;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub sessions: Arc<SessionRegistry>,
    pub admission: Arc<AdmissionController>,
    pub dispatcher: Arc<Dispatcher>,
    pub router: Arc<ProviderRouter>,
    pub verifier: TokenVerifier,
    pub audit: AuditSink,
    pub warmup: Arc<WarmupReport>,
    /// Cancelled on daemon shutdown; every connection derives from it
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wire up every component from config, run warmup, start the sweeper.
    ///
    /// Warmup is bounded per provider and failures are non-fatal; the
    /// gateway accepts connections either way.
    pub async fn build(config: GatewayConfig) -> Result<Self> {
        let shutdown = CancellationToken::new();

        let chain = providers::build_chain(&config.providers, config.tool_timeout())?;
        let warmup = Arc::new(warmup::run(&chain, config.warmup_timeout()).await);
        if !warmup.all_ok() {
            tracing::warn!("Some providers failed warmup; continuing anyway");
        }

        let router = Arc::new(ProviderRouter::new(
            chain,
            RouterConfig::from_config(&config),
        ));
        let registry = Arc::new(ToolRegistry::with_builtins(Arc::clone(&router)));
        let admission = Arc::new(AdmissionController::new(
            config.global_permits,
            config.session_permits,
            config.admission_timeout(),
        ));
        let audit = AuditSink::spawn_logger(shutdown.clone());
        let dispatcher = Arc::new(Dispatcher::new(
            registry,
            Arc::clone(&admission),
            audit.clone(),
            config.tool_timeout(),
        ));

        let sessions = Arc::new(SessionRegistry::new());
        session::spawn_sweeper(
            Arc::clone(&sessions),
            Arc::clone(&admission),
            config.sweep_interval(),
            config.session_idle(),
            shutdown.clone(),
        );

        let verifier = TokenVerifier::new(config.auth_token.clone());

        Ok(Self {
            config: Arc::new(config),
            sessions,
            admission,
            dispatcher,
            router,
            verifier,
            audit,
            warmup,
            shutdown,
        })
    }
}

/// Create the router with all routes
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/healthz", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the gateway on the configured port
pub async fn serve(config: GatewayConfig) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let state = AppState::build(config).await?;
    let app = create_router(state);

    tracing::info!("Gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Serve on an already-bound listener (tests bind port 0)
pub async fn serve_with_listener(listener: tokio::net::TcpListener, state: AppState) -> Result<()> {
    let app = create_router(state);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Liveness plus warmup, admission-pool and circuit status
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "sessions": state.sessions.len(),
        "admission": {
            "available": state.admission.available_global(),
            "capacity": state.admission.global_capacity(),
        },
        "warmup": state.warmup.as_ref(),
        "providers": state.router.health().snapshot(),
    }))
}
