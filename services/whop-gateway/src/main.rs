//! Whop OAuth gateway
//!
//! Single-binary service that:
//! 1. Runs the OAuth authorization-code flow for connecting Whop accounts
//! 2. Stores the resulting credentials and refreshes them on demand
//! 3. Verifies and applies signed membership webhooks
//! 4. Syncs a connected company's members into the profile store

mod config;
mod error;
mod members;
mod metrics;
mod oauth;
mod webhook;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::http::HeaderName;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use common::Secret;
use metrics_exporter_prometheus::PrometheusHandle;
use whop_auth::{CredentialStore, OAuthClient, StateCodec};
use whop_broker::RefreshScheduler;
use whop_webhook::{ProfileStore, WebhookDispatcher};

use crate::config::Config;

/// How long in-flight requests get to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) oauth: Arc<OAuthClient>,
    pub(crate) codec: Arc<StateCodec>,
    pub(crate) credentials: Arc<CredentialStore>,
    pub(crate) broker: Arc<RefreshScheduler>,
    pub(crate) profiles: Arc<ProfileStore>,
    pub(crate) webhooks: Arc<WebhookDispatcher>,
    /// Client for provider API calls other than the token endpoint.
    pub(crate) http: reqwest::Client,
    pub(crate) memberships_url: String,
    pub(crate) frontend_origin: String,
    pub(crate) signature_header: HeaderName,
    pub(crate) started_at: Instant,
    pub(crate) prometheus: PrometheusHandle,
}

/// Build the axum router with all routes and shared state.
///
/// Applies a concurrency limit layer based on `max_connections`.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/oauth/start", get(oauth::start_handler))
        .route("/oauth/callback", get(oauth::callback_handler))
        .route("/webhook", post(webhook::webhook_handler))
        .route("/members/sync", post(members::sync_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting whop-gateway");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        frontend_origin = %config.server.frontend_origin,
        token_url = %config.oauth.token_url,
        client_auth = ?config.oauth.client_auth,
        webhook_secret = config.webhook.secret.is_some(),
        "configuration loaded"
    );

    let codec = match &config.oauth.state_key {
        Some(key) => StateCodec::new(
            Secret::new(key.expose().as_bytes().to_vec()),
            config.state_ttl(),
        ),
        None => {
            warn!("no OAUTH_STATE_KEY configured, using a per-process random key");
            StateCodec::with_random_key(config.state_ttl())
        }
    };

    let oauth = Arc::new(
        OAuthClient::new(config.client_config()?).context("failed to build OAuth client")?,
    );
    let credentials = Arc::new(
        CredentialStore::load(config.storage.credentials_path.clone())
            .await
            .context("failed to load credential store")?,
    );
    let profiles = Arc::new(
        ProfileStore::load(config.storage.profiles_path.clone())
            .await
            .context("failed to load profile store")?,
    );
    let http = reqwest::Client::builder()
        .timeout(config.timeout())
        .build()
        .context("failed to build HTTP client")?;

    let app_state = AppState {
        broker: Arc::new(RefreshScheduler::new(credentials.clone(), oauth.clone())),
        webhooks: Arc::new(WebhookDispatcher::new(
            config.webhook.secret.clone(),
            profiles.clone(),
        )),
        oauth,
        codec: Arc::new(codec),
        credentials,
        profiles,
        http,
        memberships_url: config.oauth.memberships_url.clone(),
        frontend_origin: config.server.frontend_origin.clone(),
        signature_header: config.webhook.header_name()?,
        started_at: Instant::now(),
        prometheus: prometheus_handle,
    };

    let app = build_router(app_state, config.server.max_connections);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timeout starts when the shutdown signal fires, not when the
    // server starts.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Health endpoint: status, uptime and store sizes.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "healthy",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "connected_accounts": state.credentials.len().await,
        "profiles": state.profiles.len().await,
        "active_profiles": state.profiles.active_count().await,
    });

    (
        axum::http::StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint — returns metrics in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
