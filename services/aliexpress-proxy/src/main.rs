//! AliExpress affiliate proxy
//!
//! Single-binary Rust service that:
//! 1. Exposes a small JSON API for storefront clients
//! 2. Authenticates to the AliExpress open platform, either by signing each
//!    call with the app secret or with an OAuth access token
//! 3. Forwards catalog, order and tracking calls and maps the payloads

mod api;
mod catalog;
mod config;
mod error;
mod metrics;
mod oauth;

use std::sync::Arc;
use std::time::{Duration, Instant};

use aliexpress_auth::{Credentials, Endpoints, OAuthClient, TokenStore};
use anyhow::{Context, Result};
use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use provider::{AuthMode, OAuthModeClient, SignedApiClient, SignedModeClient};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tracing::{Instrument, error, info, info_span, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, DEFAULT_CONFIG_PATH};
use crate::oauth::OAuthFlow;

/// Time allowed for in-flight requests to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    client: Arc<dyn SignedApiClient>,
    oauth: Arc<OAuthFlow>,
    credentials: Arc<Credentials>,
    endpoints: Endpoints,
    base_url: String,
    prometheus: PrometheusHandle,
}

/// Wire the provider client for the configured auth mode.
///
/// Both modes share one token store so the OAuth routes work in either.
fn build_state(config: &Config, http: reqwest::Client, prometheus: PrometheusHandle) -> AppState {
    let credentials = Arc::new(config.credentials());
    let endpoints = Endpoints::from_base(&config.provider.base_url);
    let store = Arc::new(TokenStore::new());

    let client: Arc<dyn SignedApiClient> = match config.provider.auth_mode {
        AuthMode::Signed => Arc::new(SignedModeClient::new(
            http.clone(),
            &endpoints,
            credentials.clone(),
            config.provider.sign_method,
        )),
        AuthMode::OAuth => Arc::new(OAuthModeClient::new(
            http.clone(),
            &endpoints,
            credentials.clone(),
            store.clone(),
        )),
    };

    let oauth = Arc::new(OAuthFlow::new(
        OAuthClient::new(http, endpoints.clone()),
        credentials.clone(),
        store,
        &config.provider.redirect_uri,
        &config.provider.scope,
    ));

    AppState {
        client,
        oauth,
        credentials,
        endpoints,
        base_url: config.provider.base_url.clone(),
        prometheus,
    }
}

/// Build the axum router with all routes and shared state.
///
/// Every request passes through `track_request`; a concurrency limit layer
/// caps in-flight requests at `max_connections`.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/config", get(config_handler))
        .route("/metrics", get(metrics_handler))
        .route("/oauth/authorize", get(oauth::authorize))
        .route("/oauth/callback", get(oauth::callback))
        .route("/api/aliexpress/products", get(api::products))
        .route("/api/aliexpress/products/details", get(api::product_details))
        .route("/api/aliexpress/categories", get(api::categories))
        .route("/api/aliexpress/hot-products", get(api::hot_products))
        .route("/api/aliexpress/order", post(api::create_order))
        .route("/api/aliexpress/tracking", get(api::tracking))
        .fallback(not_found_handler)
        .layer(middleware::from_fn(track_request))
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

    info!("starting aliexpress-proxy");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    match &config_path {
        Some(path) => info!(path = %path.display(), "loading configuration"),
        None => info!(
            path = DEFAULT_CONFIG_PATH,
            "config file not found, using defaults and environment"
        ),
    }
    let config = Config::load(config_path.as_deref()).context("failed to load configuration")?;

    info!(
        listen_addr = %config.server.listen_addr,
        base_url = %config.provider.base_url,
        auth_mode = %config.provider.auth_mode,
        sign_method = %config.provider.sign_method,
        "configuration loaded"
    );

    let credentials = config.credentials();
    if !credentials.app_key_configured() {
        warn!("ALIEXPRESS_APP_KEY is not set, provider calls will be rejected");
    }
    if !credentials.app_secret_configured() {
        warn!("ALIEXPRESS_APP_SECRET is not set, provider calls will be rejected");
    }

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.provider.timeout_secs))
        .build()
        .context("failed to build HTTP client")?;

    let state = build_state(&config, http, prometheus_handle);
    let app = build_router(state, config.server.max_connections);

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
        Ok(Ok(Ok(()))) => info!("all in-flight requests drained"),
        Ok(Ok(Err(e))) => error!(error = %e, "server error during shutdown"),
        Ok(Err(e)) => error!(error = %e, "server task panicked"),
        Err(_) => warn!(
            drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "drain timeout exceeded, forcing shutdown"
        ),
    }

    info!("shutdown complete");
    Ok(())
}

/// Assign a request id, log completion and record request metrics.
async fn track_request(request: Request, next: Next) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    let method = request.method().to_string();
    let path = request.uri().path().to_owned();
    let span = info_span!("request", request_id = %request_id, method = %method, path = %path);

    let start = Instant::now();
    let mut response = next.run(request).instrument(span.clone()).await;
    let elapsed = start.elapsed();

    let status = response.status().as_u16();
    metrics::record_request(status, &method, elapsed.as_secs_f64());
    span.in_scope(|| {
        info!(
            status,
            duration_ms = elapsed.as_millis() as u64,
            "request completed"
        )
    });

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Service liveness plus which credentials are configured. Always 200.
async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "success": true,
        "message": "AliExpress proxy running",
        "app_key_configured": state.credentials.app_key_configured(),
        "app_secret_configured": state.credentials.app_secret_configured(),
        "tracking_id_configured": state.credentials.tracking_id_configured(),
        "api_base_url": state.endpoints.sync,
        "auth_mode": state.client.mode(),
        "authenticated": state.oauth.store().has_access_token().await,
    }))
}

/// Public client configuration. Never includes the app secret.
async fn config_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "success": true,
        "app_key": state.credentials.app_key(),
        "redirect_uri": state.oauth.redirect_uri(),
        "base_url": state.base_url,
        "auth_mode": state.client.mode(),
    }))
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

async fn not_found_handler() -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "success": false, "error": "not found" })),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
