//! Companion API auth service
//!
//! Single-binary Rust service that:
//! 1. Signs players in against Frontier with OAuth2 + PKCE
//! 2. Keeps their upstream tokens fresh in the background
//! 3. Issues a signed session cookie to the web client
//! 4. Proxies and caches companion API calls on their behalf

mod cmdr;
mod config;
mod error;
mod metrics;
mod proxy;
mod session;
mod signin;
#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, ORIGIN,
};
use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use common::{Clock, SystemClock};
use metrics_exporter_prometheus::PrometheusHandle;
use token_refresh::{RefreshScheduler, spawn_refresh_task};
use token_store::{CacheStore, Database, SessionStore};
use tokio::net::TcpListener;
use tracing::{Instrument, debug, error, info, info_span, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, Environment};
use crate::error::InternalFault;
use crate::proxy::UpstreamProxy;
use crate::session::{CookieSettings, CredentialIssuer};
use crate::signin::{SignInAttempts, SignInFlow};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum time in-flight requests get to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on any single upstream call.
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub(crate) struct AppState {
    pub environment: Environment,
    pub clock: Arc<dyn Clock>,
    pub sessions: SessionStore,
    pub credentials: Arc<CredentialIssuer>,
    pub signin: Arc<SignInFlow>,
    pub proxy: Arc<UpstreamProxy>,
    pub prometheus: PrometheusHandle,
    pub started_at: Instant,
}

/// Application routes, mounted at the root and again under `/auth` for the
/// fronting reverse proxy.
fn app_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(root_handler))
        .route("/version", get(version_handler))
        .route("/health", get(health_handler))
        .route("/signin", get(signin::signin))
        .route("/callback", get(signin::callback))
        .route("/signout", get(signin::signout).post(signin::signout))
        .route("/cmdr", get(cmdr::profile))
        .route("/cmdr/delete", post(cmdr::purge).get(cmdr::purge_not_readable))
        .route("/cmdr/journal/{year}/{month}/{day}", get(cmdr::journal_day))
        .route("/cmdr/{resource}", get(cmdr::resource))
}

/// Build the axum router with all routes and shared state.
///
/// Applies a concurrency limit layer based on `max_connections`.
pub(crate) fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .merge(app_routes())
        .nest("/auth", app_routes())
        .route("/metrics", get(metrics_handler))
        .fallback(not_found_handler)
        .layer(middleware::from_fn_with_state(state.clone(), default_headers))
        .layer(middleware::from_fn(track_requests))
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

    install_panic_hook();
    info!(version = VERSION, "starting companion-auth");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle =
        metrics::install_recorder().context("failed to install metrics recorder")?;

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
        None => info!("no configuration file, using defaults and environment"),
    }

    let config = Config::load(config_path.as_deref()).context("failed to load configuration")?;

    info!(
        listen_addr = %config.server.listen_addr,
        environment = ?config.server.environment,
        data_dir = %config.storage.data_dir.display(),
        api_base_url = %config.frontier.api_base_url,
        refresh_interval_secs = config.refresh.interval_secs,
        "configuration loaded"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let db_path = config.database_path();
    let db = Arc::new(
        Database::open(&db_path, config.database_options())
            .await
            .with_context(|| format!("failed to open database at {}", db_path.display()))?,
    );
    let sessions = SessionStore::new(db.clone(), clock.clone());
    let cache = CacheStore::new(db.clone(), clock.clone());

    let client = reqwest::Client::builder()
        .timeout(UPSTREAM_TIMEOUT)
        .build()
        .context("failed to build HTTP client")?;
    let endpoints = Arc::new(config.auth_endpoints());

    // Passes run at startup, then every interval
    let scheduler = Arc::new(RefreshScheduler::new(
        sessions.clone(),
        client.clone(),
        endpoints.clone(),
        clock.clone(),
        Duration::from_secs(config.refresh.horizon_secs),
    ));
    let refresh_task =
        spawn_refresh_task(scheduler, Duration::from_secs(config.refresh.interval_secs));

    let credentials = CredentialIssuer::new(
        &config.session.jwt_secret,
        &config.session.session_secret,
        Duration::from_secs(config.session.max_age_secs),
        CookieSettings {
            domain: config.urls.cookie_domain.clone(),
            secure: config.server.environment.is_production(),
        },
        clock.clone(),
    )
    .map_err(|e| anyhow!("session secret rejected: {e}"))?;

    let app_state = AppState {
        environment: config.server.environment,
        clock: clock.clone(),
        sessions: sessions.clone(),
        credentials: Arc::new(credentials),
        signin: Arc::new(SignInFlow {
            client: client.clone(),
            endpoints,
            attempts: SignInAttempts::new(clock),
            redirects: config.redirects(),
        }),
        proxy: Arc::new(UpstreamProxy::new(
            client,
            config.frontier.api_base_url.clone(),
            sessions,
            cache,
            config.cache_freshness(),
        )),
        prometheus: prometheus_handle,
        started_at: Instant::now(),
    };

    let app = build_router(app_state, config.server.max_connections);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timeout starts when the shutdown signal fires, not when the
    // server starts: notify the server to drain, then race the drain against
    // the timeout.
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

    refresh_task.abort();
    db.close().await;

    info!("shutdown complete");
    Ok(())
}

/// Any panic is fatal: log it and exit rather than keep serving from a
/// possibly inconsistent state.
fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        error!(panic = %info, "unrecoverable fault, exiting");
        std::process::exit(1);
    }));
}

/// Default response headers, CORS preflight and the development-only
/// `stack` field on 500 responses.
async fn default_headers(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let origin = request.headers().get(ORIGIN).cloned();

    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(request).await
    };

    if !state.environment.is_production() {
        if let Some(fault) = response.extensions().get::<InternalFault>().cloned() {
            let body = serde_json::json!({
                "error": "Internal server error",
                "message": fault.message,
                "stack": fault.stack,
            });
            let (mut parts, _) = response.into_parts();
            parts.headers.remove(CONTENT_LENGTH);
            response = Response::from_parts(parts, Body::from(body.to_string()));
        }
    }

    let headers = response.headers_mut();
    headers.insert(
        HeaderName::from_static("companion-auth-version"),
        HeaderValue::from_static(VERSION),
    );
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("private"));
    if let Some(origin) = origin {
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    }
    headers.insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Origin, X-Requested-With, Content-Type, Accept"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    response
}

/// Tag each request with an id span and record its status and latency.
async fn track_requests(request: Request, next: Next) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let span = info_span!("request", request_id = %request_id, method = %method, path = %path);

    let started = Instant::now();
    let response = next.run(request).instrument(span).await;
    let elapsed = started.elapsed();

    let status = response.status().as_u16();
    metrics::record_request(status, method.as_str(), elapsed.as_secs_f64());
    debug!(
        request_id = %request_id,
        status,
        elapsed_ms = elapsed.as_millis() as u64,
        "request completed"
    );
    response
}

async fn root_handler(State(state): State<AppState>) -> impl IntoResponse {
    format!(
        "Companion auth service v{VERSION}\nUptime: {} seconds\n",
        state.started_at.elapsed().as_secs()
    )
}

async fn version_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "version": VERSION }))
}

/// Health endpoint: JSON with status, version and uptime.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "healthy",
        "version": VERSION,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    });
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus text exposition of every recorded metric.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.prometheus.render(),
    )
}

async fn not_found_handler() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "Not found" })),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
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
