//! # Dashboard — Panel Web Server
//!
//! Runs an Axum HTTP server that serves the panel's static frontend and the
//! JSON endpoints it polls. Every read endpoint is cursor-based; every write
//! endpoint validates its form and commits in one transaction.
//!
//! ## Routes
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | GET | `/api/results` | results since a `seq` cursor |
//! | POST | `/api/results/{result_id}/hide` | hide one result |
//! | POST | `/api/results/hide` | hide snaps, runs or everything in a directory |
//! | GET | `/api/processes` | in-flight placeholders |
//! | GET | `/api/cloud` | finished downloads or cloud availability |
//! | POST | `/api/cloud/{id}/shown` | acknowledge a download |
//! | GET | `/api/status` | beamline heartbeat ages |
//! | GET | `/api/rankings/runs` | integrated-run ranking rows |
//! | POST | `/api/settings` | save presets or current settings |
//! | POST | `/api/reprocess` | queue a reprocess request |
//! | GET | `/healthz`, `/readyz`, `/metrics` | probes and Prometheus |

mod routes_cloud;
mod routes_health;
mod routes_processes;
mod routes_rankings;
mod routes_results;
mod routes_settings;
mod routes_status;

use crate::config::PanelConfig;
use crate::error::ApiError;
use crate::{db, prom_metrics};
use anyhow::Result;
use axum::extract::Request;
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::routing::{get, post};
use axum::Router;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::ServeDir;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, Instrument};

pub struct AppState {
    pub db: db::Database,
    pub config: PanelConfig,
    pub prom_metrics: prom_metrics::Metrics,
}

impl AppState {
    pub fn with_db(db: db::Database, config: PanelConfig) -> Arc<Self> {
        Arc::new(AppState {
            db,
            config,
            prom_metrics: prom_metrics::Metrics::new(),
        })
    }
}

/// Reject blank directory parameters before they reach SQL.
pub(super) fn require_dir(datadir: &str) -> Result<&str, ApiError> {
    let dir = datadir.trim();
    if dir.is_empty() {
        Err(ApiError::InvalidInput("datadir: required".into()))
    } else {
        Ok(dir)
    }
}

/// Middleware that records HTTP request duration into the Prometheus histogram,
/// generates (or propagates) a request ID for correlation, and wraps the
/// request in a tracing span using `.instrument()` for proper async propagation.
async fn metrics_middleware(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> axum::response::Response {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let method = req.method().to_string();
    let raw_path = req.uri().path().to_string();
    let norm_path = normalize_path(&raw_path);
    let start = std::time::Instant::now();

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        path = %raw_path,
    );
    let mut response = next.run(req).instrument(span).await;

    state
        .prom_metrics
        .http_request_duration
        .get_or_create(&prom_metrics::HttpLabel {
            method,
            path: norm_path,
        })
        .observe(start.elapsed().as_secs_f64());

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Collapse numeric ids and UUIDs into placeholders so per-result routes
/// share one histogram series.
fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|seg| {
            if seg.is_empty() {
                seg.to_string()
            } else if seg.chars().all(|c| c.is_ascii_digit()) {
                ":id".to_string()
            } else if seg.len() == 36 && seg.chars().filter(|c| *c == '-').count() == 4 {
                ":uuid".to_string()
            } else {
                seg.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

pub fn build_router(state: Arc<AppState>, static_dir: Option<&Path>) -> Router {
    let server = &state.config.server;
    let body_limit = server.body_limit_bytes;
    let timeout = Duration::from_secs(server.request_timeout_secs);

    let mut app = Router::new()
        .route("/api/results", get(routes_results::handler_api_results))
        .route(
            "/api/results/hide",
            post(routes_results::handler_api_hide_results),
        )
        .route(
            "/api/results/{result_id}/hide",
            post(routes_results::handler_api_hide_result),
        )
        .route(
            "/api/processes",
            get(routes_processes::handler_api_processes),
        )
        .route("/api/cloud", get(routes_cloud::handler_api_cloud))
        .route(
            "/api/cloud/{id}/shown",
            post(routes_cloud::handler_api_cloud_shown),
        )
        .route("/api/status", get(routes_status::handler_api_status))
        .route(
            "/api/rankings/runs",
            get(routes_rankings::handler_api_run_rankings),
        )
        .route("/api/settings", post(routes_settings::handler_api_settings))
        .route(
            "/api/reprocess",
            post(routes_settings::handler_api_reprocess),
        )
        .route("/healthz", get(routes_health::handler_healthz))
        .route("/readyz", get(routes_health::handler_readyz))
        .route("/metrics", get(routes_health::handler_metrics));

    if let Some(dir) = static_dir {
        app = app.fallback_service(ServeDir::new(dir).append_index_html_on_directories(true));
    }

    app.layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    )
    .layer(CatchPanicLayer::new())
    .layer(axum::middleware::from_fn_with_state(
        state.clone(),
        metrics_middleware,
    ))
    .layer(TraceLayer::new_for_http())
    .layer(RequestBodyLimitLayer::new(body_limit))
    .layer(TimeoutLayer::with_status_code(
        StatusCode::REQUEST_TIMEOUT,
        timeout,
    ))
    .with_state(state)
}

pub async fn run(
    port: u16,
    database_url: &str,
    config: PanelConfig,
    static_dir: Option<&Path>,
) -> Result<()> {
    let database = db::Database::connect(database_url, &config.database).await?;
    let state = AppState::with_db(database, config);
    let app = build_router(state, static_dir);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!(port, "dashboard running");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("dashboard shut down gracefully");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("received SIGINT, shutting down"),
                    _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable, waiting for SIGINT");
                ctrl_c.await.ok();
                info!("received SIGINT, shutting down");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("received SIGINT, shutting down");
    }
}
