//! HTTP surface: `/probe`, `/metrics` and `/health`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Deserialize;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::aggregation::Aggregator;
use crate::exposition::{render, render_stats};
use crate::probe::{ProbeErrorKind, ProbeFailure};
use crate::resolver::RequestCredentials;

const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    aggregator: Arc<Aggregator>,
    prefix: Arc<str>,
}

/// Query parameters of `/probe`.
#[derive(Debug, Default, Deserialize)]
struct ProbeQuery {
    target: Option<String>,
    username: Option<String>,
    password: Option<String>,
    save: Option<String>,
}

impl ProbeQuery {
    fn save(&self) -> bool {
        self.save.as_deref().is_some_and(|v| {
            matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "true" | "1" | "yes" | "on"
            )
        })
    }
}

/// Create the HTTP router.
pub fn create_router(aggregator: Arc<Aggregator>, prefix: &str) -> Router {
    let state = AppState {
        aggregator,
        prefix: Arc::from(prefix),
    };

    Router::new()
        .route("/probe", get(probe_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn probe_handler(
    State(state): State<AppState>,
    Query(query): Query<ProbeQuery>,
) -> Response {
    let Some(target) = query.target.as_deref().filter(|t| !t.trim().is_empty()) else {
        return (StatusCode::BAD_REQUEST, "missing 'target' parameter\n").into_response();
    };

    let request = RequestCredentials {
        username: query.username.clone(),
        password: query.password.clone(),
    };

    let outcome = match state
        .aggregator
        .executor()
        .probe(target, &request, query.save())
        .await
    {
        Ok(outcome) => outcome,
        Err(failure) => return failure_response(&failure),
    };

    let mut response = (
        StatusCode::OK,
        [(header::CONTENT_TYPE, CONTENT_TYPE)],
        render(std::slice::from_ref(&outcome.set), &state.prefix),
    )
        .into_response();

    if let Some(e) = outcome.storage_warning {
        state.aggregator.record_store_failure();
        let warning = format!("199 shelly-exporter \"metrics not persisted: {}\"", e)
            .replace(|c: char| !c.is_ascii() || c.is_ascii_control(), " ");
        if let Ok(value) = HeaderValue::from_str(&warning) {
            response.headers_mut().insert(header::WARNING, value);
        }
    }

    response
}

fn failure_response(failure: &ProbeFailure) -> Response {
    let status = match failure.kind {
        ProbeErrorKind::InvalidTarget => StatusCode::BAD_REQUEST,
        ProbeErrorKind::Transport | ProbeErrorKind::MalformedPayload => StatusCode::BAD_GATEWAY,
        ProbeErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ProbeErrorKind::Auth => StatusCode::UNAUTHORIZED,
        ProbeErrorKind::UnsupportedDeviceType => StatusCode::NOT_IMPLEMENTED,
    };

    warn!(
        target = %failure.target,
        reason = failure.kind.reason(),
        error = %failure.message,
        "Probe request failed"
    );
    (status, format!("{}\n", failure)).into_response()
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    let sets = state.aggregator.collect().await;
    let mut body = render(&sets, &state.prefix);
    body.push_str(&render_stats(&state.aggregator.stats(), &state.prefix));

    (StatusCode::OK, [(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response()
}

async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

/// HTTP server for the exporter.
pub struct HttpServer {
    aggregator: Arc<Aggregator>,
    listen_addr: SocketAddr,
    prefix: String,
}

impl HttpServer {
    pub fn new(aggregator: Arc<Aggregator>, listen_addr: SocketAddr, prefix: String) -> Self {
        Self {
            aggregator,
            listen_addr,
            prefix,
        }
    }

    /// Run the HTTP server until the shutdown signal is received.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let router = create_router(self.aggregator, &self.prefix);

        let listener = tokio::net::TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.listen_addr, e))?;

        info!(addr = %self.listen_addr, "HTTP server listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                while shutdown.changed().await.is_ok() {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}
