//! Admission webhook server.
//!
//! Serves the Pod mutation endpoint over HTTPS. The API server is pointed at
//! it through a MutatingWebhookConfiguration:
//! 1. Mount the TLS certificate and key (default `./tls/tls.crt`, `./tls/tls.key`)
//! 2. Register `https://<service>:8443/mutate` for Pod CREATE
//!
//! Every other path answers with a plain-text echo, used as a debug probe.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    Router,
    body::Bytes,
    extract::{Request, State},
    http::{StatusCode, Uri, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_server::tls_rustls::RustlsConfig;
use tracing::{error, info, warn};

use crate::config::{PolicyConfig, ServerConfig};
use crate::error::{Error, Result};
use crate::health::HealthState;
use crate::webhooks::mutate::{AdmissionOutcome, mutate};

/// Shared state for webhook handlers
pub struct WebhookState {
    pub policy: Arc<PolicyConfig>,
    pub health: Arc<HealthState>,
}

impl WebhookState {
    pub fn new(policy: Arc<PolicyConfig>, health: Arc<HealthState>) -> Self {
        Self { policy, health }
    }
}

/// Create the webhook router
pub fn create_webhook_router(state: Arc<WebhookState>, request_timeout: Duration) -> Router {
    Router::new()
        .route("/mutate", post(mutate_handler))
        .route("/", get(root_handler))
        .fallback(root_handler)
        .layer(middleware::from_fn(move |req: Request, next: Next| {
            enforce_deadline(req, next, request_timeout)
        }))
        .with_state(state)
}

/// Answer 408 when reading and handling a request takes longer than `limit`
async fn enforce_deadline(req: Request, next: Next, limit: Duration) -> Response {
    match tokio::time::timeout(limit, next.run(req)).await {
        Ok(response) => response,
        Err(_) => {
            warn!(timeout = ?limit, "Request deadline exceeded");
            (StatusCode::REQUEST_TIMEOUT, "request timed out").into_response()
        }
    }
}

/// Pod mutation handler
async fn mutate_handler(State(state): State<Arc<WebhookState>>, body: Bytes) -> Response {
    let started = Instant::now();
    let metrics = &state.health.metrics;

    match mutate(&body, &state.policy) {
        Ok((response, outcome)) => {
            if let AdmissionOutcome::Mutated { operations } = outcome {
                metrics.record_patch_operations(operations);
            }
            metrics.record_admission(outcome.label(), started.elapsed().as_secs_f64());
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/json")],
                response,
            )
                .into_response()
        }
        Err(e) => {
            error!(error = %e, "Failed to handle admission review");
            metrics.record_admission("decode_error", started.elapsed().as_secs_f64());
            e.into_response()
        }
    }
}

/// Echo the percent-decoded request path as `hello "<path>"`
async fn root_handler(uri: Uri) -> impl IntoResponse {
    let decoded = urlencoding::decode_binary(uri.path().as_bytes());
    let path = String::from_utf8_lossy(&decoded);
    (StatusCode::OK, format!("hello {:?}", escape_html(&path)))
}

/// Escape the five HTML-significant characters
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '\'' => out.push_str("&#39;"),
            '"' => out.push_str("&#34;"),
            _ => out.push(c),
        }
    }
    out
}

/// Run the webhook server with TLS.
///
/// Fails if the certificate pair cannot be loaded or the port cannot be bound.
pub async fn run_webhook_server(state: Arc<WebhookState>, config: &ServerConfig) -> Result<()> {
    let tls = RustlsConfig::from_pem_file(
        PathBuf::from(&config.cert_path),
        PathBuf::from(&config.key_path),
    )
    .await
    .map_err(|e| Error::TlsConfig(format!("{}: {}", config.cert_path, e)))?;

    let health = state.health.clone();
    let app = create_webhook_router(state, config.request_timeout);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.webhook_port));
    info!(port = config.webhook_port, "Webhook server listening with TLS");
    health.set_ready(true).await;

    axum_server::bind_rustls(addr, tls)
        .serve(app.into_make_service())
        .await
        .map_err(|e| Error::Server(e.to_string()))?;

    Ok(())
}
