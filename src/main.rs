//! openshift-build-annotate - mutating admission webhook for build provenance.
//!
//! This is the main entry point that:
//! - Initializes structured logging
//! - Loads the policy and listener configuration
//! - Starts the health server and the TLS webhook server

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tracing::info;

use openshift_build_annotate::health::run_health_server;
use openshift_build_annotate::{
    HealthState, PolicyConfig, ServerConfig, WebhookState, run_webhook_server, supervise,
};

/// Grace period for in-flight admission requests during shutdown
const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 2;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("openshift_build_annotate=info".parse()?),
        )
        .json()
        .init();

    info!("Starting server openshift-build-annotate");

    let server_config = ServerConfig::from_env();
    let policy = Arc::new(PolicyConfig::default());
    info!(
        webhook_port = server_config.webhook_port,
        health_port = server_config.health_port,
        ignored_namespaces = ?policy.ignored_namespaces,
        "Loaded configuration"
    );

    let health_state = Arc::new(HealthState::new());

    // Probes should answer even before the TLS listener is up
    let health_task = tokio::spawn(run_health_server(
        health_state.clone(),
        server_config.health_port,
    ));

    let webhook_state = Arc::new(WebhookState::new(policy, health_state.clone()));
    let webhook = run_webhook_server(webhook_state, &server_config);

    // Either server exiting is fatal
    supervise(
        webhook,
        health_task,
        shutdown_signal(),
        health_state,
        Duration::from_secs(SHUTDOWN_GRACE_PERIOD_SECS),
    )
    .await?;

    info!("Webhook stopped");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
///
/// Signal handler setup failures are fatal.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
