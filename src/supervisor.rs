//! Process lifecycle for the webhook and health servers.
//!
//! Both servers must stay up for the Pod to be useful, so either one exiting
//! ends the process with an error. Only a shutdown signal is a clean exit.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::{Error, Result};
use crate::health::HealthState;

/// Run until the webhook fails, the health task ends, or `shutdown` resolves.
///
/// On shutdown readiness is dropped first, then in-flight requests get
/// `grace` to finish.
pub async fn supervise<W, S>(
    webhook: W,
    health_task: JoinHandle<std::result::Result<(), std::io::Error>>,
    shutdown: S,
    health_state: Arc<HealthState>,
    grace: Duration,
) -> Result<()>
where
    W: Future<Output = Result<()>>,
    S: Future<Output = ()>,
{
    tokio::select! {
        result = webhook => {
            let err = match result {
                Ok(()) => Error::Server("webhook server exited".to_string()),
                Err(e) => e,
            };
            error!("Webhook server error: {}", err);
            Err(err)
        }
        result = health_task => {
            let err = match result {
                Ok(Ok(())) => Error::Server("health server exited".to_string()),
                Ok(Err(e)) => Error::Server(format!("health server failed: {e}")),
                Err(e) => Error::Server(format!("health server task failed: {e}")),
            };
            error!("Health server error: {}", err);
            Err(err)
        }
        _ = shutdown => {
            info!("Received shutdown signal, initiating graceful shutdown...");

            health_state.set_ready(false).await;
            info!("Marked webhook as not ready");

            tokio::time::sleep(grace).await;
            info!("Grace period complete, shutting down");
            Ok(())
        }
    }
}
