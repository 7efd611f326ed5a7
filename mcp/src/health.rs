//! Background health sweep for backend connections.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::manager::BackendManager;

/// Spawn the periodic health sweep.
///
/// Every interval, connections whose last check is stale get the cheap
/// probe; unhealthy ones get a single reconnect attempt. The task stops
/// when the token is cancelled.
pub fn spawn_health_sweep(
    manager: Arc<BackendManager>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(manager.health_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so fresh startup
        // connections are not probed right away.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Health sweep shutting down");
                    break;
                }
                _ = interval.tick() => {
                    manager.sweep_health().await;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        client::BackendConnector,
        config::{BackendConfig, HealthConfig, RetryConfig},
        error::{BackendError, BackendResult},
    };

    struct RefusingConnector;

    #[async_trait::async_trait]
    impl BackendConnector for RefusingConnector {
        async fn connect(
            &self,
            _config: &BackendConfig,
        ) -> BackendResult<Arc<dyn crate::client::BackendClient>> {
            Err(BackendError::ConnectionFailed("connection refused".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_task_stops_on_cancel() {
        let manager = Arc::new(BackendManager::new(
            Arc::new(RefusingConnector),
            &RetryConfig::default(),
            HealthConfig::default(),
        ));
        let token = CancellationToken::new();

        let handle = spawn_health_sweep(Arc::clone(&manager), token.clone());

        // Let a few empty sweeps run, then cancel.
        tokio::time::advance(Duration::from_secs(90)).await;
        token.cancel();
        handle.await.unwrap();
    }
}
