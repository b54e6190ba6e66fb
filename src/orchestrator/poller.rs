use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

use super::Orchestrator;

/// Periodic status-refresh loop. Single task, single writer with
/// respect to its own schedule; suspends between polls and shuts down
/// cleanly via a watch channel. Dropping the handle stops the loop.
pub struct StatusPoller {
    shutdown_tx: Option<watch::Sender<bool>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl StatusPoller {
    pub fn spawn(orchestrator: Arc<Orchestrator>, interval: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately; skip it so a fresh
            // poller does not race startup transitions.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        orchestrator.refresh_all().await;
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            debug!("Status poller shutdown");
                            break;
                        }
                    }
                }
            }
        });

        Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
