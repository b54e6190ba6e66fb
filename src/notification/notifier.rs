use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::UnitEvent;

/// Receives state-transition events. Implementations must never block
/// or fail a transition: errors stay inside the sink.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn publish(&self, event: &UnitEvent);
}

/// Appends one line per event to `events/{unit_id}.log`.
pub struct EventLogSink {
    events_dir: PathBuf,
}

impl EventLogSink {
    pub fn new(events_dir: impl Into<PathBuf>) -> Self {
        Self {
            events_dir: events_dir.into(),
        }
    }
}

#[async_trait]
impl NotificationSink for EventLogSink {
    async fn publish(&self, event: &UnitEvent) {
        let log_path = self.events_dir.join(format!("{}.log", event.unit_id));
        let line = format!(
            "[{}] {}\n",
            event.at.format("%Y-%m-%dT%H:%M:%SZ"),
            event.summary()
        );

        if let Err(e) = tokio::fs::create_dir_all(&self.events_dir).await {
            warn!(error = %e, "Failed to create events directory");
            return;
        }

        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await;

        match result {
            Ok(mut file) => {
                if let Err(e) = file.write_all(line.as_bytes()).await {
                    warn!(error = %e, "Failed to write event log");
                }
                if let Err(e) = file.flush().await {
                    warn!(error = %e, "Failed to flush event log");
                }
            }
            Err(e) => {
                warn!(error = %e, path = %log_path.display(), "Failed to open event log");
            }
        }
    }
}

/// Forwards events to an mpsc channel, for a UI or test harness.
/// Dropped receivers are tolerated; events are then discarded.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<UnitEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UnitEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl NotificationSink for ChannelSink {
    async fn publish(&self, event: &UnitEvent) {
        if self.tx.send(event.clone()).is_err() {
            debug!(unit_id = %event.unit_id, "Event receiver dropped, discarding event");
        }
    }
}

/// Fans one event out to every registered sink, decoupled from
/// transition logic.
#[derive(Clone, Default)]
pub struct Notifier {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub async fn notify(&self, event: &UnitEvent) {
        for sink in &self.sinks {
            sink.publish(event).await;
        }
    }
}
