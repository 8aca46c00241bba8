//! Client interface for the tracker actor.

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use wt_api::{WindowSnapshot, WindowSource};
use wt_core::{ActivityWindow, HostEvent, TrackerStatus};

use super::commands::{DaemonError, TrackerCommand};

/// Cheap-to-clone handle to the tracker actor.
#[derive(Debug, Clone)]
pub struct TrackerHandle {
    sender: mpsc::Sender<TrackerCommand>,
}

impl TrackerHandle {
    #[must_use]
    pub const fn new(sender: mpsc::Sender<TrackerCommand>) -> Self {
        Self { sender }
    }

    /// Forwards a host event.
    pub async fn send_event(&self, event: HostEvent) -> Result<(), DaemonError> {
        self.sender
            .send(TrackerCommand::Event {
                event: Box::new(event),
            })
            .await
            .map_err(|_| DaemonError::ChannelClosed)
    }

    pub async fn window_snapshot(&self, now: DateTime<Utc>) -> Result<WindowSnapshot, DaemonError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(TrackerCommand::Snapshot { now, respond_to: tx })
            .await
            .map_err(|_| DaemonError::ChannelClosed)?;
        rx.await.map_err(|_| DaemonError::ChannelClosed)
    }

    pub async fn complete_delivery(&self, window: &ActivityWindow) -> Result<bool, DaemonError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(TrackerCommand::CompleteDelivery {
                window: Box::new(window.clone()),
                respond_to: tx,
            })
            .await
            .map_err(|_| DaemonError::ChannelClosed)?;
        rx.await.map_err(|_| DaemonError::ChannelClosed)
    }

    pub async fn status(&self) -> Result<TrackerStatus, DaemonError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(TrackerCommand::Status { respond_to: tx })
            .await
            .map_err(|_| DaemonError::ChannelClosed)?;
        rx.await.map_err(|_| DaemonError::ChannelClosed)
    }

    /// Asks the actor to persist its state and stop.
    pub async fn shutdown(&self) -> Result<(), DaemonError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(TrackerCommand::Shutdown { respond_to: tx })
            .await
            .map_err(|_| DaemonError::ChannelClosed)?;
        rx.await.map_err(|_| DaemonError::ChannelClosed)
    }
}

impl WindowSource for TrackerHandle {
    async fn snapshot(&self, now: DateTime<Utc>) -> WindowSnapshot {
        match self.window_snapshot(now).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::warn!(error = %err, "no window available for heartbeat");
                WindowSnapshot {
                    window: None,
                    is_idle: false,
                }
            }
        }
    }

    async fn complete(&self, window: &ActivityWindow) {
        let start = window.window_start;
        match self.complete_delivery(window).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(window = %start, "delivered window was already cleared");
            }
            Err(err) => {
                tracing::warn!(error = %err, window = %start, "failed to complete delivery");
            }
        }
    }
}
