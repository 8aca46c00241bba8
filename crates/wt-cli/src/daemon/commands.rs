//! Tracker actor commands and errors.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::oneshot;
use wt_api::WindowSnapshot;
use wt_core::{ActivityWindow, HostEvent, TrackerStatus};

/// Commands sent to the tracker actor.
#[derive(Debug)]
pub enum TrackerCommand {
    /// Apply a host event. Fire and forget.
    Event {
        /// Boxed to keep the enum small; snapshots carry every tab.
        event: Box<HostEvent>,
    },

    /// Bring attribution up to `now` and report the oldest undelivered window.
    Snapshot {
        now: DateTime<Utc>,
        respond_to: oneshot::Sender<WindowSnapshot>,
    },

    /// A final window was delivered: clear it and fold the delivered copy
    /// into daily stats.
    ///
    /// Responds `false` if the window was no longer held.
    CompleteDelivery {
        window: Box<ActivityWindow>,
        respond_to: oneshot::Sender<bool>,
    },

    /// Report the tracker status.
    Status {
        respond_to: oneshot::Sender<TrackerStatus>,
    },

    /// Persist everything and stop the actor.
    Shutdown { respond_to: oneshot::Sender<()> },
}

/// Errors talking to the tracker actor.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// The actor has stopped.
    #[error("tracker actor has shut down")]
    ChannelClosed,
}
