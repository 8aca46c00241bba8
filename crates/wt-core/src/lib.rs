//! Core activity tracking engine.
//!
//! This crate contains the host-independent parts of the tracker:
//! - Domain classification: URL to domain, block and full-URL policies
//! - Debounce: per-tab confirmation deadlines
//! - Tab state machine: active and background tracking driven by host events
//! - Window aggregation: per-domain seconds in five-minute windows
//! - Persistence port and daily statistics
//!
//! Nothing here reads the clock. Every operation takes the current time as an
//! argument so the embedding runtime decides how time advances.

mod debounce;
pub mod domain;
pub mod event;
pub mod stats;
pub mod store;
mod tracker;
pub mod types;
pub mod window;

pub use debounce::{ConfirmationGate, DEFAULT_DEBOUNCE_MS, PendingConfirmation};
pub use domain::classify;
pub use event::{HostEvent, HostSnapshot, HostState, IdleState, TabSnapshot, WindowFocus};
pub use stats::{DailyStats, DomainStat, stats_date_for};
pub use store::{MemoryStore, Store, StoreError, TrackerState};
pub use tracker::{Tracker, TrackerConfig, TrackerStatus};
pub use types::{Domain, Settings, TabId, TabRecord, TrackingKind, ValidationError, WindowId};
pub use window::{
    ActivityBuffer, ActivityWindow, DEFAULT_MAX_PENDING_WINDOWS, DomainBucket, WINDOW_MINUTES,
    WindowAggregator, window_start_for,
};
