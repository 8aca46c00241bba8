//! Collector integration for the web time tracker.
//!
//! Provides:
//! - [`CollectorClient`]: the HTTP client for auth and heartbeat endpoints
//! - [`TokenManager`]: token storage, proactive and on-demand refresh
//! - [`Heartbeat`]: periodic delivery of activity windows with refresh-and-retry

pub mod auth;
pub mod client;
pub mod heartbeat;

pub use auth::{
    AuthError, AuthRecord, AuthStatus, AuthTokens, DEFAULT_REFRESH_BUFFER_SECS, TokenManager,
};
pub use client::{
    ApiError, Collector, CollectorClient, Credentials, DEFAULT_TIMEOUT, HeartbeatPayload,
    LoginResponse, RefreshResponse,
};
pub use heartbeat::{BeatOutcome, Heartbeat, WindowSnapshot, WindowSource};
