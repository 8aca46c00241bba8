//! Heartbeat delivery.
//!
//! One [`Heartbeat::beat`] is one delivery attempt of the oldest undelivered
//! window. Failures never drop data: the window stays with its
//! [`WindowSource`] and is offered again on the next beat. Only a successful
//! delivery of a final window completes it.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use wt_core::ActivityWindow;

use crate::auth::{AuthError, TokenManager};
use crate::client::{ApiError, Collector, HeartbeatPayload};

/// What the heartbeat reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub window: Option<ActivityWindow>,
    pub is_idle: bool,
}

/// Provider of windows to deliver, usually the tracker.
pub trait WindowSource: Send + Sync {
    /// The oldest undelivered window and the idle flag, as of `now`.
    fn snapshot(&self, now: DateTime<Utc>) -> impl Future<Output = WindowSnapshot> + Send;

    /// Called with the final window exactly as it was delivered.
    fn complete(&self, window: &ActivityWindow) -> impl Future<Output = ()> + Send;
}

/// Result of one heartbeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeatOutcome {
    /// Not logged in; aggregated data stays in memory.
    Unauthenticated,
    /// No window and not idle.
    NothingToReport,
    /// The collector accepted the heartbeat.
    Delivered {
        window_start: Option<DateTime<Utc>>,
        /// Whether the window was final and has been completed.
        completed: bool,
    },
    /// Delivery failed; the window will be offered again.
    Deferred {
        reason: String,
        /// Whether the failure looked temporary (network, 5xx, 429).
        transient: bool,
    },
}

/// The heartbeat pipeline.
pub struct Heartbeat<C, W> {
    collector: Arc<C>,
    tokens: Arc<TokenManager<C>>,
    source: Arc<W>,
}

impl<C: Collector, W: WindowSource> Heartbeat<C, W> {
    pub const fn new(collector: Arc<C>, tokens: Arc<TokenManager<C>>, source: Arc<W>) -> Self {
        Self {
            collector,
            tokens,
            source,
        }
    }

    /// Runs one delivery attempt.
    pub async fn beat(&self, now: DateTime<Utc>) -> BeatOutcome {
        if !self.tokens.is_authenticated() {
            tracing::debug!("heartbeat skipped, not logged in");
            return BeatOutcome::Unauthenticated;
        }

        let snapshot = self.source.snapshot(now).await;
        if snapshot.window.is_none() && !snapshot.is_idle {
            return BeatOutcome::NothingToReport;
        }
        let payload = HeartbeatPayload {
            heartbeat_at: now,
            is_idle: snapshot.is_idle,
            window: snapshot.window,
        };

        // At most one refresh per beat, whichever path asks for it first.
        let mut refreshed = false;
        let token = match self.tokens.access_token(now) {
            Some(token) => token,
            None => {
                refreshed = true;
                match self.refreshed_token(now).await {
                    Ok(token) => token,
                    Err(outcome) => return outcome,
                }
            }
        };

        match self.collector.send_heartbeat(&token, &payload).await {
            Ok(()) => {}
            Err(ApiError::Unauthorized) if refreshed => {
                return deferred("collector rejected a freshly refreshed token".to_string(), false);
            }
            Err(ApiError::Unauthorized) => {
                tracing::debug!("heartbeat unauthorized, refreshing once");
                let token = match self.refreshed_token(now).await {
                    Ok(token) => token,
                    Err(outcome) => return outcome,
                };
                if let Err(err) = self.collector.send_heartbeat(&token, &payload).await {
                    let transient = err.is_transient();
                    return deferred(format!("retry after refresh failed: {err}"), transient);
                }
            }
            Err(err) => return deferred(err.to_string(), err.is_transient()),
        }

        self.delivered(payload.window.as_ref()).await
    }

    async fn refreshed_token(&self, now: DateTime<Utc>) -> Result<String, BeatOutcome> {
        if let Err(err) = self.tokens.refresh(now).await {
            let transient = matches!(&err, AuthError::Transport(api) if api.is_transient());
            return Err(deferred(format!("token refresh failed: {err}"), transient));
        }
        self.tokens
            .access_token(now)
            .ok_or_else(|| deferred("refreshed token already expired".to_string(), false))
    }

    async fn delivered(&self, window: Option<&ActivityWindow>) -> BeatOutcome {
        let Some(window) = window else {
            tracing::debug!("idle heartbeat delivered");
            return BeatOutcome::Delivered {
                window_start: None,
                completed: false,
            };
        };
        if window.is_final {
            self.source.complete(window).await;
        }
        tracing::debug!(
            window = %window.window_start,
            is_final = window.is_final,
            domains = window.domains.len(),
            active_secs = window.total_active_seconds(),
            background_secs = window.total_background_seconds(),
            "heartbeat delivered"
        );
        BeatOutcome::Delivered {
            window_start: Some(window.window_start),
            completed: window.is_final,
        }
    }
}

fn deferred(reason: String, transient: bool) -> BeatOutcome {
    if transient {
        tracing::warn!(%reason, "heartbeat deferred, window kept for next attempt");
    } else {
        tracing::error!(%reason, "heartbeat refused, window kept for next attempt");
    }
    BeatOutcome::Deferred { reason, transient }
}
