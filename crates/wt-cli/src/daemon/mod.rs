//! The `wt run` runtime.
//!
//! Wires the tracker actor, the stdin event feed, the heartbeat task and the
//! token refresh task together. The feed closing (the host went away) or
//! Ctrl-C stops the daemon; background tasks are aborted and the actor
//! persists its state before exiting.

mod actor;
mod commands;
mod feed;
mod handle;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use wt_api::{Collector, CollectorClient, Heartbeat, TokenManager, WindowSource};
use wt_core::store::{self, keys};
use wt_core::{ActivityBuffer, MemoryStore, Settings, Store, Tracker, TrackerState};

pub use actor::{ActorTimers, TrackerActor};
pub use commands::{DaemonError, TrackerCommand};
pub use feed::pump;
pub use handle::TrackerHandle;

use crate::Config;

/// Capacity of the actor command channel.
const COMMAND_BUFFER: usize = 256;

/// Runs the daemon until the event feed closes or the process is interrupted.
pub async fn run(config: &Config) -> Result<()> {
    let store = open_store_or_memory(config);

    let settings: Settings = store::load_or_default(store.as_ref(), keys::SETTINGS);
    let buffer: ActivityBuffer = store::load_or_default(store.as_ref(), keys::ACTIVITY_BUFFER);
    let state: TrackerState = store::load_or_default(store.as_ref(), keys::TRACKER_STATE);
    let tracker = Tracker::restore(&config.tracker_config(), settings, buffer, state.is_paused);
    tracing::info!(
        pending_windows = tracker.windows().pending_windows(),
        paused = state.is_paused,
        "restored tracker state"
    );

    let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
    let handle = TrackerHandle::new(tx);
    let actor = TrackerActor::new(
        rx,
        tracker,
        store.clone(),
        ActorTimers {
            tick: config.tick_interval(),
            persist: config.persist_interval(),
        },
        Utc::now(),
    );
    let actor_task = tokio::spawn(actor.run());

    let collector = Arc::new(
        CollectorClient::new(config.api_base_url.clone(), config.request_timeout())
            .context("failed to build collector client")?,
    );
    let tokens = Arc::new(TokenManager::new(
        collector.clone(),
        store.clone(),
        config.refresh_buffer(),
    ));
    let heartbeat = Heartbeat::new(collector, tokens.clone(), Arc::new(handle.clone()));
    let heartbeat_task = tokio::spawn(heartbeat_loop(
        heartbeat,
        handle.clone(),
        config.heartbeat_interval(),
    ));
    let refresh_task = tokio::spawn(refresh_loop(tokens));

    tracing::info!(
        collector = %config.api_base_url,
        "tracker running, reading host events from stdin"
    );
    tokio::select! {
        result = pump(BufReader::new(tokio::io::stdin()), &handle) => match result {
            Ok(events) => tracing::info!(events, "host event feed closed"),
            Err(err) => tracing::warn!(error = %err, "host event feed stopped"),
        },
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for Ctrl-C")?;
            tracing::info!("interrupted");
        }
    }

    heartbeat_task.abort();
    refresh_task.abort();
    handle
        .shutdown()
        .await
        .context("tracker actor stopped unexpectedly")?;
    actor_task.await.context("tracker actor panicked")?;
    Ok(())
}

/// Opens the configured database, falling back to a non-durable in-memory
/// store so tracking continues when the database is unusable.
fn open_store_or_memory(config: &Config) -> Arc<dyn Store> {
    match crate::open_store(config) {
        Ok(db) => Arc::new(db),
        Err(err) => {
            tracing::warn!(
                error = %format!("{err:#}"),
                "database unavailable, state will not persist"
            );
            Arc::new(MemoryStore::new())
        }
    }
}

async fn heartbeat_loop<C, W>(heartbeat: Heartbeat<C, W>, handle: TrackerHandle, every: Duration)
where
    C: Collector,
    W: WindowSource,
{
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; the first beat waits a full period.
    interval.tick().await;
    loop {
        interval.tick().await;
        let outcome = heartbeat.beat(Utc::now()).await;
        match handle.status().await {
            Ok(status) => tracing::debug!(?outcome, ?status, "heartbeat finished"),
            Err(_) => return,
        }
    }
}

/// Refreshes the access token ahead of expiry, rescheduling on every auth change.
async fn refresh_loop<C: Collector>(tokens: Arc<TokenManager<C>>) {
    let mut changes = tokens.subscribe();
    loop {
        let Some(deadline) = tokens.refresh_deadline() else {
            if changes.changed().await.is_err() {
                return;
            }
            continue;
        };
        let wait = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            () = tokio::time::sleep(wait) => {
                if let Err(err) = tokens.refresh_scheduled(Utc::now()).await {
                    tracing::warn!(error = %err, "scheduled token refresh failed");
                }
            }
            changed = changes.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}
