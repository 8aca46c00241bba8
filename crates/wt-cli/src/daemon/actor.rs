//! Tracker actor: sole owner of the engine.
//!
//! All engine mutations happen inside [`TrackerActor::run`], one command or
//! timer at a time. The attribution tick, the next debounce deadline, and the
//! periodic buffer flush are timers of the same loop, so no state is ever
//! observed half-updated.

use std::future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use wt_api::WindowSnapshot;
use wt_core::store::{self, keys};
use wt_core::{
    ActivityWindow, DailyStats, HostEvent, Store, Tracker, TrackerState, stats_date_for,
};

use super::commands::TrackerCommand;

/// Timer cadences of the actor loop.
#[derive(Debug, Clone, Copy)]
pub struct ActorTimers {
    pub tick: Duration,
    pub persist: Duration,
}

/// Owner of the [`Tracker`] and its persistence.
pub struct TrackerActor {
    receiver: mpsc::Receiver<TrackerCommand>,
    tracker: Tracker,
    store: Arc<dyn Store>,
    timers: ActorTimers,
    session_start: DateTime<Utc>,
}

impl TrackerActor {
    pub fn new(
        receiver: mpsc::Receiver<TrackerCommand>,
        tracker: Tracker,
        store: Arc<dyn Store>,
        timers: ActorTimers,
        session_start: DateTime<Utc>,
    ) -> Self {
        Self {
            receiver,
            tracker,
            store,
            timers,
            session_start,
        }
    }

    /// Runs the actor until shut down or until every handle is dropped.
    pub async fn run(mut self) {
        info!(paused = self.tracker.is_paused(), "tracker actor starting");
        self.persist_tracker_state();

        let mut tick = tokio::time::interval(self.timers.tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut persist = tokio::time::interval(self.timers.persist);
        persist.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let deadline = self.tracker.next_deadline();
            tokio::select! {
                command = self.receiver.recv() => {
                    let Some(command) = command else { break };
                    if let Some(respond_to) = self.handle_command(command, Utc::now()) {
                        self.persist_buffer();
                        let _ = respond_to.send(());
                        break;
                    }
                }
                _ = tick.tick() => self.tracker.tick(Utc::now()),
                () = sleep_until(deadline) => {
                    let fired = self.tracker.fire_due(Utc::now());
                    debug!(fired, "debounce deadline reached");
                }
                _ = persist.tick() => self.persist_buffer(),
            }
        }

        self.persist_buffer();
        info!(status = ?self.tracker.status(), "tracker actor stopped");
    }

    /// Dispatches one command. Returns the responder when the actor should stop.
    fn handle_command(
        &mut self,
        command: TrackerCommand,
        now: DateTime<Utc>,
    ) -> Option<tokio::sync::oneshot::Sender<()>> {
        match command {
            TrackerCommand::Event { event } => self.handle_event(*event, now),
            TrackerCommand::Snapshot { now, respond_to } => {
                self.tracker.advance(now);
                let _ = respond_to.send(WindowSnapshot {
                    window: self.tracker.current_window(now),
                    is_idle: self.tracker.is_idle(),
                });
            }
            TrackerCommand::CompleteDelivery { window, respond_to } => {
                let completed = self.complete_delivery(&window);
                let _ = respond_to.send(completed);
            }
            TrackerCommand::Status { respond_to } => {
                let _ = respond_to.send(self.tracker.status());
            }
            TrackerCommand::Shutdown { respond_to } => return Some(respond_to),
        }
        None
    }

    fn handle_event(&mut self, event: HostEvent, now: DateTime<Utc>) {
        let was_paused = self.tracker.is_paused();
        let settings_changed = matches!(event, HostEvent::SettingsChanged { .. });
        self.tracker.handle(event, now);

        if settings_changed {
            let settings = self.tracker.settings();
            if let Err(err) = store::save(self.store.as_ref(), keys::SETTINGS, settings) {
                warn!(error = %err, "failed to persist settings");
            }
        }
        if was_paused != self.tracker.is_paused() {
            self.persist_tracker_state();
        }
    }

    fn complete_delivery(&mut self, window: &ActivityWindow) -> bool {
        if self.tracker.complete_window(window).is_none() {
            return false;
        }
        let date = stats_date_for(window.window_start);
        let key = keys::daily_stats(date);
        let mut stats = match store::load::<DailyStats, _>(self.store.as_ref(), &key) {
            Ok(stats) => stats.unwrap_or_else(|| DailyStats::new(date)),
            Err(err) => {
                warn!(error = %err, %date, "failed to load daily stats, starting the day over");
                DailyStats::new(date)
            }
        };
        stats.fold_window(window);
        if let Err(err) = store::save(self.store.as_ref(), &key, &stats) {
            warn!(error = %err, %date, "failed to persist daily stats");
        }
        debug!(window = %window.window_start, %date, "window folded into daily stats");
        self.persist_buffer();
        true
    }

    fn persist_buffer(&mut self) {
        if !self.tracker.windows().is_dirty() {
            return;
        }
        let buffer = self.tracker.windows().to_buffer();
        match store::save(self.store.as_ref(), keys::ACTIVITY_BUFFER, &buffer) {
            Ok(()) => self.tracker.windows_mut().mark_clean(),
            Err(err) => warn!(error = %err, "failed to persist activity buffer"),
        }
    }

    fn persist_tracker_state(&self) {
        let state = TrackerState {
            is_paused: self.tracker.is_paused(),
            session_start_time: Some(self.session_start),
        };
        if let Err(err) = store::save(self.store.as_ref(), keys::TRACKER_STATE, &state) {
            warn!(error = %err, "failed to persist tracker state");
        }
    }
}

/// Sleeps until `deadline`, or forever when there is none.
async fn sleep_until(deadline: Option<DateTime<Utc>>) {
    match deadline {
        Some(deadline) => {
            let wait = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(wait).await;
        }
        None => future::pending().await,
    }
}
