//! Tab state machine.
//!
//! [`Tracker`] owns every piece of engine state: the active tab record, the
//! background tab records, pending confirmations, the host-state mirror and
//! the window aggregator. The host feed is dispatched through
//! [`Tracker::handle`]; the driver additionally calls [`Tracker::fire_due`]
//! when [`Tracker::next_deadline`] passes and [`Tracker::tick`] on a fixed
//! cadence. Every method takes the current time explicitly.
//!
//! Per tab the lifecycle is `Untracked -> Pending -> Tracking -> Untracked`,
//! repeated as often as the tab comes and goes. Entering tracking always goes
//! through the debounce gate; leaving it never does.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::debounce::{ConfirmationGate, DEFAULT_DEBOUNCE_MS, PendingConfirmation};
use crate::domain::{classify, normalize_visit_url, should_track_full_url};
use crate::event::{HostEvent, HostState, Signal, WindowFocus};
use crate::types::{Domain, Settings, TabId, TabRecord, TrackingKind};
use crate::window::{
    ActivityBuffer, ActivityWindow, DEFAULT_MAX_PENDING_WINDOWS, WindowAggregator,
};

/// Flush gaps longer than this mean the host was asleep; they are not attributed.
const MAX_ATTRIBUTION_GAP_SECS: i64 = 60;

/// Engine tunables.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Minimum dwell time before a visit counts.
    pub debounce: TimeDelta,
    /// Bound on undelivered windows kept in memory.
    pub max_pending_windows: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            debounce: TimeDelta::milliseconds(DEFAULT_DEBOUNCE_MS),
            max_pending_windows: DEFAULT_MAX_PENDING_WINDOWS,
        }
    }
}

/// Point-in-time summary of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerStatus {
    pub is_paused: bool,
    pub is_idle: bool,
    pub active_domain: Option<Domain>,
    pub background_domains: Vec<Domain>,
    pub pending_confirmations: usize,
    pub pending_windows: usize,
}

/// The activity tracking engine.
#[derive(Debug, Clone)]
pub struct Tracker {
    settings: Settings,
    gate: ConfirmationGate,
    active: Option<TabRecord>,
    background: BTreeMap<TabId, TabRecord>,
    host: HostState,
    windows: WindowAggregator,
    idle: bool,
    paused: bool,
}

impl Tracker {
    #[must_use]
    pub fn new(config: &TrackerConfig, settings: Settings) -> Self {
        Self {
            settings,
            gate: ConfirmationGate::new(config.debounce),
            active: None,
            background: BTreeMap::new(),
            host: HostState::default(),
            windows: WindowAggregator::new(config.max_pending_windows),
            idle: false,
            paused: false,
        }
    }

    /// Rebuilds an engine from persisted state.
    #[must_use]
    pub fn restore(
        config: &TrackerConfig,
        settings: Settings,
        buffer: ActivityBuffer,
        paused: bool,
    ) -> Self {
        let mut tracker = Self::new(config, settings);
        tracker.windows = WindowAggregator::from_buffer(buffer, config.max_pending_windows);
        tracker.paused = paused;
        tracker
    }

    /// Dispatches one host event.
    pub fn handle(&mut self, event: HostEvent, now: DateTime<Utc>) {
        tracing::debug!(event = event.name(), "host event");
        match event {
            HostEvent::TabActivated { tab_id, window_id } => {
                self.host.set_active_tab(window_id, tab_id);
                if self.host.focused_window() == Some(window_id) {
                    self.on_focus_moved(now);
                }
            }
            HostEvent::WindowFocusChanged { focus } => match focus {
                WindowFocus::ExtensionSurface => {
                    tracing::debug!("focus moved to extension surface, keeping tracking");
                }
                WindowFocus::Window(window_id) => {
                    self.host.set_focused_window(Some(window_id));
                    self.on_focus_moved(now);
                }
                WindowFocus::None => {
                    self.host.set_focused_window(None);
                    self.on_focus_moved(now);
                }
            },
            HostEvent::TabUrlChanged { tab_id, url } => {
                self.host.set_url(tab_id, url);
                if self.host.focused_tab() == Some(tab_id) {
                    self.consider_active(tab_id, now);
                } else {
                    self.consider_background(tab_id, now);
                }
            }
            HostEvent::TabAudibleChanged { tab_id, audible } => {
                self.host.set_signal(Signal::Audible, tab_id, audible);
                self.consider_background(tab_id, now);
            }
            HostEvent::VisibilityChanged { tab_id, visible } => {
                self.host.set_signal(Signal::Visible, tab_id, visible);
                self.consider_background(tab_id, now);
            }
            HostEvent::VideoPlayingChanged { tab_id, playing } => {
                self.host.set_signal(Signal::VideoPlaying, tab_id, playing);
                self.consider_background(tab_id, now);
            }
            HostEvent::TabRemoved { tab_id } => {
                self.gate.cancel(tab_id);
                if self.active_tab() == Some(tab_id) {
                    self.end_active(now);
                }
                self.end_background(tab_id, now);
                self.host.remove_tab(tab_id);
            }
            HostEvent::IdleStateChanged { state } => {
                if state.is_idle() {
                    self.enter_idle(now);
                } else {
                    self.exit_idle(now);
                }
            }
            HostEvent::SettingsChanged { settings } => {
                self.settings = settings;
                self.reconcile(now);
            }
            HostEvent::Paused => self.pause(now),
            HostEvent::Resumed => self.resume(now),
            HostEvent::Snapshot { snapshot } => {
                self.host = HostState::from(snapshot);
                self.reconcile(now);
            }
        }
    }

    /// Confirms every pending visit whose debounce deadline has passed.
    ///
    /// Returns the number of confirmations that fired (including stale ones
    /// that were discarded on re-validation).
    pub fn fire_due(&mut self, now: DateTime<Utc>) -> usize {
        let due = self.gate.take_due(now);
        let fired = due.len();
        for pending in due {
            self.confirm(pending, now);
        }
        fired
    }

    /// Hands elapsed whole seconds of every tracked tab to the aggregator.
    pub fn tick(&mut self, now: DateTime<Utc>) {
        if self.is_suspended() {
            return;
        }
        if let Some(record) = self.active.as_mut() {
            flush_record(&mut self.windows, &self.settings, record, now);
        }
        for record in self.background.values_mut() {
            flush_record(&mut self.windows, &self.settings, record, now);
        }
    }

    /// Fires due confirmations, then ticks.
    pub fn advance(&mut self, now: DateTime<Utc>) {
        self.fire_due(now);
        self.tick(now);
    }

    /// When the next pending confirmation is due.
    #[must_use]
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.gate.next_deadline()
    }

    /// Stops all tracking until [`resume`](Self::resume).
    pub fn pause(&mut self, now: DateTime<Utc>) {
        if self.paused {
            return;
        }
        self.paused = true;
        self.suspend(now);
        tracing::info!("tracking paused");
    }

    /// Resumes tracking, re-deriving state from the host mirror.
    pub fn resume(&mut self, now: DateTime<Utc>) {
        if !self.paused {
            return;
        }
        self.paused = false;
        tracing::info!("tracking resumed");
        self.reconcile(now);
    }

    fn enter_idle(&mut self, now: DateTime<Utc>) {
        if self.idle {
            return;
        }
        self.idle = true;
        self.suspend(now);
        tracing::info!("system idle, tracking suspended");
    }

    fn exit_idle(&mut self, now: DateTime<Utc>) {
        if !self.idle {
            return;
        }
        self.idle = false;
        tracing::info!("system active again");
        self.reconcile(now);
    }

    const fn is_suspended(&self) -> bool {
        self.idle || self.paused
    }

    /// Ends all tracking and drops every pending confirmation.
    fn suspend(&mut self, now: DateTime<Utc>) {
        self.end_active(now);
        let tracked: Vec<TabId> = self.background.keys().copied().collect();
        for tab_id in tracked {
            self.end_background(tab_id, now);
        }
        let cancelled = self.gate.cancel_all();
        if cancelled > 0 {
            tracing::debug!(cancelled, "cancelled pending confirmations");
        }
    }

    /// Brings tracking in line with the host mirror.
    fn reconcile(&mut self, now: DateTime<Utc>) {
        if self.is_suspended() {
            return;
        }
        self.on_focus_moved(now);
        let mut candidates: Vec<TabId> = self.background.keys().copied().collect();
        candidates.extend(
            self.gate
                .iter()
                .filter(|pending| pending.kind.is_background())
                .map(|pending| pending.tab_id),
        );
        candidates.extend(self.host.signals().eligible_tabs());
        candidates.sort_unstable();
        candidates.dedup();
        for tab_id in candidates {
            self.consider_background(tab_id, now);
        }
    }

    /// Reacts to a change of the focused window or of its active tab.
    fn on_focus_moved(&mut self, now: DateTime<Utc>) {
        let focused = self.host.focused_tab();

        if let Some(previous) = self.active_tab().filter(|tab| Some(*tab) != focused) {
            self.end_active(now);
            self.consider_background(previous, now);
        }

        let stale: Vec<TabId> = self
            .gate
            .iter()
            .filter(|pending| pending.kind == TrackingKind::Active)
            .map(|pending| pending.tab_id)
            .filter(|tab| Some(*tab) != focused)
            .collect();
        for tab_id in stale {
            self.gate.cancel(tab_id);
            self.consider_background(tab_id, now);
        }

        if let Some(tab_id) = focused {
            self.consider_active(tab_id, now);
        }
    }

    /// Arms, keeps, or ends active tracking for the focused tab.
    fn consider_active(&mut self, tab_id: TabId, now: DateTime<Utc>) {
        if self.is_suspended() {
            return;
        }
        let Some(url) = self.host.url(tab_id).map(str::to_owned) else {
            return;
        };
        let Some(domain) = classify(&url, &self.settings) else {
            self.gate.cancel_kind(tab_id, TrackingKind::Active);
            if self.active_tab() == Some(tab_id) {
                self.end_active(now);
            }
            return;
        };

        if let Some(record) = self.active.as_mut().filter(|r| r.tab_id == tab_id) {
            if record.domain == domain {
                record.url = url;
                return;
            }
            self.end_active(now);
        }

        let already_pending = self
            .gate
            .get(tab_id)
            .is_some_and(|p| p.kind == TrackingKind::Active && p.domain == domain);
        if already_pending {
            self.gate.update_url(tab_id, &url);
            return;
        }

        self.end_background(tab_id, now);
        tracing::debug!(tab = %tab_id, %domain, "arming active confirmation");
        self.gate.arm(tab_id, domain, url, TrackingKind::Active, now);
    }

    /// Arms, keeps, or ends background tracking for a non-focused tab.
    fn consider_background(&mut self, tab_id: TabId, now: DateTime<Utc>) {
        if self.is_suspended() {
            return;
        }
        if self.host.focused_tab() == Some(tab_id) || self.active_tab() == Some(tab_id) {
            return;
        }

        let domain = if self.host.signals().any(tab_id) {
            self.host
                .url(tab_id)
                .and_then(|url| classify(url, &self.settings))
        } else {
            None
        };
        let Some(domain) = domain else {
            self.gate.cancel_kind(tab_id, TrackingKind::Background);
            self.end_background(tab_id, now);
            return;
        };
        let url = self.host.url(tab_id).unwrap_or_default().to_owned();

        if let Some(record) = self.background.get_mut(&tab_id) {
            if record.domain == domain {
                record.url = url;
                return;
            }
            self.end_background(tab_id, now);
        }

        let already_pending = self
            .gate
            .get(tab_id)
            .is_some_and(|p| p.kind == TrackingKind::Background && p.domain == domain);
        if already_pending {
            self.gate.update_url(tab_id, &url);
            return;
        }

        tracing::debug!(tab = %tab_id, %domain, "arming background confirmation");
        self.gate.arm(tab_id, domain, url, TrackingKind::Background, now);
    }

    /// Installs a confirmed visit after re-validating it against current state.
    fn confirm(&mut self, pending: PendingConfirmation, now: DateTime<Utc>) {
        let tab_id = pending.tab_id;
        if self.is_suspended() {
            tracing::debug!(tab = %tab_id, "dropping confirmation while suspended");
            return;
        }
        let url = self.host.url(tab_id).map(str::to_owned);
        let current = url.as_deref().and_then(|url| classify(url, &self.settings));
        if current.as_ref() != Some(&pending.domain) {
            tracing::debug!(
                tab = %tab_id,
                domain = %pending.domain,
                "discarding stale confirmation"
            );
            return;
        }
        let url = url.unwrap_or(pending.url);

        match pending.kind {
            TrackingKind::Active => {
                if self.host.focused_tab() != Some(tab_id) {
                    return;
                }
                self.end_active(now);
                self.end_background(tab_id, now);
                tracing::debug!(tab = %tab_id, domain = %pending.domain, "tracking active tab");
                self.active = Some(TabRecord::new(
                    tab_id,
                    pending.domain,
                    url,
                    TrackingKind::Active,
                    now,
                ));
            }
            TrackingKind::Background => {
                let eligible = self.host.focused_tab() != Some(tab_id)
                    && self.active_tab() != Some(tab_id)
                    && self.host.signals().any(tab_id)
                    && !self.background.contains_key(&tab_id);
                if !eligible {
                    return;
                }
                tracing::debug!(tab = %tab_id, domain = %pending.domain, "tracking background tab");
                self.background.insert(
                    tab_id,
                    TabRecord::new(tab_id, pending.domain, url, TrackingKind::Background, now),
                );
            }
        }
    }

    fn end_active(&mut self, now: DateTime<Utc>) {
        if let Some(mut record) = self.active.take() {
            flush_record(&mut self.windows, &self.settings, &mut record, now);
            tracing::debug!(
                tab = %record.tab_id,
                domain = %record.domain,
                seconds = (record.attributed_until - record.start_time).num_seconds(),
                "ended active tracking"
            );
        }
    }

    fn end_background(&mut self, tab_id: TabId, now: DateTime<Utc>) {
        if let Some(mut record) = self.background.remove(&tab_id) {
            // Active time claims shared seconds before background time.
            if let Some(active) = self.active.as_mut() {
                flush_record(&mut self.windows, &self.settings, active, now);
            }
            flush_record(&mut self.windows, &self.settings, &mut record, now);
            tracing::debug!(
                tab = %record.tab_id,
                domain = %record.domain,
                seconds = (record.attributed_until - record.start_time).num_seconds(),
                "ended background tracking"
            );
        }
    }

    fn active_tab(&self) -> Option<TabId> {
        self.active.as_ref().map(|record| record.tab_id)
    }

    /// The oldest undelivered window, with finality computed against `now`.
    #[must_use]
    pub fn current_window(&self, now: DateTime<Utc>) -> Option<ActivityWindow> {
        self.windows.current_window(now)
    }

    /// Drops a window after `delivered` was sent for it.
    ///
    /// Returns the held copy, or `None` if it was already cleared.
    pub fn complete_window(&mut self, delivered: &ActivityWindow) -> Option<ActivityWindow> {
        self.windows.clear_delivered(delivered)
    }

    #[must_use]
    pub const fn windows(&self) -> &WindowAggregator {
        &self.windows
    }

    pub const fn windows_mut(&mut self) -> &mut WindowAggregator {
        &mut self.windows
    }

    #[must_use]
    pub const fn active(&self) -> Option<&TabRecord> {
        self.active.as_ref()
    }

    pub fn background(&self) -> impl Iterator<Item = &TabRecord> {
        self.background.values()
    }

    #[must_use]
    pub fn pending(&self, tab_id: TabId) -> Option<&PendingConfirmation> {
        self.gate.get(tab_id)
    }

    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub const fn host(&self) -> &HostState {
        &self.host
    }

    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.idle
    }

    #[must_use]
    pub const fn is_paused(&self) -> bool {
        self.paused
    }

    #[must_use]
    pub fn status(&self) -> TrackerStatus {
        TrackerStatus {
            is_paused: self.paused,
            is_idle: self.idle,
            active_domain: self.active.as_ref().map(|r| r.domain.clone()),
            background_domains: self.background.values().map(|r| r.domain.clone()).collect(),
            pending_confirmations: self.gate.len(),
            pending_windows: self.windows.pending_windows(),
        }
    }
}

/// Moves the whole seconds elapsed since `record.attributed_until` into the
/// aggregator. Returns the seconds recorded.
fn flush_record(
    windows: &mut WindowAggregator,
    settings: &Settings,
    record: &mut TabRecord,
    now: DateTime<Utc>,
) -> u64 {
    let elapsed = (now - record.attributed_until).num_seconds();
    if elapsed > MAX_ATTRIBUTION_GAP_SECS {
        tracing::warn!(
            tab = %record.tab_id,
            gap_secs = elapsed,
            "skipping unattributed gap, host was likely asleep"
        );
        record.attributed_until = now;
        return 0;
    }
    let Ok(seconds) = u64::try_from(elapsed) else {
        return 0;
    };
    if seconds == 0 {
        return 0;
    }
    let url = if should_track_full_url(record.domain.as_str(), &settings.track_full_url_domains)
    {
        normalize_visit_url(&record.url)
    } else {
        None
    };
    let recorded = windows.record(
        &record.domain,
        record.kind,
        url.as_deref(),
        record.attributed_until,
        seconds,
    );
    record.attributed_until += TimeDelta::seconds(elapsed);
    recorded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{HostSnapshot, IdleState, TabSnapshot};
    use crate::types::WindowId;

    /// A window boundary, in milliseconds.
    const BASE_MS: i64 = 1_700_000_100_000;
    const WIN: WindowId = WindowId(1);

    fn t(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(BASE_MS + ms).unwrap()
    }

    fn domain(name: &str) -> Domain {
        Domain::new(name).unwrap()
    }

    fn tracker() -> Tracker {
        let mut tracker = Tracker::new(&TrackerConfig::default(), Settings::default());
        tracker.handle(
            HostEvent::WindowFocusChanged {
                focus: WindowFocus::Window(WIN),
            },
            t(0),
        );
        tracker
    }

    fn open(tracker: &mut Tracker, tab: i64, url: &str, at: i64) {
        tracker.handle(
            HostEvent::TabUrlChanged {
                tab_id: TabId(tab),
                url: url.to_string(),
            },
            t(at),
        );
        tracker.handle(
            HostEvent::TabActivated {
                tab_id: TabId(tab),
                window_id: WIN,
            },
            t(at),
        );
    }

    /// Advances once per second over `(from, to]`.
    fn run(tracker: &mut Tracker, from: i64, to: i64) {
        let mut at = from + 1_000;
        while at <= to {
            tracker.advance(t(at));
            at += 1_000;
        }
    }

    fn seconds(tracker: &Tracker, name: &str, now: i64) -> (u64, u64) {
        tracker
            .current_window(t(now))
            .and_then(|w| w.domains.get(&domain(name)).cloned())
            .map_or((0, 0), |b| (b.active_seconds, b.background_seconds))
    }

    #[test]
    fn short_visit_records_nothing() {
        let mut tracker = tracker();
        open(&mut tracker, 1, "https://example.com/", 0);
        run(&mut tracker, 0, 3_000);
        open(&mut tracker, 2, "chrome://newtab/", 3_000);
        run(&mut tracker, 3_000, 20_000);
        assert!(tracker.current_window(t(20_000)).is_none());
        assert!(tracker.active().is_none());
        assert!(tracker.pending(TabId(1)).is_none());
    }

    #[test]
    fn visit_counts_after_debounce() {
        let mut tracker = tracker();
        open(&mut tracker, 1, "https://example.com/", 0);
        run(&mut tracker, 0, 7_000);
        open(&mut tracker, 2, "chrome://newtab/", 7_000);
        assert_eq!(seconds(&tracker, "example.com", 7_000), (2, 0));
    }

    #[test]
    fn rapid_flapping_keeps_one_pending_per_tab() {
        let mut tracker = tracker();
        tracker.handle(
            HostEvent::TabUrlChanged {
                tab_id: TabId(2),
                url: "https://b.com".to_string(),
            },
            t(0),
        );
        for i in 0..40 {
            let tab = if i % 2 == 0 { 1 } else { 2 };
            open(&mut tracker, tab, "https://a.com", i * 100);
            tracker.advance(t(i * 100));
            let pending_tabs: Vec<_> = tracker.gate.iter().map(|p| p.tab_id).collect();
            assert!(pending_tabs.len() <= 1, "{pending_tabs:?}");
        }
        assert!(tracker.active().is_none());
    }

    #[test]
    fn reactivating_same_tab_does_not_restart_debounce() {
        let mut tracker = tracker();
        open(&mut tracker, 1, "https://a.com", 0);
        open(&mut tracker, 1, "https://a.com", 3_000);
        tracker.advance(t(5_000));
        assert_eq!(tracker.active().map(|r| r.tab_id), Some(TabId(1)));
    }

    #[test]
    fn domain_change_rearms_same_domain_only_updates_url() {
        let mut tracker = tracker();
        open(&mut tracker, 1, "https://a.com/one", 0);
        run(&mut tracker, 0, 8_000);
        tracker.handle(
            HostEvent::TabUrlChanged {
                tab_id: TabId(1),
                url: "https://a.com/two".to_string(),
            },
            t(8_000),
        );
        let active = tracker.active().unwrap();
        assert_eq!(active.url, "https://a.com/two");
        assert_eq!(active.start_time, t(5_000));

        tracker.handle(
            HostEvent::TabUrlChanged {
                tab_id: TabId(1),
                url: "https://b.com/".to_string(),
            },
            t(8_000),
        );
        assert!(tracker.active().is_none());
        assert_eq!(tracker.pending(TabId(1)).unwrap().domain, domain("b.com"));
        run(&mut tracker, 8_000, 15_000);
        assert_eq!(seconds(&tracker, "a.com", 15_000), (3, 0));
        assert_eq!(seconds(&tracker, "b.com", 15_000), (2, 0));
    }

    #[test]
    fn blocked_and_internal_urls_are_never_tracked() {
        let mut tracker = Tracker::new(
            &TrackerConfig::default(),
            Settings {
                blocklist: vec!["social.net".to_string()],
                track_full_url_domains: Vec::new(),
            },
        );
        tracker.handle(
            HostEvent::WindowFocusChanged {
                focus: WindowFocus::Window(WIN),
            },
            t(0),
        );
        open(&mut tracker, 1, "https://m.social.net/feed", 0);
        assert!(tracker.pending(TabId(1)).is_none());
        open(&mut tracker, 2, "about:blank", 0);
        run(&mut tracker, 0, 10_000);
        assert!(tracker.current_window(t(10_000)).is_none());
    }

    #[test]
    fn focus_loss_moves_audible_tab_to_background() {
        let mut tracker = tracker();
        open(&mut tracker, 1, "https://music.com", 0);
        tracker.handle(
            HostEvent::TabAudibleChanged {
                tab_id: TabId(1),
                audible: true,
            },
            t(0),
        );
        run(&mut tracker, 0, 10_000);
        tracker.handle(
            HostEvent::WindowFocusChanged {
                focus: WindowFocus::None,
            },
            t(10_000),
        );
        assert!(tracker.active().is_none());
        assert_eq!(
            tracker.pending(TabId(1)).map(|p| p.kind),
            Some(TrackingKind::Background)
        );
        run(&mut tracker, 10_000, 17_000);
        assert_eq!(seconds(&tracker, "music.com", 17_000), (5, 2));

        // Losing the last signal ends background tracking without debounce.
        tracker.handle(
            HostEvent::TabAudibleChanged {
                tab_id: TabId(1),
                audible: false,
            },
            t(17_000),
        );
        assert_eq!(tracker.background().count(), 0);
        run(&mut tracker, 17_000, 30_000);
        assert_eq!(seconds(&tracker, "music.com", 30_000), (5, 2));
    }

    #[test]
    fn focus_loss_without_signals_ends_tracking() {
        let mut tracker = tracker();
        open(&mut tracker, 1, "https://a.com", 0);
        run(&mut tracker, 0, 6_000);
        tracker.handle(
            HostEvent::WindowFocusChanged {
                focus: WindowFocus::None,
            },
            t(6_000),
        );
        assert!(tracker.active().is_none());
        assert!(tracker.pending(TabId(1)).is_none());
    }

    #[test]
    fn extension_surface_is_not_a_focus_loss() {
        let mut tracker = tracker();
        open(&mut tracker, 1, "https://a.com", 0);
        run(&mut tracker, 0, 6_000);
        tracker.handle(
            HostEvent::WindowFocusChanged {
                focus: WindowFocus::ExtensionSurface,
            },
            t(6_000),
        );
        run(&mut tracker, 6_000, 9_000);
        assert_eq!(tracker.active().map(|r| r.tab_id), Some(TabId(1)));
        assert_eq!(seconds(&tracker, "a.com", 9_000), (4, 0));
    }

    #[test]
    fn visible_tab_in_other_window_tracks_background() {
        let mut tracker = tracker();
        open(&mut tracker, 1, "https://a.com", 0);
        tracker.handle(
            HostEvent::TabUrlChanged {
                tab_id: TabId(9),
                url: "https://video.com/watch".to_string(),
            },
            t(0),
        );
        tracker.handle(
            HostEvent::VideoPlayingChanged {
                tab_id: TabId(9),
                playing: true,
            },
            t(0),
        );
        run(&mut tracker, 0, 8_000);
        assert_eq!(seconds(&tracker, "a.com", 8_000), (3, 0));
        assert_eq!(seconds(&tracker, "video.com", 8_000), (0, 3));

        // Activating the background tab makes it active after its own debounce.
        tracker.handle(
            HostEvent::TabActivated {
                tab_id: TabId(9),
                window_id: WIN,
            },
            t(8_000),
        );
        assert_eq!(tracker.background().count(), 0);
        run(&mut tracker, 8_000, 14_000);
        assert_eq!(tracker.active().map(|r| r.tab_id), Some(TabId(9)));
        assert_eq!(seconds(&tracker, "video.com", 14_000), (1, 3));
    }

    #[test]
    fn audible_tab_on_focused_domain_does_not_double_count() {
        let mut tracker = tracker();
        open(&mut tracker, 1, "https://a.com/x", 0);
        tracker.handle(
            HostEvent::TabUrlChanged {
                tab_id: TabId(2),
                url: "https://a.com/y".to_string(),
            },
            t(0),
        );
        tracker.handle(
            HostEvent::TabAudibleChanged {
                tab_id: TabId(2),
                audible: true,
            },
            t(0),
        );
        run(&mut tracker, 0, 60_000);
        assert_eq!(tracker.background().count(), 1);
        let (active, background) = seconds(&tracker, "a.com", 60_000);
        assert!(active + background <= 60);
        assert_eq!((active, background), (55, 0));

        // Ending the background tab between ticks still leaves the seconds to the active tab.
        tracker.handle(
            HostEvent::TabAudibleChanged {
                tab_id: TabId(2),
                audible: false,
            },
            t(62_500),
        );
        assert_eq!(tracker.background().count(), 0);
        assert_eq!(seconds(&tracker, "a.com", 62_500), (57, 0));
    }

    #[test]
    fn tab_removed_ends_tracking_and_pending() {
        let mut tracker = tracker();
        open(&mut tracker, 1, "https://a.com", 0);
        run(&mut tracker, 0, 6_000);
        tracker.handle(HostEvent::TabRemoved { tab_id: TabId(1) }, t(6_500));
        assert!(tracker.active().is_none());
        assert!(tracker.host().url(TabId(1)).is_none());
        assert_eq!(seconds(&tracker, "a.com", 7_000), (1, 0));
    }

    #[test]
    fn idle_ends_tracking_and_rederives_on_return() {
        let mut tracker = tracker();
        open(&mut tracker, 1, "https://a.com", 0);
        run(&mut tracker, 0, 10_000);
        tracker.handle(
            HostEvent::IdleStateChanged {
                state: IdleState::Idle,
            },
            t(10_000),
        );
        assert!(tracker.active().is_none());
        assert!(tracker.is_idle());

        // Signals keep flowing while idle; tracking does not.
        tracker.handle(
            HostEvent::TabUrlChanged {
                tab_id: TabId(1),
                url: "https://b.com".to_string(),
            },
            t(12_000),
        );
        run(&mut tracker, 10_000, 20_000);
        assert!(tracker.pending(TabId(1)).is_none());

        tracker.handle(
            HostEvent::IdleStateChanged {
                state: IdleState::Active,
            },
            t(20_000),
        );
        assert_eq!(tracker.pending(TabId(1)).unwrap().domain, domain("b.com"));
        run(&mut tracker, 20_000, 26_000);
        assert_eq!(seconds(&tracker, "a.com", 26_000), (5, 0));
        assert_eq!(seconds(&tracker, "b.com", 26_000), (1, 0));
    }

    #[test]
    fn idle_cancels_pending_confirmations() {
        let mut tracker = tracker();
        open(&mut tracker, 1, "https://a.com", 0);
        tracker.handle(
            HostEvent::IdleStateChanged {
                state: IdleState::Locked,
            },
            t(2_000),
        );
        tracker.handle(
            HostEvent::IdleStateChanged {
                state: IdleState::Active,
            },
            t(3_000),
        );
        // The original deadline at 5s must not fire.
        tracker.advance(t(5_000));
        assert!(tracker.active().is_none());
        assert_eq!(tracker.next_deadline(), Some(t(8_000)));
        tracker.advance(t(8_000));
        assert!(tracker.active().is_some());
    }

    #[test]
    fn pause_and_resume() {
        let mut tracker = tracker();
        open(&mut tracker, 1, "https://a.com", 0);
        run(&mut tracker, 0, 7_000);
        tracker.handle(HostEvent::Paused, t(7_000));
        assert!(tracker.is_paused());
        assert!(tracker.active().is_none());
        open(&mut tracker, 2, "https://b.com", 8_000);
        assert!(tracker.pending(TabId(2)).is_none());
        run(&mut tracker, 7_000, 20_000);
        tracker.handle(HostEvent::Resumed, t(20_000));
        assert_eq!(tracker.pending(TabId(2)).unwrap().domain, domain("b.com"));
        run(&mut tracker, 20_000, 27_000);
        assert_eq!(seconds(&tracker, "a.com", 27_000), (2, 0));
        assert_eq!(seconds(&tracker, "b.com", 27_000), (2, 0));
    }

    #[test]
    fn settings_change_stops_tracking_blocked_domain() {
        let mut tracker = tracker();
        open(&mut tracker, 1, "https://a.com", 0);
        run(&mut tracker, 0, 7_000);
        tracker.handle(
            HostEvent::SettingsChanged {
                settings: Settings {
                    blocklist: vec!["a.com".to_string()],
                    track_full_url_domains: Vec::new(),
                },
            },
            t(7_000),
        );
        assert!(tracker.active().is_none());
        assert!(tracker.pending(TabId(1)).is_none());
        run(&mut tracker, 7_000, 12_000);
        assert_eq!(seconds(&tracker, "a.com", 12_000), (2, 0));
    }

    #[test]
    fn full_url_tracking_records_normalized_urls() {
        let mut tracker = Tracker::new(
            &TrackerConfig::default(),
            Settings {
                blocklist: Vec::new(),
                track_full_url_domains: vec!["github.com".to_string()],
            },
        );
        tracker.handle(
            HostEvent::WindowFocusChanged {
                focus: WindowFocus::Window(WIN),
            },
            t(0),
        );
        open(&mut tracker, 1, "https://github.com/rust-lang/rust?tab=readme", 0);
        run(&mut tracker, 0, 8_000);
        let window = tracker.current_window(t(8_000)).unwrap();
        let bucket = &window.domains[&domain("github.com")];
        assert_eq!(
            bucket.top_url(),
            Some(("https://github.com/rust-lang/rust", 3))
        );
    }

    #[test]
    fn snapshot_reconciles_state() {
        let mut tracker = tracker();
        open(&mut tracker, 1, "https://a.com", 0);
        run(&mut tracker, 0, 6_000);
        tracker.handle(
            HostEvent::Snapshot {
                snapshot: HostSnapshot {
                    focused_window: Some(WIN),
                    tabs: vec![
                        TabSnapshot {
                            tab_id: TabId(1),
                            window_id: WIN,
                            url: Some("https://a.com".to_string()),
                            active: true,
                            visible: true,
                            audible: false,
                            video_playing: false,
                        },
                        TabSnapshot {
                            tab_id: TabId(2),
                            window_id: WindowId(2),
                            url: Some("https://radio.com".to_string()),
                            active: true,
                            visible: false,
                            audible: true,
                            video_playing: false,
                        },
                    ],
                },
            },
            t(6_000),
        );
        // The active tab keeps tracking without a new debounce.
        assert_eq!(tracker.active().unwrap().start_time, t(5_000));
        assert_eq!(
            tracker.pending(TabId(2)).map(|p| p.kind),
            Some(TrackingKind::Background)
        );
    }

    #[test]
    fn long_gap_is_not_attributed() {
        let mut tracker = tracker();
        open(&mut tracker, 1, "https://a.com", 0);
        run(&mut tracker, 0, 6_000);
        tracker.tick(t(6_000 + 3_600_000));
        tracker.tick(t(6_000 + 3_601_000));
        let buffer = tracker.windows().to_buffer();
        assert_eq!(buffer.windows.len(), 2);
        let total: u64 = buffer
            .windows
            .iter()
            .map(|w| w.domains[&domain("a.com")].active_seconds)
            .sum();
        assert_eq!(total, 2);
    }

    #[test]
    fn active_seconds_never_exceed_window_elapsed() {
        let mut tracker = tracker();
        open(&mut tracker, 1, "https://a.com", 0);
        tracker.handle(
            HostEvent::TabUrlChanged {
                tab_id: TabId(2),
                url: "https://b.com".to_string(),
            },
            t(0),
        );
        // Switch between two tabs every 7.5 seconds across a window boundary.
        let mut at = 0;
        let mut tab = 1;
        while at < 400_000 {
            tracker.advance(t(at));
            if at % 7_500 == 0 {
                tab = if tab == 1 { 2 } else { 1 };
                tracker.handle(
                    HostEvent::TabActivated {
                        tab_id: TabId(tab),
                        window_id: WIN,
                    },
                    t(at),
                );
            }
            at += 500;
        }
        let window = tracker.current_window(t(at)).unwrap();
        assert!(window.is_final);
        let elapsed =
            u64::try_from((window.window_end() - window.window_start).num_seconds()).unwrap();
        assert!(window.total_active_seconds() <= elapsed);
        assert!(window.total_active_seconds() > 0);
    }

    #[test]
    fn status_reports_state() {
        let mut tracker = tracker();
        open(&mut tracker, 1, "https://a.com", 0);
        let status = tracker.status();
        assert_eq!(status.pending_confirmations, 1);
        assert!(status.active_domain.is_none());
        run(&mut tracker, 0, 6_000);
        let status = tracker.status();
        assert_eq!(status.active_domain, Some(domain("a.com")));
        assert_eq!(status.pending_windows, 1);
    }
}
