//! Five-minute activity windows.
//!
//! Seconds are attributed to wall-clock aligned windows
//! (`floor(t / 5min) * 5min`). The aggregator keeps every window that has
//! received time and has not yet been delivered, oldest first. A window is
//! final once wall-clock time has passed its end; finality is computed when
//! the window is read and is never stored.
//!
//! # Late attribution
//!
//! Tracked tabs hand over whole seconds, each second going to the window in
//! which it started. A final window therefore still accepts seconds that
//! happened inside its interval but were flushed late. Once a window has
//! been delivered and cleared it is frozen: it is never re-created with
//! partial content. Seconds that would land in a frozen window move forward
//! to the start of the first open window instead, as do seconds a window
//! gained between being read for delivery and being cleared.
//!
//! # Overlap
//!
//! A domain is covered at most once per second. When a focused tab and an
//! audible background tab share a domain, the second goes to whichever kind
//! records it first; the tracker flushes active time first.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Domain, TrackingKind};

/// Length of an activity window in minutes.
pub const WINDOW_MINUTES: u32 = 5;

/// Length of an activity window in seconds.
pub const WINDOW_SECONDS: i64 = WINDOW_MINUTES as i64 * 60;

/// Maximum distinct URLs recorded per domain per window.
pub const MAX_URLS_PER_DOMAIN: usize = 50;

/// Default bound on undelivered windows held in memory (24 hours).
pub const DEFAULT_MAX_PENDING_WINDOWS: usize = 288;

/// Returns the start of the window containing `t`.
pub fn window_start_for(t: DateTime<Utc>) -> DateTime<Utc> {
    let secs = t.timestamp().div_euclid(WINDOW_SECONDS) * WINDOW_SECONDS;
    DateTime::from_timestamp(secs, 0).unwrap_or(t)
}

fn window_len() -> TimeDelta {
    TimeDelta::seconds(WINDOW_SECONDS)
}

/// Per-domain totals inside one window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainBucket {
    pub active_seconds: u64,
    pub background_seconds: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub url_visit_seconds: BTreeMap<String, u64>,
}

impl DomainBucket {
    fn add(&mut self, kind: TrackingKind, seconds: u64, url: Option<&str>) {
        match kind {
            TrackingKind::Active => self.active_seconds += seconds,
            TrackingKind::Background => self.background_seconds += seconds,
        }
        let Some(url) = url else {
            return;
        };
        if let Some(total) = self.url_visit_seconds.get_mut(url) {
            *total += seconds;
        } else if self.url_visit_seconds.len() < MAX_URLS_PER_DOMAIN {
            self.url_visit_seconds.insert(url.to_string(), seconds);
        }
    }

    /// Total of active and background seconds.
    #[must_use]
    pub const fn total_seconds(&self) -> u64 {
        self.active_seconds + self.background_seconds
    }

    /// The URL with the most recorded seconds; ties go to the smallest URL.
    #[must_use]
    pub fn top_url(&self) -> Option<(&str, u64)> {
        self.url_visit_seconds
            .iter()
            .fold(None, |best: Option<(&str, u64)>, (url, secs)| match best {
                Some((_, best_secs)) if best_secs >= *secs => best,
                _ => Some((url.as_str(), *secs)),
            })
    }
}

/// A read-only view of one window, as reported to the collector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityWindow {
    pub window_start: DateTime<Utc>,
    pub window_minutes: u32,
    pub is_final: bool,
    pub domains: BTreeMap<Domain, DomainBucket>,
}

impl ActivityWindow {
    /// End of the window's interval (exclusive).
    #[must_use]
    pub fn window_end(&self) -> DateTime<Utc> {
        self.window_start + window_len()
    }

    #[must_use]
    pub fn total_active_seconds(&self) -> u64 {
        self.domains.values().map(|b| b.active_seconds).sum()
    }

    #[must_use]
    pub fn total_background_seconds(&self) -> u64 {
        self.domains.values().map(|b| b.background_seconds).sum()
    }
}

/// Persisted form of one undelivered window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredWindow {
    pub window_start: DateTime<Utc>,
    pub domains: BTreeMap<Domain, DomainBucket>,
}

/// Persisted form of the aggregator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActivityBuffer {
    pub windows: Vec<StoredWindow>,
    pub delivered_through: Option<DateTime<Utc>>,
}

/// Accumulates seconds per domain into five-minute windows.
#[derive(Debug, Clone)]
pub struct WindowAggregator {
    windows: BTreeMap<DateTime<Utc>, BTreeMap<Domain, DomainBucket>>,
    /// Start of the newest window that has been delivered and cleared.
    delivered_through: Option<DateTime<Utc>>,
    /// Per domain, the time up to which seconds have been counted.
    coverage: HashMap<Domain, DateTime<Utc>>,
    max_pending: usize,
    dirty: bool,
}

impl Default for WindowAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PENDING_WINDOWS)
    }
}

impl WindowAggregator {
    #[must_use]
    pub fn new(max_pending: usize) -> Self {
        Self {
            windows: BTreeMap::new(),
            delivered_through: None,
            coverage: HashMap::new(),
            max_pending: max_pending.max(1),
            dirty: false,
        }
    }

    /// Rebuilds an aggregator from its persisted buffer.
    #[must_use]
    pub fn from_buffer(buffer: ActivityBuffer, max_pending: usize) -> Self {
        let mut aggregator = Self::new(max_pending);
        aggregator.delivered_through = buffer.delivered_through;
        for stored in buffer.windows {
            let start = window_start_for(stored.window_start);
            if stored.domains.is_empty() || aggregator.is_frozen(start) {
                continue;
            }
            aggregator.windows.insert(start, stored.domains);
        }
        aggregator.enforce_bound();
        aggregator
    }

    /// Snapshot for persistence.
    #[must_use]
    pub fn to_buffer(&self) -> ActivityBuffer {
        ActivityBuffer {
            windows: self
                .windows
                .iter()
                .map(|(start, domains)| StoredWindow {
                    window_start: *start,
                    domains: domains.clone(),
                })
                .collect(),
            delivered_through: self.delivered_through,
        }
    }

    /// Attributes `seconds` whole seconds starting at `from` to `domain`.
    ///
    /// Each second goes to the window in which it starts, so a span that
    /// crosses a boundary is split between windows. Seconds that start in a
    /// delivered window are recorded from the start of the first open window.
    /// Returns the number of seconds actually recorded.
    pub fn record(
        &mut self,
        domain: &Domain,
        kind: TrackingKind,
        url: Option<&str>,
        from: DateTime<Utc>,
        seconds: u64,
    ) -> u64 {
        let (from, seconds) = self.clip_to_coverage(domain, from, seconds);
        if seconds == 0 {
            return 0;
        }
        // Coverage ends at or before `from` here, so the carried span is uncovered.
        let cursor = match self.first_open_window() {
            Some(open) if from < open => {
                tracing::debug!(
                    domain = %domain,
                    window = %window_start_for(from),
                    seconds,
                    "moving seconds out of delivered window"
                );
                open
            }
            _ => from,
        };
        self.record_span(domain, kind, url, cursor, seconds)
    }

    /// Adds `seconds` starting at `cursor` and advances the domain's coverage.
    fn record_span(
        &mut self,
        domain: &Domain,
        kind: TrackingKind,
        url: Option<&str>,
        mut cursor: DateTime<Utc>,
        seconds: u64,
    ) -> u64 {
        self.coverage.insert(domain.clone(), cursor + seconds_delta(seconds));
        let mut remaining = seconds;
        while remaining > 0 {
            let start = window_start_for(cursor);
            let until_boundary = (start + window_len() - cursor).num_milliseconds();
            // Number of whole seconds starting before the boundary.
            let fits = u64::try_from((until_boundary + 999) / 1000).unwrap_or(0).max(1);
            let chunk = fits.min(remaining);
            self.windows
                .entry(start)
                .or_default()
                .entry(domain.clone())
                .or_default()
                .add(kind, chunk, url);
            cursor += seconds_delta(chunk);
            remaining -= chunk;
        }
        self.dirty = true;
        self.enforce_bound();
        seconds
    }

    /// Skips the part of `[from, from + seconds)` already counted for this
    /// domain, whatever its kind.
    fn clip_to_coverage(
        &self,
        domain: &Domain,
        from: DateTime<Utc>,
        seconds: u64,
    ) -> (DateTime<Utc>, u64) {
        let Some(covered) = self.coverage.get(domain) else {
            return (from, seconds);
        };
        if *covered <= from {
            return (from, seconds);
        }
        let overlap_ms = (*covered - from).num_milliseconds();
        let skip = u64::try_from((overlap_ms + 999) / 1000).unwrap_or(u64::MAX);
        if skip >= seconds {
            return (from, 0);
        }
        (from + seconds_delta(skip), seconds - skip)
    }

    /// Start of the earliest window that still accepts seconds, once any
    /// window has been delivered.
    fn first_open_window(&self) -> Option<DateTime<Utc>> {
        self.delivered_through.map(|delivered| delivered + window_len())
    }

    fn is_frozen(&self, window_start: DateTime<Utc>) -> bool {
        self.delivered_through
            .is_some_and(|delivered| window_start <= delivered)
    }

    fn enforce_bound(&mut self) {
        while self.windows.len() > self.max_pending {
            if let Some((start, _)) = self.windows.pop_first() {
                tracing::warn!(window = %start, "dropping oldest undelivered window");
                self.dirty = true;
            }
        }
    }

    /// The oldest undelivered window, or `None` when nothing has been recorded.
    ///
    /// `is_final` is computed against `now`.
    #[must_use]
    pub fn current_window(&self, now: DateTime<Utc>) -> Option<ActivityWindow> {
        let (start, domains) = self
            .windows
            .iter()
            .find(|(_, domains)| !domains.is_empty())?;
        Some(ActivityWindow {
            window_start: *start,
            window_minutes: WINDOW_MINUTES,
            is_final: *start + window_len() <= now,
            domains: domains.clone(),
        })
    }

    /// Removes the window starting at `window_start` after it has been delivered.
    ///
    /// Returns the removed window, or `None` if it is no longer held (for
    /// example because it was already cleared).
    fn clear(&mut self, window_start: DateTime<Utc>) -> Option<ActivityWindow> {
        let domains = self.windows.remove(&window_start)?;
        self.delivered_through = Some(
            self.delivered_through
                .map_or(window_start, |previous| previous.max(window_start)),
        );
        // Anything older than a delivered window can no longer be sent.
        let frozen: Vec<_> = self
            .windows
            .range(..window_start)
            .map(|(start, _)| *start)
            .collect();
        for start in frozen {
            tracing::warn!(window = %start, "discarding window older than a delivered one");
            self.windows.remove(&start);
        }
        self.coverage.retain(|_, covered| *covered > window_start);
        self.dirty = true;
        Some(ActivityWindow {
            window_start,
            window_minutes: WINDOW_MINUTES,
            is_final: true,
            domains,
        })
    }

    /// Removes a delivered window, keeping what it gained after `delivered`
    /// was read.
    ///
    /// Seconds held beyond the delivered copy are carried into the first open
    /// window, placed after the domain's existing coverage.
    pub fn clear_delivered(&mut self, delivered: &ActivityWindow) -> Option<ActivityWindow> {
        let held = self.clear(delivered.window_start)?;
        for (domain, bucket) in &held.domains {
            let sent = delivered.domains.get(domain);
            let active = bucket
                .active_seconds
                .saturating_sub(sent.map_or(0, |b| b.active_seconds));
            let background = bucket
                .background_seconds
                .saturating_sub(sent.map_or(0, |b| b.background_seconds));
            self.carry(domain, TrackingKind::Active, active);
            self.carry(domain, TrackingKind::Background, background);
        }
        Some(held)
    }

    fn carry(&mut self, domain: &Domain, kind: TrackingKind, seconds: u64) {
        let Some(open) = self.first_open_window() else {
            return;
        };
        if seconds == 0 {
            return;
        }
        let from = self
            .coverage
            .get(domain)
            .map_or(open, |covered| (*covered).max(open));
        tracing::debug!(domain = %domain, seconds, "carrying seconds gained after delivery");
        self.record_span(domain, kind, None, from, seconds);
    }

    /// Number of windows holding undelivered time.
    #[must_use]
    pub fn pending_windows(&self) -> usize {
        self.windows.len()
    }

    #[must_use]
    pub const fn delivered_through(&self) -> Option<DateTime<Utc>> {
        self.delivered_through
    }

    /// Whether anything changed since the last [`mark_clean`](Self::mark_clean).
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

fn seconds_delta(seconds: u64) -> TimeDelta {
    TimeDelta::seconds(i64::try_from(seconds).unwrap_or(i64::MAX / 1000))
}
