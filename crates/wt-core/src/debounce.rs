//! Confirmation gate for short visits.
//!
//! Tracking for a tab only starts once it has stayed on the same domain for
//! the debounce threshold. Each armed confirmation is a deadline keyed by
//! tab: the driver sleeps until [`ConfirmationGate::next_deadline`] and then
//! collects the due entries with [`ConfirmationGate::take_due`]. Because the
//! map holds at most one entry per tab, re-arming a tab replaces (and thereby
//! cancels) its previous confirmation.

use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};

use crate::types::{Domain, TabId, TrackingKind};

/// Default minimum dwell time before a visit counts (5 seconds).
pub const DEFAULT_DEBOUNCE_MS: i64 = 5_000;

/// A confirmation waiting for its deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingConfirmation {
    pub tab_id: TabId,
    pub domain: Domain,
    pub url: String,
    pub kind: TrackingKind,
    pub armed_at: DateTime<Utc>,
    /// When the confirmation fires.
    pub deadline: DateTime<Utc>,
}

/// Per-tab debounce timers.
#[derive(Debug, Clone)]
pub struct ConfirmationGate {
    threshold: TimeDelta,
    pending: HashMap<TabId, PendingConfirmation>,
}

impl Default for ConfirmationGate {
    fn default() -> Self {
        Self::new(TimeDelta::milliseconds(DEFAULT_DEBOUNCE_MS))
    }
}

impl ConfirmationGate {
    #[must_use]
    pub fn new(threshold: TimeDelta) -> Self {
        Self {
            threshold: threshold.max(TimeDelta::zero()),
            pending: HashMap::new(),
        }
    }

    /// Arms a confirmation for `tab_id`, replacing any existing one.
    ///
    /// Returns the superseded confirmation, if there was one.
    pub fn arm(
        &mut self,
        tab_id: TabId,
        domain: Domain,
        url: String,
        kind: TrackingKind,
        now: DateTime<Utc>,
    ) -> Option<PendingConfirmation> {
        let confirmation = PendingConfirmation {
            tab_id,
            domain,
            url,
            kind,
            armed_at: now,
            deadline: now + self.threshold,
        };
        let superseded = self.pending.insert(tab_id, confirmation);
        if let Some(previous) = &superseded {
            tracing::debug!(
                tab = %tab_id,
                domain = %previous.domain,
                kind = %previous.kind,
                "superseded pending confirmation"
            );
        }
        superseded
    }

    /// Cancels the confirmation for `tab_id`. Safe to call when nothing is pending.
    pub fn cancel(&mut self, tab_id: TabId) -> Option<PendingConfirmation> {
        self.pending.remove(&tab_id)
    }

    /// Cancels the confirmation for `tab_id` only if it is of `kind`.
    pub fn cancel_kind(
        &mut self,
        tab_id: TabId,
        kind: TrackingKind,
    ) -> Option<PendingConfirmation> {
        if self.pending.get(&tab_id)?.kind == kind {
            return self.pending.remove(&tab_id);
        }
        None
    }

    /// Cancels every pending confirmation and returns how many were dropped.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }

    /// Updates the URL carried by a pending confirmation without re-arming it.
    pub fn update_url(&mut self, tab_id: TabId, url: &str) {
        if let Some(pending) = self.pending.get_mut(&tab_id) {
            url.clone_into(&mut pending.url);
        }
    }

    #[must_use]
    pub fn get(&self, tab_id: TabId) -> Option<&PendingConfirmation> {
        self.pending.get(&tab_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingConfirmation> {
        self.pending.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// The earliest deadline among pending confirmations.
    #[must_use]
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.pending.values().map(|pending| pending.deadline).min()
    }

    /// Removes and returns every confirmation whose deadline has passed,
    /// ordered by deadline.
    ///
    /// Entries are removed before the caller acts on them, so arming the
    /// same tab again while handling a confirmation is safe.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<PendingConfirmation> {
        let due_tabs: Vec<TabId> = self
            .pending
            .values()
            .filter(|pending| pending.deadline <= now)
            .map(|pending| pending.tab_id)
            .collect();
        let mut due: Vec<PendingConfirmation> = due_tabs
            .into_iter()
            .filter_map(|tab_id| self.pending.remove(&tab_id))
            .collect();
        due.sort_by_key(|pending| (pending.deadline, pending.tab_id));
        due
    }
}
