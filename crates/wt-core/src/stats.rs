//! Durable daily statistics.
//!
//! Delivered final windows are folded into one record per local calendar day.

use std::collections::BTreeMap;

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Domain;
use crate::window::ActivityWindow;

/// Totals for one domain over a day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DomainStat {
    pub active_seconds: u64,
    pub background_seconds: u64,
    /// Seconds per URL, for domains with full-URL tracking.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub url_seconds: BTreeMap<String, u64>,
}

impl DomainStat {
    /// The most visited URL of the day.
    #[must_use]
    pub fn top_url(&self) -> Option<&str> {
        self.url_seconds
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(url, _)| url.as_str())
    }
}

/// Statistics for one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyStats {
    pub date: NaiveDate,
    pub total_active_time: u64,
    pub total_background_time: u64,
    #[serde(default)]
    pub domain_stats: BTreeMap<Domain, DomainStat>,
}

impl DailyStats {
    #[must_use]
    pub const fn new(date: NaiveDate) -> Self {
        Self {
            date,
            total_active_time: 0,
            total_background_time: 0,
            domain_stats: BTreeMap::new(),
        }
    }

    /// Adds a window's totals.
    pub fn fold_window(&mut self, window: &ActivityWindow) {
        for (domain, bucket) in &window.domains {
            let stat = self.domain_stats.entry(domain.clone()).or_default();
            stat.active_seconds += bucket.active_seconds;
            stat.background_seconds += bucket.background_seconds;
            for (url, seconds) in &bucket.url_visit_seconds {
                *stat.url_seconds.entry(url.clone()).or_default() += seconds;
            }
            self.total_active_time += bucket.active_seconds;
            self.total_background_time += bucket.background_seconds;
        }
    }

    /// Domains ordered by total time, most first.
    #[must_use]
    pub fn ranked_domains(&self) -> Vec<(&Domain, &DomainStat)> {
        let mut ranked: Vec<_> = self.domain_stats.iter().collect();
        ranked.sort_by(|a, b| {
            (b.1.active_seconds + b.1.background_seconds)
                .cmp(&(a.1.active_seconds + a.1.background_seconds))
                .then_with(|| a.0.cmp(b.0))
        });
        ranked
    }
}

/// The local calendar day a window belongs to.
pub fn stats_date_for(window_start: DateTime<Utc>) -> NaiveDate {
    window_start.with_timezone(&Local).date_naive()
}
