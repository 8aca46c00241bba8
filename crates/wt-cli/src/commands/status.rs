//! Status command: login state, pause state and undelivered activity.

use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use wt_api::AuthRecord;
use wt_core::store::{self, keys};
use wt_core::{ActivityBuffer, Store, TrackerState};

use super::format_duration;
use crate::{Config, open_store};

/// Everything `wt status` reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub logged_in: bool,
    pub user_email: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub is_paused: bool,
    pub session_start_time: Option<DateTime<Utc>>,
    pub pending_windows: usize,
    pub undelivered_active_seconds: u64,
    pub undelivered_background_seconds: u64,
    pub delivered_through: Option<DateTime<Utc>>,
}

impl StatusReport {
    /// Reads the report from persisted state.
    pub fn collect<S: Store + ?Sized>(store: &S) -> Self {
        let auth = match store::load::<AuthRecord, _>(store, keys::AUTH) {
            Ok(auth) => auth,
            Err(err) => {
                tracing::warn!(error = %err, "unreadable auth record");
                None
            }
        };
        let state: TrackerState = store::load_or_default(store, keys::TRACKER_STATE);
        let buffer: ActivityBuffer = store::load_or_default(store, keys::ACTIVITY_BUFFER);

        let buckets = buffer.windows.iter().flat_map(|w| w.domains.values());
        let (active, background) = buckets.fold((0, 0), |(a, b), bucket| {
            (a + bucket.active_seconds, b + bucket.background_seconds)
        });

        Self {
            logged_in: auth.is_some(),
            token_expires_at: auth.as_ref().map(|a| a.tokens.expires_at),
            user_email: auth.map(|a| a.user_email),
            is_paused: state.is_paused,
            session_start_time: state.session_start_time,
            pending_windows: buffer.windows.len(),
            undelivered_active_seconds: active,
            undelivered_background_seconds: background,
            delivered_through: buffer.delivered_through,
        }
    }
}

pub fn run<W: Write>(writer: &mut W, config: &Config, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let report = StatusReport::collect(&store);
    if json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&report)?)?;
        return Ok(());
    }
    render(writer, &report)?;
    writeln!(writer, "Database: {}", config.database_path.display())?;
    Ok(())
}

fn render<W: Write>(writer: &mut W, report: &StatusReport) -> Result<()> {
    writeln!(writer, "Web time tracker status")?;
    match (&report.user_email, report.token_expires_at) {
        (Some(email), Some(expires_at)) => writeln!(
            writer,
            "Account: {email} (token expires {})",
            timestamp(expires_at)
        )?,
        _ => writeln!(writer, "Account: not logged in")?,
    }
    writeln!(
        writer,
        "Tracking: {}",
        if report.is_paused { "paused" } else { "active" }
    )?;
    if let Some(start) = report.session_start_time {
        writeln!(writer, "Session started: {}", timestamp(start))?;
    }
    if report.pending_windows == 0 {
        writeln!(writer, "Undelivered windows: none")?;
    } else {
        writeln!(
            writer,
            "Undelivered windows: {} ({} active, {} background)",
            report.pending_windows,
            format_duration(report.undelivered_active_seconds),
            format_duration(report.undelivered_background_seconds)
        )?;
    }
    if let Some(through) = report.delivered_through {
        writeln!(writer, "Last delivered window: {}", timestamp(through))?;
    }
    Ok(())
}

fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeMap;

    use insta::assert_snapshot;
    use wt_api::AuthTokens;
    use wt_core::window::StoredWindow;
    use wt_core::{Domain, DomainBucket, MemoryStore};

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_100 + secs, 0).unwrap()
    }

    fn bucket(active: u64, background: u64) -> DomainBucket {
        DomainBucket {
            active_seconds: active,
            background_seconds: background,
            url_visit_seconds: BTreeMap::new(),
        }
    }

    #[test]
    fn status_for_fresh_install() {
        let store = MemoryStore::new();
        let report = StatusReport::collect(&store);
        let mut output = Vec::new();
        render(&mut output, &report).unwrap();
        assert_snapshot!(String::from_utf8(output).unwrap(), @r"
        Web time tracker status
        Account: not logged in
        Tracking: active
        Undelivered windows: none
        ");
    }

    #[test]
    fn status_reports_login_pause_and_backlog() {
        let store = MemoryStore::new();
        store::save(
            &store,
            keys::AUTH,
            &AuthRecord {
                tokens: AuthTokens {
                    access_token: "a".to_string(),
                    refresh_token: "r".to_string(),
                    expires_at: ts(900),
                },
                user_email: "me@example.com".to_string(),
            },
        )
        .unwrap();
        store::save(
            &store,
            keys::TRACKER_STATE,
            &TrackerState {
                is_paused: true,
                session_start_time: Some(ts(0)),
            },
        )
        .unwrap();
        let mut first = BTreeMap::new();
        first.insert(Domain::new("a.com").unwrap(), bucket(200, 0));
        first.insert(Domain::new("b.com").unwrap(), bucket(10, 40));
        let mut second = BTreeMap::new();
        second.insert(Domain::new("a.com").unwrap(), bucket(90, 0));
        store::save(
            &store,
            keys::ACTIVITY_BUFFER,
            &ActivityBuffer {
                windows: vec![
                    StoredWindow {
                        window_start: ts(300),
                        domains: first,
                    },
                    StoredWindow {
                        window_start: ts(600),
                        domains: second,
                    },
                ],
                delivered_through: Some(ts(0)),
            },
        )
        .unwrap();

        let report = StatusReport::collect(&store);
        assert!(report.logged_in);
        assert_eq!(report.undelivered_active_seconds, 300);

        let mut output = Vec::new();
        render(&mut output, &report).unwrap();
        assert_snapshot!(String::from_utf8(output).unwrap(), @r"
        Web time tracker status
        Account: me@example.com (token expires 2023-11-14T22:30:00Z)
        Tracking: paused
        Session started: 2023-11-14T22:15:00Z
        Undelivered windows: 2 (5m 00s active, 40s background)
        Last delivered window: 2023-11-14T22:15:00Z
        ");
    }

    #[test]
    fn status_json_field_names() {
        let report = StatusReport::collect(&MemoryStore::new());
        let json = serde_json::to_string(&report).unwrap();
        assert_snapshot!(json, @r#"{"loggedIn":false,"userEmail":null,"tokenExpiresAt":null,"isPaused":false,"sessionStartTime":null,"pendingWindows":0,"undeliveredActiveSeconds":0,"undeliveredBackgroundSeconds":0,"deliveredThrough":null}"#);
    }
}
