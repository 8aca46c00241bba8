//! Stats command for showing one day's browsing time.
//!
//! Reads the `daily_stats:<date>` record written as windows are delivered
//! and renders it as a ranked table or as JSON.

use std::fmt::Write as _;
use std::io::Write;

use anyhow::Result;
use chrono::NaiveDate;
use wt_core::store::{self, keys};
use wt_core::{DailyStats, Store};

use super::format_duration;
use crate::{Config, open_store};

/// Loads the statistics record for `date`, if any.
pub fn load<S: Store + ?Sized>(store: &S, date: NaiveDate) -> Result<Option<DailyStats>> {
    Ok(store::load(store, &keys::daily_stats(date))?)
}

/// Renders a day's statistics for the terminal.
pub fn format_stats(stats: &DailyStats) -> String {
    let mut output = String::new();
    writeln!(output, "ACTIVITY: {}", stats.date.format("%A, %B %-d, %Y")).unwrap();
    writeln!(output).unwrap();
    writeln!(output, "Active:     {}", format_duration(stats.total_active_time)).unwrap();
    writeln!(output, "Background: {}", format_duration(stats.total_background_time)).unwrap();

    let ranked = stats.ranked_domains();
    if ranked.is_empty() {
        return output;
    }

    writeln!(output).unwrap();
    writeln!(output, "BY DOMAIN").unwrap();
    writeln!(output, "─────────").unwrap();
    let width = ranked
        .iter()
        .map(|(domain, _)| domain.as_str().len())
        .max()
        .unwrap_or(0);
    for (domain, stat) in ranked {
        writeln!(
            output,
            "  {:<width$}  {:>11} active  {:>11} background",
            domain.as_str(),
            format_duration(stat.active_seconds),
            format_duration(stat.background_seconds),
        )
        .unwrap();
        if let Some(url) = stat.top_url() {
            writeln!(output, "  {:<width$}  top: {url}", "").unwrap();
        }
    }
    output
}

pub fn run<W: Write>(writer: &mut W, config: &Config, date: NaiveDate, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let stats = load(&store, date)?;
    write_stats(writer, date, stats.as_ref(), json)
}

fn write_stats<W: Write>(
    writer: &mut W,
    date: NaiveDate,
    stats: Option<&DailyStats>,
    json: bool,
) -> Result<()> {
    match (stats, json) {
        (Some(stats), true) => writeln!(writer, "{}", serde_json::to_string_pretty(stats)?)?,
        (None, true) => writeln!(writer, "null")?,
        (Some(stats), false) => write!(writer, "{}", format_stats(stats))?,
        (None, false) => writeln!(writer, "No activity recorded for {date}.")?,
    }
    Ok(())
}
