//! CLI subcommand implementations.

pub mod login;
pub mod logout;
pub mod stats;
pub mod status;

/// Formats seconds as `1h 02m 03s`, `4m 05s` or `6s`.
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3_600;
    let minutes = (seconds % 3_600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{hours}h {minutes:02}m {secs:02}s")
    } else if minutes > 0 {
        format!("{minutes}m {secs:02}s")
    } else {
        format!("{secs}s")
    }
}
