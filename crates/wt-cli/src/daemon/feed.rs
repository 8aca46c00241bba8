//! Host event feed: newline-delimited JSON [`HostEvent`]s.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use wt_core::HostEvent;

use super::commands::DaemonError;
use super::handle::TrackerHandle;

/// Forwards events from `reader` until EOF. Returns the number forwarded.
///
/// Malformed lines are logged and skipped; blank lines are ignored.
pub async fn pump<R>(reader: R, handle: &TrackerHandle) -> Result<usize, DaemonError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut forwarded = 0;
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(error = %err, "event feed read failed");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<HostEvent>(line) {
            Ok(event) => {
                handle.send_event(event).await?;
                forwarded += 1;
            }
            Err(err) => tracing::warn!(error = %err, "skipping malformed host event"),
        }
    }
    Ok(forwarded)
}
