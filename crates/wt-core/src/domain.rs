//! Domain classification.
//!
//! Maps page URLs onto trackable domains and applies the user's block and
//! full-URL policies. Everything here is pure: malformed input resolves to
//! "not trackable" rather than an error.

use url::Url;

use crate::types::{Domain, Settings};

/// URL prefixes that belong to the browser or to extensions rather than to a site.
const INTERNAL_PREFIXES: &[&str] = &[
    "about:",
    "blob:",
    "brave://",
    "chrome://",
    "chrome-extension://",
    "chrome-search://",
    "data:",
    "devtools://",
    "edge://",
    "file:",
    "javascript:",
    "moz-extension://",
    "opera://",
    "safari-extension://",
    "view-source:",
    "vivaldi://",
];

/// Maximum length of a recorded URL; longer URLs are truncated on a char boundary.
const MAX_RECORDED_URL_LEN: usize = 2048;

/// Extracts the normalized domain of `url`.
///
/// The host is lower-cased and a leading `www.` is removed. URLs that fail to
/// parse or carry no host yield `None`.
pub fn extract_domain(url: &str) -> Option<Domain> {
    let parsed = Url::parse(url.trim()).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    let host = host.trim_end_matches('.');
    Domain::new(host).ok()
}

/// Returns `false` for browser-internal, extension, and local-resource URLs.
pub fn is_trackable_url(url: &str) -> bool {
    let url = url.trim();
    if url.is_empty() {
        return false;
    }
    let lowered = url.to_ascii_lowercase();
    !INTERNAL_PREFIXES
        .iter()
        .any(|prefix| lowered.starts_with(prefix))
}

/// Exact-or-subdomain match: `domain` matches `entry` iff they are equal or
/// `domain` ends with `"." + entry`.
pub fn matches_domain(domain: &str, entry: &str) -> bool {
    let entry = entry.trim().trim_start_matches("www.").to_lowercase();
    if entry.is_empty() {
        return false;
    }
    domain == entry
        || domain
            .strip_suffix(entry.as_str())
            .is_some_and(|prefix| prefix.ends_with('.'))
}

/// Whether `domain` is covered by any blocklist entry.
pub fn is_blocked(domain: &str, blocklist: &[String]) -> bool {
    blocklist.iter().any(|entry| matches_domain(domain, entry))
}

/// Whether per-URL seconds should be recorded for `domain`.
pub fn should_track_full_url(domain: &str, allowlist: &[String]) -> bool {
    allowlist.iter().any(|entry| matches_domain(domain, entry))
}

/// Classifies `url` under `settings`.
///
/// Returns the domain to attribute time to, or `None` when the URL is
/// internal, malformed, or blocked.
pub fn classify(url: &str, settings: &Settings) -> Option<Domain> {
    if !is_trackable_url(url) {
        return None;
    }
    let domain = extract_domain(url)?;
    if is_blocked(domain.as_str(), &settings.blocklist) {
        return None;
    }
    Some(domain)
}

/// Normalizes a URL for per-URL accounting.
///
/// Query strings and fragments are dropped so that tokens and session
/// parameters never reach the collector.
pub fn normalize_visit_url(url: &str) -> Option<String> {
    let mut parsed = Url::parse(url.trim()).ok()?;
    parsed.set_query(None);
    parsed.set_fragment(None);
    let mut rendered = String::from(parsed);
    if rendered.len() > MAX_RECORDED_URL_LEN {
        let mut cut = MAX_RECORDED_URL_LEN;
        while !rendered.is_char_boundary(cut) {
            cut -= 1;
        }
        rendered.truncate(cut);
    }
    Some(rendered)
}
