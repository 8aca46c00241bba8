//! Core type definitions with validation.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for core types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The provided value was empty.
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    /// The value contained upper-case characters where a normalized form is required.
    #[error("{field} must be lower-case, got {value}")]
    NotNormalized { field: &'static str, value: String },
}

/// Generates a numeric host identifier newtype.
macro_rules! define_host_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_host_id!(
    /// A browser tab identifier as reported by the host event feed.
    TabId
);

define_host_id!(
    /// A browser window identifier as reported by the host event feed.
    WindowId
);

/// A normalized, trackable domain (`example.com`, never `www.example.com`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Domain(String);

impl Domain {
    /// Creates a domain after validation.
    ///
    /// The value must already be normalized; use
    /// [`extract_domain`](crate::domain::extract_domain) to derive one from a URL.
    pub fn new(domain: impl Into<String>) -> Result<Self, ValidationError> {
        let domain = domain.into();
        if domain.is_empty() {
            return Err(ValidationError::Empty { field: "domain" });
        }
        if domain.chars().any(char::is_uppercase) {
            return Err(ValidationError::NotNormalized {
                field: "domain",
                value: domain,
            });
        }
        Ok(Self(domain))
    }

    /// Returns the domain as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Domain {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Domain> for String {
    fn from(domain: Domain) -> Self {
        domain.0
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Domain {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Whether a tab counts as the focused tab or as a background tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingKind {
    /// The focused tab in the focused browser window.
    Active,
    /// A non-focused tab that is visible, audible, or playing video.
    Background,
}

impl TrackingKind {
    /// String representation used in logs and status output.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Background => "background",
        }
    }

    #[must_use]
    pub const fn is_background(self) -> bool {
        matches!(self, Self::Background)
    }
}

impl fmt::Display for TrackingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A tab whose tracking has been confirmed past the debounce threshold.
///
/// Records only exist while tracking; removing the record ends the episode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabRecord {
    pub tab_id: TabId,
    pub domain: Domain,
    pub url: String,
    pub kind: TrackingKind,
    /// When tracking was confirmed.
    pub start_time: DateTime<Utc>,
    /// Time up to which whole seconds have been handed to the aggregator.
    pub attributed_until: DateTime<Utc>,
}

impl TabRecord {
    /// Creates a record that starts attributing time at `start_time`.
    #[must_use]
    pub const fn new(
        tab_id: TabId,
        domain: Domain,
        url: String,
        kind: TrackingKind,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            tab_id,
            domain,
            url,
            kind,
            start_time,
            attributed_until: start_time,
        }
    }
}

/// User-controlled tracking policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Domains (and their subdomains) that are never tracked.
    pub blocklist: Vec<String>,
    /// Domains (and their subdomains) whose individual URLs are recorded.
    pub track_full_url_domains: Vec<String>,
}
