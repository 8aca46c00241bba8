//! HTTP client for the activity collector.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use wt_core::ActivityWindow;

/// Default request timeout for collector calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Collector client errors.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Failed to build HTTP client.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    /// HTTP request failed before a response arrived.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The collector rejected the credentials or token (HTTP 401).
    #[error("unauthorized")]
    Unauthorized,
    /// Any other non-success response.
    #[error("collector returned {status}: {body}")]
    Status { status: u16, body: String },
    /// Failed to parse response.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// Whether retrying later can succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Request(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::ClientBuild(_) | Self::Unauthorized | Self::InvalidResponse(_) => false,
        }
    }
}

/// Login credentials.
#[derive(Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Successful login response.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
}

impl fmt::Debug for LoginResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginResponse")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Successful refresh response. The refresh token itself is not rotated.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
    pub expires_in: i64,
}

impl fmt::Debug for RefreshResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshResponse")
            .field("access_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Body of a heartbeat delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatPayload {
    pub heartbeat_at: DateTime<Utc>,
    pub is_idle: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<ActivityWindow>,
}

/// Operations the engine needs from the collector.
pub trait Collector: Send + Sync {
    fn login(
        &self,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<LoginResponse, ApiError>> + Send;

    fn refresh(
        &self,
        refresh_token: &str,
    ) -> impl Future<Output = Result<RefreshResponse, ApiError>> + Send;

    /// Revokes the refresh token. Callers treat failures as best effort.
    fn logout(&self, refresh_token: &str) -> impl Future<Output = Result<(), ApiError>> + Send;

    fn send_heartbeat(
        &self,
        access_token: &str,
        payload: &HeartbeatPayload,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;
}

/// `reqwest`-backed [`Collector`].
///
/// # Thread Safety
///
/// The client is safe to clone and share across tasks. Each clone shares
/// the underlying HTTP connection pool.
#[derive(Clone)]
pub struct CollectorClient {
    http: reqwest::Client,
    base_url: String,
}

impl fmt::Debug for CollectorClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectorClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl CollectorClient {
    /// Creates a client for the collector at `base_url`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("wt/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ApiError::ClientBuild)?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { http, base_url })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

impl Collector for CollectorClient {
    async fn login(&self, credentials: &Credentials) -> Result<LoginResponse, ApiError> {
        let response = self
            .http
            .post(self.endpoint("/auth/login"))
            .json(credentials)
            .send()
            .await?;
        parse_json(response).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, ApiError> {
        let response = self
            .http
            .post(self.endpoint("/auth/refresh"))
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;
        parse_json(response).await
    }

    async fn logout(&self, refresh_token: &str) -> Result<(), ApiError> {
        let response = self
            .http
            .post(self.endpoint("/auth/logout"))
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;
        check_status(response).await.map(|_| ())
    }

    async fn send_heartbeat(
        &self,
        access_token: &str,
        payload: &HeartbeatPayload,
    ) -> Result<(), ApiError> {
        let response = self
            .http
            .post(self.endpoint("/heartbeat"))
            .bearer_auth(access_token)
            .json(payload)
            .send()
            .await?;
        check_status(response).await.map(|_| ())
    }
}

/// Maps non-success responses to errors and returns the body otherwise.
async fn check_status(response: reqwest::Response) -> Result<String, ApiError> {
    let status = response.status();
    let body = response.text().await?;
    if status == StatusCode::UNAUTHORIZED {
        return Err(ApiError::Unauthorized);
    }
    if !status.is_success() {
        return Err(ApiError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(body)
}

async fn parse_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ApiError> {
    let body = check_status(response).await?;
    serde_json::from_str(&body).map_err(|err| ApiError::InvalidResponse(err.to_string()))
}
