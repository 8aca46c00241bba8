//! Token lifecycle.
//!
//! [`TokenManager`] holds the one process-wide token record. Refreshes are
//! single-flight: callers that arrive while a refresh is running wait for it
//! and observe its outcome instead of issuing their own request.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use wt_core::Store;
use wt_core::store::{self, keys};

use crate::client::{ApiError, Collector, Credentials};

/// Default lead time before expiry at which tokens are refreshed.
pub const DEFAULT_REFRESH_BUFFER_SECS: i64 = 60;

/// Authentication errors.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// No tokens are held.
    #[error("not logged in")]
    Unauthenticated,
    /// The collector rejected the credentials or refresh token.
    #[error("credentials rejected by collector")]
    Rejected,
    /// The collector could not be reached or answered with an error.
    #[error("collector request failed: {0}")]
    Transport(#[source] Arc<ApiError>),
}

impl From<ApiError> for AuthError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized => Self::Rejected,
            other => Self::Transport(Arc::new(other)),
        }
    }
}

/// Access and refresh tokens.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for AuthTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthTokens")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Persisted authentication record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRecord {
    pub tokens: AuthTokens,
    pub user_email: String,
}

/// Authentication state broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStatus {
    Unauthenticated,
    Authenticated {
        user_email: String,
        expires_at: DateTime<Utc>,
    },
}

impl AuthStatus {
    fn of(record: Option<&AuthRecord>) -> Self {
        record.map_or(Self::Unauthenticated, |record| Self::Authenticated {
            user_email: record.user_email.clone(),
            expires_at: record.tokens.expires_at,
        })
    }

    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }
}

struct AuthState {
    record: Option<AuthRecord>,
    /// Bumped by every login, logout and completed refresh.
    generation: u64,
    /// Outcome of the change that produced `generation`.
    last_outcome: Result<(), AuthError>,
}

/// Owner of the token record.
pub struct TokenManager<C> {
    collector: Arc<C>,
    store: Arc<dyn Store>,
    refresh_buffer: TimeDelta,
    state: Mutex<AuthState>,
    refresh_gate: tokio::sync::Mutex<()>,
    status_tx: watch::Sender<AuthStatus>,
}

impl<C> fmt::Debug for TokenManager<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManager")
            .field("status", &*self.status_tx.borrow())
            .finish_non_exhaustive()
    }
}

impl<C: Collector> TokenManager<C> {
    /// Creates a manager, restoring any persisted record from `store`.
    pub fn new(collector: Arc<C>, store: Arc<dyn Store>, refresh_buffer: TimeDelta) -> Self {
        let record = match store::load::<AuthRecord, _>(store.as_ref(), keys::AUTH) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(error = %err, "failed to load auth record, starting logged out");
                None
            }
        };
        let (status_tx, _) = watch::channel(AuthStatus::of(record.as_ref()));
        Self {
            collector,
            store,
            refresh_buffer,
            state: Mutex::new(AuthState {
                record,
                generation: 0,
                last_outcome: Ok(()),
            }),
            refresh_gate: tokio::sync::Mutex::new(()),
            status_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, AuthState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribes to auth-changed notifications.
    pub fn subscribe(&self) -> watch::Receiver<AuthStatus> {
        self.status_tx.subscribe()
    }

    #[must_use]
    pub fn status(&self) -> AuthStatus {
        AuthStatus::of(self.lock().record.as_ref())
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.lock().record.is_some()
    }

    /// The access token, if one is held and not yet expired. Never refreshes.
    #[must_use]
    pub fn access_token(&self, now: DateTime<Utc>) -> Option<String> {
        self.lock()
            .record
            .as_ref()
            .filter(|record| record.tokens.expires_at > now)
            .map(|record| record.tokens.access_token.clone())
    }

    /// When the proactive refresh is due.
    #[must_use]
    pub fn refresh_deadline(&self) -> Option<DateTime<Utc>> {
        self.lock()
            .record
            .as_ref()
            .map(|record| record.tokens.expires_at - self.refresh_buffer)
    }

    /// Logs in and stores the resulting tokens.
    pub async fn login(
        &self,
        credentials: &Credentials,
        now: DateTime<Utc>,
    ) -> Result<AuthStatus, AuthError> {
        let response = self.collector.login(credentials).await?;
        let record = AuthRecord {
            tokens: AuthTokens {
                access_token: response.access_token,
                refresh_token: response.refresh_token,
                expires_at: now + TimeDelta::seconds(response.expires_in),
            },
            user_email: credentials.email.clone(),
        };
        {
            let mut state = self.lock();
            state.record = Some(record.clone());
            bump(&mut state, Ok(()));
        }
        self.persist(Some(&record));
        tracing::info!(
            user = %record.user_email,
            expires_at = %record.tokens.expires_at,
            "logged in"
        );
        Ok(self.notify())
    }

    /// Exchanges the refresh token for a new access token.
    ///
    /// Only one refresh runs at a time; concurrent callers get the outcome of
    /// the refresh that was running when they arrived. A rejected refresh
    /// token logs out.
    pub async fn refresh(&self, now: DateTime<Utc>) -> Result<(), AuthError> {
        let observed = self.lock().generation;
        let _gate = self.refresh_gate.lock().await;

        let refresh_token = {
            let state = self.lock();
            if state.generation != observed {
                return state.last_outcome.clone();
            }
            match &state.record {
                Some(record) => record.tokens.refresh_token.clone(),
                None => return Err(AuthError::Unauthenticated),
            }
        };

        match self.collector.refresh(&refresh_token).await {
            Ok(response) => {
                let record = {
                    let mut state = self.lock();
                    // Logged out or in again while the request was in flight.
                    let Some(record) = state
                        .record
                        .as_mut()
                        .filter(|record| record.tokens.refresh_token == refresh_token)
                    else {
                        return Err(AuthError::Unauthenticated);
                    };
                    record.tokens.access_token = response.access_token;
                    record.tokens.expires_at = now + TimeDelta::seconds(response.expires_in);
                    let record = record.clone();
                    bump(&mut state, Ok(()));
                    record
                };
                self.persist(Some(&record));
                tracing::info!(expires_at = %record.tokens.expires_at, "access token refreshed");
                self.notify();
                Ok(())
            }
            Err(err) => {
                let err = AuthError::from(err);
                tracing::warn!(error = %err, "token refresh failed");
                if matches!(err, AuthError::Rejected) {
                    self.clear_local(Err(err.clone()));
                } else {
                    bump(&mut self.lock(), Err(err.clone()));
                }
                Err(err)
            }
        }
    }

    /// Refresh triggered by the proactive timer. Any failure logs out.
    pub async fn refresh_scheduled(&self, now: DateTime<Utc>) -> Result<(), AuthError> {
        let result = self.refresh(now).await;
        if let Err(err) = &result {
            if self.is_authenticated() {
                tracing::warn!(error = %err, "scheduled refresh failed, logging out");
                self.logout().await;
            }
        }
        result
    }

    /// Clears tokens locally and revokes them on the collector, best effort.
    pub async fn logout(&self) {
        let Some(record) = self.clear_local(Err(AuthError::Unauthenticated)) else {
            return;
        };
        if let Err(err) = self.collector.logout(&record.tokens.refresh_token).await {
            tracing::warn!(error = %err, "logout request failed, tokens cleared locally");
        }
    }

    fn clear_local(&self, outcome: Result<(), AuthError>) -> Option<AuthRecord> {
        let record = {
            let mut state = self.lock();
            let record = state.record.take();
            bump(&mut state, outcome);
            record
        }?;
        self.persist(None);
        tracing::info!(user = %record.user_email, "logged out");
        self.notify();
        Some(record)
    }

    fn persist(&self, record: Option<&AuthRecord>) {
        let result = match record {
            Some(record) => store::save(self.store.as_ref(), keys::AUTH, record),
            None => self.store.remove(keys::AUTH),
        };
        if let Err(err) = result {
            tracing::warn!(error = %err, "failed to persist auth record");
        }
    }

    fn notify(&self) -> AuthStatus {
        let status = self.status();
        self.status_tx.send_replace(status.clone());
        status
    }
}

fn bump(state: &mut AuthState, outcome: Result<(), AuthError>) {
    state.generation += 1;
    state.last_outcome = outcome;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{HeartbeatPayload, LoginResponse, RefreshResponse};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wt_core::MemoryStore;

    #[derive(Default)]
    struct FakeCollector {
        refresh_calls: AtomicUsize,
        logout_calls: AtomicUsize,
        reject_refresh: bool,
        fail_refresh: bool,
    }

    impl Collector for FakeCollector {
        async fn login(&self, credentials: &Credentials) -> Result<LoginResponse, ApiError> {
            if credentials.password != "secret" {
                return Err(ApiError::Unauthorized);
            }
            Ok(LoginResponse {
                access_token: "access-1".to_string(),
                refresh_token: "refresh".to_string(),
                expires_in: 900,
            })
        }

        async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, ApiError> {
            let call = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::task::yield_now().await;
            assert_eq!(refresh_token, "refresh");
            if self.reject_refresh {
                return Err(ApiError::Unauthorized);
            }
            if self.fail_refresh {
                return Err(ApiError::Status {
                    status: 503,
                    body: "down".to_string(),
                });
            }
            Ok(RefreshResponse {
                access_token: format!("access-{}", call + 1),
                expires_in: 900,
            })
        }

        async fn logout(&self, _refresh_token: &str) -> Result<(), ApiError> {
            self.logout_calls.fetch_add(1, Ordering::SeqCst);
            Err(ApiError::Status {
                status: 500,
                body: String::new(),
            })
        }

        async fn send_heartbeat(
            &self,
            _access_token: &str,
            _payload: &HeartbeatPayload,
        ) -> Result<(), ApiError> {
            Ok(())
        }
    }

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn credentials(password: &str) -> Credentials {
        Credentials {
            email: "me@example.com".to_string(),
            password: password.to_string(),
        }
    }

    fn manager(collector: FakeCollector) -> (TokenManager<FakeCollector>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let manager = TokenManager::new(
            Arc::new(collector),
            store.clone(),
            TimeDelta::seconds(DEFAULT_REFRESH_BUFFER_SECS),
        );
        (manager, store)
    }

    #[tokio::test]
    async fn login_stores_and_persists_tokens() {
        let (manager, store) = manager(FakeCollector::default());
        let mut rx = manager.subscribe();
        let status = manager.login(&credentials("secret"), t(0)).await.unwrap();
        assert!(status.is_authenticated());
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().clone(), status);
        assert_eq!(manager.access_token(t(10)).as_deref(), Some("access-1"));
        assert_eq!(manager.refresh_deadline(), Some(t(840)));
        assert!(store.get(keys::AUTH).unwrap().is_some());
    }

    #[tokio::test]
    async fn rejected_login_leaves_state_untouched() {
        let (manager, store) = manager(FakeCollector::default());
        let err = manager.login(&credentials("wrong"), t(0)).await.unwrap_err();
        assert!(matches!(err, AuthError::Rejected));
        assert!(!manager.is_authenticated());
        assert!(store.get(keys::AUTH).unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_access_token_is_not_returned() {
        let (manager, _) = manager(FakeCollector::default());
        manager.login(&credentials("secret"), t(0)).await.unwrap();
        assert!(manager.access_token(t(900)).is_none());
        assert!(manager.is_authenticated());
    }

    #[tokio::test]
    async fn refresh_replaces_access_token_only() {
        let (manager, store) = manager(FakeCollector::default());
        manager.login(&credentials("secret"), t(0)).await.unwrap();
        manager.refresh(t(850)).await.unwrap();
        assert_eq!(manager.access_token(t(900)).as_deref(), Some("access-2"));
        let record: AuthRecord = store::load(store.as_ref(), keys::AUTH).unwrap().unwrap();
        assert_eq!(record.tokens.refresh_token, "refresh");
        assert_eq!(record.tokens.expires_at, t(1_750));
    }

    #[tokio::test]
    async fn concurrent_refreshes_share_one_request() {
        let (manager, _) = manager(FakeCollector::default());
        manager.login(&credentials("secret"), t(0)).await.unwrap();
        let (a, b, c) = tokio::join!(
            manager.refresh(t(850)),
            manager.refresh(t(850)),
            manager.refresh(t(850))
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(manager.collector.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_callers_observe_shared_failure() {
        let (manager, _) = manager(FakeCollector {
            fail_refresh: true,
            ..FakeCollector::default()
        });
        manager.login(&credentials("secret"), t(0)).await.unwrap();
        let (a, b) = tokio::join!(manager.refresh(t(850)), manager.refresh(t(850)));
        assert!(matches!(a, Err(AuthError::Transport(_))));
        assert!(matches!(b, Err(AuthError::Transport(_))));
        assert_eq!(manager.collector.refresh_calls.load(Ordering::SeqCst), 1);
        // A transient failure on demand keeps the tokens.
        assert!(manager.is_authenticated());
    }

    #[tokio::test]
    async fn rejected_refresh_logs_out() {
        let (manager, store) = manager(FakeCollector {
            reject_refresh: true,
            ..FakeCollector::default()
        });
        manager.login(&credentials("secret"), t(0)).await.unwrap();
        let err = manager.refresh(t(850)).await.unwrap_err();
        assert!(matches!(err, AuthError::Rejected));
        assert_eq!(manager.status(), AuthStatus::Unauthenticated);
        assert!(store.get(keys::AUTH).unwrap().is_none());
    }

    #[tokio::test]
    async fn scheduled_refresh_failure_logs_out() {
        let (manager, _) = manager(FakeCollector {
            fail_refresh: true,
            ..FakeCollector::default()
        });
        manager.login(&credentials("secret"), t(0)).await.unwrap();
        assert!(manager.refresh_scheduled(t(840)).await.is_err());
        assert!(!manager.is_authenticated());
        assert_eq!(manager.collector.logout_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn logout_is_best_effort_and_idempotent() {
        let (manager, store) = manager(FakeCollector::default());
        manager.login(&credentials("secret"), t(0)).await.unwrap();
        manager.logout().await;
        manager.logout().await;
        assert!(!manager.is_authenticated());
        assert!(manager.refresh_deadline().is_none());
        assert!(store.get(keys::AUTH).unwrap().is_none());
        assert_eq!(manager.collector.logout_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refresh_without_tokens_is_unauthenticated() {
        let (manager, _) = manager(FakeCollector::default());
        let err = manager.refresh(t(0)).await.unwrap_err();
        assert!(matches!(err, AuthError::Unauthenticated));
        assert_eq!(manager.collector.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn record_is_restored_from_store() {
        let store = Arc::new(MemoryStore::new());
        let record = AuthRecord {
            tokens: AuthTokens {
                access_token: "a".to_string(),
                refresh_token: "refresh".to_string(),
                expires_at: t(100),
            },
            user_email: "me@example.com".to_string(),
        };
        store::save(store.as_ref(), keys::AUTH, &record).unwrap();
        let manager = TokenManager::new(
            Arc::new(FakeCollector::default()),
            store,
            TimeDelta::seconds(60),
        );
        assert_eq!(manager.access_token(t(50)).as_deref(), Some("a"));
        assert_eq!(manager.refresh_deadline(), Some(t(40)));
    }

    #[test]
    fn tokens_debug_is_redacted() {
        let tokens = AuthTokens {
            access_token: "secret-access".to_string(),
            refresh_token: "secret-refresh".to_string(),
            expires_at: t(0),
        };
        let debug = format!("{tokens:?}");
        assert!(!debug.contains("secret-"));
    }
}
