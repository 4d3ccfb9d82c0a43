use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::{
    AccessToken, AuthError, AuthState, AuthenticationManager, Credentials, IdentityProvider,
    RefreshToken, TokenGrant,
};
use crate::metrics::Metrics;

const NO_EXPIRY: i64 = i64::MIN;

struct Session {
    access_token: AccessToken,
    refresh_token: Option<RefreshToken>,
    credentials: Credentials,
    expires_at: DateTime<Utc>,
}

/// Token lifecycle over an `IdentityProvider`.
///
/// Every mutation happens under one async mutex. A caller that finds the
/// token expired refreshes while holding it, so callers queued behind it see
/// the fresh token on their re-check and no second refresh is issued. The
/// read-only queries use atomics mirrored from the session and never block.
pub struct TokenAuthManager<P> {
    provider: P,
    session: Mutex<Option<Session>>,
    authenticated: AtomicBool,
    expires_at_ms: AtomicI64,
    refresh_skew: Duration,
    call_timeout: Duration,
    metrics: Option<Arc<Metrics>>,
}

impl<P: IdentityProvider> TokenAuthManager<P> {
    pub fn new(provider: P, refresh_skew: Duration, call_timeout: Duration) -> Self {
        Self {
            provider,
            session: Mutex::new(None),
            authenticated: AtomicBool::new(false),
            expires_at_ms: AtomicI64::new(NO_EXPIRY),
            refresh_skew,
            call_timeout,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn expired_at(&self, expires_at: DateTime<Utc>) -> bool {
        let skew = chrono::Duration::from_std(self.refresh_skew).unwrap_or_else(|_| chrono::Duration::zero());
        Utc::now() + skew >= expires_at
    }

    fn install(&self, slot: &mut Option<Session>, grant: TokenGrant, credentials: Credentials) -> DateTime<Utc> {
        let ttl_ms = i64::try_from(grant.expires_in.as_millis()).unwrap_or(i64::MAX);
        let expires_at = chrono::Duration::try_milliseconds(ttl_ms)
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        *slot = Some(Session {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            credentials,
            expires_at,
        });
        self.expires_at_ms.store(expires_at.timestamp_millis(), Ordering::SeqCst);
        self.authenticated.store(true, Ordering::SeqCst);
        expires_at
    }

    fn clear(&self, slot: &mut Option<Session>) {
        *slot = None;
        self.authenticated.store(false, Ordering::SeqCst);
        self.expires_at_ms.store(NO_EXPIRY, Ordering::SeqCst);
    }

    async fn with_timeout<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, AuthError>>,
    ) -> Result<T, AuthError> {
        tokio::time::timeout(self.call_timeout, call)
            .await
            .map_err(|_| AuthError::Timeout { operation })?
    }

    /// Must be called with the session lock held
    async fn refresh_locked(&self, slot: &mut Option<Session>) -> Result<AccessToken, AuthError> {
        let Some(session) = slot.as_ref() else {
            return Err(AuthError::NotAuthenticated);
        };

        let credentials = session.credentials.clone();
        let result = match &session.refresh_token {
            Some(refresh_token) => self.with_timeout("refresh", self.provider.refresh(refresh_token)).await,
            None => self.with_timeout("authenticate", self.provider.authenticate(&credentials)).await,
        };

        match result {
            Ok(grant) => {
                let token = grant.access_token.clone();
                let expires_at = self.install(slot, grant, credentials);
                tracing::info!(expires_at = %expires_at, "Access token refreshed");
                self.record_refresh(true);
                Ok(token)
            }
            Err(e) => {
                self.clear(slot);
                tracing::warn!(error = %e, "Token refresh failed, session discarded");
                self.record_refresh(false);
                Err(AuthError::RefreshFailed(e.to_string()))
            }
        }
    }

    fn record_refresh(&self, success: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.record_token_refresh(success);
        }
    }
}

#[async_trait]
impl<P: IdentityProvider> AuthenticationManager for TokenAuthManager<P> {
    async fn login(&self, credentials: Credentials) -> Result<(), AuthError> {
        let mut slot = self.session.lock().await;

        match self.with_timeout("authenticate", self.provider.authenticate(&credentials)).await {
            Ok(grant) => {
                let username = credentials.username.clone();
                let expires_at = self.install(&mut slot, grant, credentials);
                tracing::info!(username = %username, expires_at = %expires_at, "Logged in");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(username = %credentials.username, error = %e, "Login failed");
                Err(e)
            }
        }
    }

    async fn get_access_token(&self) -> Result<AccessToken, AuthError> {
        if !self.authenticated.load(Ordering::SeqCst) {
            return Err(AuthError::NotAuthenticated);
        }

        let mut slot = self.session.lock().await;
        match slot.as_ref() {
            None => Err(AuthError::NotAuthenticated),
            // Re-check after acquiring: a caller ahead of us may have refreshed
            Some(session) if !self.expired_at(session.expires_at) => Ok(session.access_token.clone()),
            Some(_) => {
                tracing::debug!("Access token expired, refreshing");
                self.refresh_locked(&mut slot).await
            }
        }
    }

    async fn refresh_token(&self) -> bool {
        let mut slot = self.session.lock().await;
        self.refresh_locked(&mut slot).await.is_ok()
    }

    async fn refresh_if_current(&self, rejected: &AccessToken) -> Result<AccessToken, AuthError> {
        let mut slot = self.session.lock().await;
        match slot.as_ref() {
            None => Err(AuthError::NotAuthenticated),
            Some(session) if session.access_token != *rejected && !self.expired_at(session.expires_at) => {
                tracing::debug!("Rejected token already replaced, reusing the current one");
                Ok(session.access_token.clone())
            }
            Some(_) => self.refresh_locked(&mut slot).await,
        }
    }

    async fn logout(&self) {
        let mut slot = self.session.lock().await;
        let was_authenticated = slot.is_some();
        self.clear(&mut slot);
        if was_authenticated {
            tracing::info!("Logged out");
        }
    }

    fn is_authenticated(&self) -> bool {
        self.state() == AuthState::Authenticated
    }

    fn is_token_expired(&self) -> bool {
        match self.expiration_time() {
            Some(expires_at) => self.expired_at(expires_at),
            None => true,
        }
    }

    fn expiration_time(&self) -> Option<DateTime<Utc>> {
        if !self.authenticated.load(Ordering::SeqCst) {
            return None;
        }
        match self.expires_at_ms.load(Ordering::SeqCst) {
            NO_EXPIRY => None,
            millis => Utc.timestamp_millis_opt(millis).single(),
        }
    }

    fn state(&self) -> AuthState {
        if !self.authenticated.load(Ordering::SeqCst) {
            AuthState::Unauthenticated
        } else if self.is_token_expired() {
            AuthState::Expired
        } else {
            AuthState::Authenticated
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
