use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

use crate::errors::ErrorKind;

mod manager;
mod provider;

pub use manager::TokenAuthManager;
pub use provider::{HttpIdentityProvider, IdentityProvider};

// ============================================================================
// Authentication Manager Contract
// ============================================================================
//
// Owns the bearer token used for outbound calls.
//
//   Unauthenticated --login--> Authenticated --clock--> Expired
//         ^                        |   ^                   |
//         |                        |   +----refresh ok-----+
//         +--logout / refresh failure--+-------------------+
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticated,
    Expired,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("Identity provider call {operation} timed out")]
    Timeout { operation: &'static str },

    #[error("Identity provider error: {0}")]
    Provider(String),
}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::Timeout { .. } => ErrorKind::Timeout,
            AuthError::Provider(_) => ErrorKind::RemoteFailure,
            _ => ErrorKind::AuthenticationFailure,
        }
    }
}

/// Bearer token. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw value, for the Authorization header only
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

impl fmt::Display for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct RefreshToken(String);

impl RefreshToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RefreshToken(***)")
    }
}

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// What the identity provider hands back on login or refresh
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: AccessToken,
    pub refresh_token: Option<RefreshToken>,
    pub expires_in: Duration,
}

#[async_trait]
pub trait AuthenticationManager: Send + Sync {
    /// On failure any previous session is left as it was
    async fn login(&self, credentials: Credentials) -> Result<(), AuthError>;

    /// Valid token, refreshing first when the current one has expired
    async fn get_access_token(&self) -> Result<AccessToken, AuthError>;

    /// Force a refresh. `false` means the session is gone.
    async fn refresh_token(&self) -> bool;

    /// Refresh because the remote rejected `rejected`. When another caller
    /// has already replaced that token, the installed one is returned and no
    /// refresh is issued.
    async fn refresh_if_current(&self, rejected: &AccessToken) -> Result<AccessToken, AuthError>;

    async fn logout(&self);

    fn is_authenticated(&self) -> bool;

    fn is_token_expired(&self) -> bool;

    fn expiration_time(&self) -> Option<DateTime<Utc>>;

    fn state(&self) -> AuthState;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secrets_are_redacted() {
        let token = AccessToken::new("super-secret");
        let creds = Credentials::new("svc", "hunter2");
        let grant = TokenGrant {
            access_token: token.clone(),
            refresh_token: Some(RefreshToken::new("also-secret")),
            expires_in: Duration::from_secs(60),
        };

        assert_eq!(format!("{token}"), "***");
        assert!(!format!("{token:?}").contains("super-secret"));
        assert!(!format!("{creds:?}").contains("hunter2"));
        assert!(!format!("{grant:?}").contains("secret"));
        assert_eq!(token.expose(), "super-secret");
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(AuthError::InvalidCredentials.kind(), ErrorKind::AuthenticationFailure);
        assert_eq!(AuthError::Timeout { operation: "login" }.kind(), ErrorKind::Timeout);
        assert_eq!(AuthError::Provider("503".into()).kind(), ErrorKind::RemoteFailure);
    }
}
