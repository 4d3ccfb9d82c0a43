use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{AccessToken, AuthError, Credentials, RefreshToken, TokenGrant};

/// The remote side that issues tokens
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn authenticate(&self, credentials: &Credentials) -> Result<TokenGrant, AuthError>;

    async fn refresh(&self, refresh_token: &RefreshToken) -> Result<TokenGrant, AuthError>;
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    /// Seconds
    expires_in: u64,
}

impl From<TokenResponse> for TokenGrant {
    fn from(response: TokenResponse) -> Self {
        TokenGrant {
            access_token: AccessToken::new(response.access_token),
            refresh_token: response.refresh_token.map(RefreshToken::new),
            expires_in: Duration::from_secs(response.expires_in),
        }
    }
}

/// Identity provider over JSON/HTTP:
/// `POST {base}/auth/token` and `POST {base}/auth/refresh`
#[derive(Debug, Clone)]
pub struct HttpIdentityProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpIdentityProvider {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Provider(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn post_for_grant<B: Serialize + Sync>(
        &self,
        operation: &'static str,
        path: &str,
        body: &B,
        rejected: AuthError,
    ) -> Result<TokenGrant, AuthError> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(operation, e))?;

        match response.status() {
            status if status.is_success() => response
                .json::<TokenResponse>()
                .await
                .map(TokenGrant::from)
                .map_err(|e| AuthError::Provider(format!("{operation}: unreadable token response: {e}"))),
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(rejected),
            status => Err(AuthError::Provider(format!("{operation}: identity provider returned {status}"))),
        }
    }
}

fn transport_error(operation: &'static str, error: reqwest::Error) -> AuthError {
    if error.is_timeout() {
        AuthError::Timeout { operation }
    } else {
        AuthError::Provider(format!("{operation}: {}", error.without_url()))
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn authenticate(&self, credentials: &Credentials) -> Result<TokenGrant, AuthError> {
        let body = LoginRequest {
            username: &credentials.username,
            password: credentials.password(),
        };
        self.post_for_grant("authenticate", "/auth/token", &body, AuthError::InvalidCredentials)
            .await
    }

    async fn refresh(&self, refresh_token: &RefreshToken) -> Result<TokenGrant, AuthError> {
        let body = RefreshRequest {
            refresh_token: refresh_token.expose(),
        };
        let rejected = AuthError::RefreshFailed("refresh token rejected".to_string());
        self.post_for_grant("refresh", "/auth/refresh", &body, rejected).await
    }
}
