//! Login and renewal endpoints.
//!
//! These calls go out without an access credential and outside the
//! [`HttpGateway`](crate::gateway::HttpGateway), so a failed renewal never
//! trips the gateway's logout hook.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::gateway::join_url;

pub const LOGIN_PATH: &str = "/api/auth/login";
pub const REFRESH_PATH: &str = "/api/auth/refresh";

#[derive(Debug, thiserror::Error)]
pub enum AuthClientError {
    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{operation} rejected ({status}): {detail}")]
    Rejected {
        operation: &'static str,
        status: u16,
        detail: String,
    },
}

/// Tokens issued by the login or renewal endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenGrant {
    pub token: String,
    #[serde(default, rename = "refreshToken", alias = "refresh_token")]
    pub refresh_token: Option<String>,
}

/// Exchanges a renewal credential for a fresh access credential.
#[async_trait]
pub trait TokenRenewer: Send + Sync {
    async fn renew(&self, refresh_token: &str) -> Result<TokenGrant, AuthClientError>;
}

/// Unauthenticated client for `/api/auth/*`.
pub struct AuthClient {
    base_url: String,
    http: reqwest::Client,
}

impl AuthClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, AuthClientError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into(),
            http,
        })
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    /// `POST /api/auth/login` with email + password.
    pub async fn login(&self, email: &str, password: &str) -> Result<TokenGrant, AuthClientError> {
        let response = self
            .http
            .post(join_url(&self.base_url, LOGIN_PATH))
            .json(&serde_json::json!({
                "email": email,
                "password": password,
            }))
            .send()
            .await?;

        let response = Self::ensure_success(response, "login").await?;
        Ok(response.json::<TokenGrant>().await?)
    }

    /// `POST /api/auth/refresh` with the renewal credential.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AuthClientError> {
        let response = self
            .http
            .post(join_url(&self.base_url, REFRESH_PATH))
            .json(&serde_json::json!({ "refreshToken": refresh_token }))
            .send()
            .await?;

        let response = Self::ensure_success(response, "token refresh").await?;
        Ok(response.json::<TokenGrant>().await?)
    }

    /// Returns the response on 2xx, otherwise an error carrying the body.
    async fn ensure_success(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<reqwest::Response, AuthClientError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let detail = response.text().await.unwrap_or_default();
        Err(AuthClientError::Rejected {
            operation,
            status,
            detail,
        })
    }
}

#[async_trait]
impl TokenRenewer for AuthClient {
    async fn renew(&self, refresh_token: &str) -> Result<TokenGrant, AuthClientError> {
        self.refresh(refresh_token).await
    }
}
