//! Access credentials for the transport
//!
//! A fresh token is requested for every send; nothing here caches.

use std::fmt;

use async_trait::async_trait;
use serde::Deserialize;

use crate::TransportError;

/// A short-lived bearer token
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken([REDACTED])")
    }
}

#[async_trait]
pub trait CredentialSource: Send + Sync + fmt::Debug {
    /// Obtain a new access token.
    ///
    /// # Errors
    /// [`TransportError::TokenRefresh`] when the provider refuses or is unreachable
    async fn access_token(&self) -> Result<AccessToken, TransportError>;
}

/// OAuth refresh-token grant settings
///
/// Secret fields accept `env:NAME` to read the value from the environment.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    /// Optional scope sent with the refresh request
    #[serde(default)]
    pub scope: Option<String>,
}

/// Resolve `env:NAME` references, leaving other values untouched
pub fn resolve_secret(value: &str) -> Result<String, TransportError> {
    value.strip_prefix("env:").map_or_else(
        || Ok(value.to_string()),
        |name| {
            std::env::var(name).map_err(|_| {
                TransportError::NotConfigured(format!("environment variable {name} is not set"))
            })
        },
    )
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Exchanges a long-lived refresh token for an access token on every call
#[derive(Debug, Clone)]
pub struct OAuthRefresher {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    refresh_token: String,
    scope: Option<String>,
}

impl OAuthRefresher {
    /// Build a refresher, resolving any `env:` secrets.
    pub fn new(config: &OAuthConfig) -> Result<Self, TransportError> {
        if config.token_url.trim().is_empty() {
            return Err(TransportError::NotConfigured(String::from(
                "OAuth token url is empty",
            )));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            token_url: config.token_url.clone(),
            client_id: resolve_secret(&config.client_id)?,
            client_secret: resolve_secret(&config.client_secret)?,
            refresh_token: resolve_secret(&config.refresh_token)?,
            scope: config.scope.clone(),
        })
    }
}

#[async_trait]
impl CredentialSource for OAuthRefresher {
    async fn access_token(&self) -> Result<AccessToken, TransportError> {
        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", self.refresh_token.as_str()),
        ];
        if let Some(scope) = &self.scope {
            form.push(("scope", scope.as_str()));
        }

        let response = self
            .client
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| TransportError::TokenRefresh(e.to_string()))?
            .error_for_status()
            .map_err(|e| TransportError::TokenRefresh(e.to_string()))?;

        let token = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| TransportError::TokenRefresh(format!("invalid token response: {e}")))?;

        if token.access_token.is_empty() {
            return Err(TransportError::TokenRefresh(String::from(
                "token response carried an empty access token",
            )));
        }

        tracing::trace!("Refreshed transport access token");

        Ok(AccessToken(token.access_token))
    }
}

/// A fixed token, for relays that accept a static credential
#[derive(Debug, Clone)]
pub struct StaticCredential(AccessToken);

impl StaticCredential {
    #[must_use]
    pub const fn new(token: AccessToken) -> Self {
        Self(token)
    }
}

#[async_trait]
impl CredentialSource for StaticCredential {
    async fn access_token(&self) -> Result<AccessToken, TransportError> {
        Ok(self.0.clone())
    }
}
