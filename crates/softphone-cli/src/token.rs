//! Token source
//!
//! Fetches access tokens for the calling service from an HTTP endpoint and
//! asks a companion endpoint to place a test call to this softphone.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use softphone_core::Credential;
use thiserror::Error;
use tracing::{debug, info};

/// Token source errors
#[derive(Error, Debug)]
pub enum TokenError {
    #[error("HTTP request failed: {reason}")]
    Http { reason: String },

    #[error("Token service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Could not decode token response: {reason}")]
    Decode { reason: String },

    #[error("No {what} URL configured")]
    NotConfigured { what: &'static str },
}

impl From<reqwest::Error> for TokenError {
    fn from(err: reqwest::Error) -> Self {
        TokenError::Http {
            reason: err.to_string(),
        }
    }
}

/// Token as issued by the token service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    pub token: String,
    pub user_id: String,
    #[serde(default)]
    pub expires_on: Option<DateTime<Utc>>,
}

impl IssuedToken {
    pub fn into_credential(self) -> Credential {
        let credential = Credential::new(self.token).with_user_id(self.user_id);
        match self.expires_on {
            Some(expiry) => credential.with_expiry(expiry),
            None => credential,
        }
    }
}

impl From<IssuedToken> for Credential {
    fn from(token: IssuedToken) -> Self {
        token.into_credential()
    }
}

/// Where access tokens come from
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Obtain a fresh token
    async fn fetch_token(&self) -> Result<IssuedToken, TokenError>;

    /// Ask the service to call this softphone; returns the service's reply
    async fn trigger_test_call(&self) -> Result<String, TokenError>;
}

/// [`TokenSource`] backed by two HTTP endpoints
///
/// Both endpoints take a POST with an empty body.
#[derive(Debug, Clone)]
pub struct HttpTokenSource {
    client: reqwest::Client,
    token_url: String,
    test_call_url: Option<String>,
}

impl HttpTokenSource {
    pub fn new(token_url: impl Into<String>, timeout: Duration) -> Result<Self, TokenError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("softphone/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            token_url: token_url.into(),
            test_call_url: None,
        })
    }

    pub fn with_test_call_url(mut self, url: impl Into<String>) -> Self {
        self.test_call_url = Some(url.into());
        self
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    async fn post(&self, url: &str) -> Result<String, TokenError> {
        debug!(url = %url, "POST");
        let response = self.client.post(url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(TokenError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl TokenSource for HttpTokenSource {
    async fn fetch_token(&self) -> Result<IssuedToken, TokenError> {
        let body = self.post(&self.token_url).await?;
        let token: IssuedToken = serde_json::from_str(&body).map_err(|e| TokenError::Decode {
            reason: e.to_string(),
        })?;
        info!(user_id = %token.user_id, expires_on = ?token.expires_on, "Token issued");
        Ok(token)
    }

    async fn trigger_test_call(&self) -> Result<String, TokenError> {
        let url = self
            .test_call_url
            .as_deref()
            .ok_or(TokenError::NotConfigured { what: "test call" })?;
        let reply = self.post(url).await?;
        info!("Test call requested");
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_service_payload() {
        let json = r#"{
            "token": "eyJhbGciOi",
            "userId": "8:acs:1234",
            "expiresOn": "2030-01-01T12:00:00.000Z"
        }"#;
        let token: IssuedToken = serde_json::from_str(json).unwrap();
        assert_eq!(token.user_id, "8:acs:1234");
        assert!(token.expires_on.is_some());

        let credential: Credential = token.into();
        assert_eq!(credential.token(), "eyJhbGciOi");
        assert_eq!(credential.user_id(), Some("8:acs:1234"));
        assert!(credential.validate(Utc::now()).is_ok());
    }

    #[test]
    fn test_missing_expiry_is_allowed() {
        let token: IssuedToken =
            serde_json::from_str(r#"{"token": "abc", "userId": "8:acs:1"}"#).unwrap();
        assert_eq!(token.expires_on, None);
        assert_eq!(token.into_credential().expires_on(), None);
    }

    #[tokio::test]
    async fn test_test_call_needs_url() {
        let source = HttpTokenSource::new("http://127.0.0.1:9/token", Duration::from_secs(1)).unwrap();
        assert!(matches!(
            source.trigger_test_call().await,
            Err(TokenError::NotConfigured { .. })
        ));
    }
}
