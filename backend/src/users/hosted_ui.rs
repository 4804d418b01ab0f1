//! The Cognito hosted UI, which runs the Google and Apple sign-in for us and hands back an
//! authorization code of its own.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostedUiError {
    #[error("hosted ui request failed: {0}")]
    Transport(String),

    #[error("hosted ui rejected the code: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait HostedUi: Send + Sync {
    /// URL that starts a sign-in with `identity_provider`, eg. "Google".
    fn authorize_url(&self, identity_provider: &str, state: Option<&str>) -> Result<Url, HostedUiError>;

    /// Trade a hosted UI authorization code for an ID token.
    async fn exchange_code(&self, code: &str) -> Result<String, HostedUiError>;
}

pub struct CognitoHostedUi {
    client: reqwest::Client,
    domain: String,
    client_id: String,
    client_secret: Option<String>,
    callback_url: String,
}

impl CognitoHostedUi {
    pub fn new(
        domain: &str,
        client_id: &str,
        client_secret: Option<&str>,
        callback_url: &str,
        timeout: Duration,
    ) -> Result<Self, HostedUiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HostedUiError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            domain: domain.trim_end_matches('/').to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret
                .filter(|secret| !secret.is_empty())
                .map(str::to_string),
            callback_url: callback_url.to_string(),
        })
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    id_token: String,
}

#[async_trait]
impl HostedUi for CognitoHostedUi {
    fn authorize_url(&self, identity_provider: &str, state: Option<&str>) -> Result<Url, HostedUiError> {
        let mut params = vec![
            ("client_id", self.client_id.as_str()),
            ("response_type", "code"),
            ("scope", "openid email"),
            ("redirect_uri", self.callback_url.as_str()),
            ("identity_provider", identity_provider),
        ];
        if let Some(state) = state.filter(|state| !state.is_empty()) {
            params.push(("state", state));
        }
        Url::parse_with_params(&format!("{}/oauth2/authorize", self.domain), &params)
            .map_err(|e| HostedUiError::Transport(e.to_string()))
    }

    async fn exchange_code(&self, code: &str) -> Result<String, HostedUiError> {
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("client_id", self.client_id.as_str()),
            ("redirect_uri", self.callback_url.as_str()),
            ("code", code),
        ];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.as_str()));
        }
        let response = self
            .client
            .post(&format!("{}/oauth2/token", self.domain))
            .form(&form)
            .send()
            .await
            .map_err(|e| HostedUiError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(HostedUiError::Rejected(response.status().to_string()));
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| HostedUiError::Transport(e.to_string()))?;
        if token.id_token.is_empty() {
            return Err(HostedUiError::Rejected("missing id_token".to_string()));
        }
        Ok(token.id_token)
    }
}
