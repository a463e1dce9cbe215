//! Configuration fetch: one call per pre-warm, returning a fresh avatar
//! session token and the voice agent to talk to.
//!
//! [`HttpConfigSource`] asks the avatar provider's token endpoint for a
//! session with audio passthrough enabled (the avatar is driven by audio we
//! push, not by its own microphone).  All connection details come from
//! [`ProviderConfig`]; the API key is read from the environment variable
//! the persona names, at fetch time.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{ProviderConfig, SessionKind};

// ---------------------------------------------------------------------------
// SetupError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SetupError {
    /// A required setting or environment variable is empty or absent.
    #[error("missing configuration: {0}")]
    MissingSetting(String),

    /// HTTP transport or connection error.
    #[error("config request failed: {0}")]
    Request(String),

    /// The endpoint answered with a non-success status.
    #[error("config endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The response was not the JSON we expected.
    #[error("failed to parse config response: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for SetupError {
    fn from(e: reqwest::Error) -> Self {
        SetupError::Request(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// SessionCredentials / ConfigSource
// ---------------------------------------------------------------------------

/// What a pre-warm needs from the configuration fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCredentials {
    pub avatar_session_token: String,
    pub voice_agent_id: String,
}

#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn fetch(&self, kind: SessionKind) -> Result<SessionCredentials, SetupError>;
}

/// Hands out the same credentials every time; used for dry runs.
#[derive(Debug, Clone)]
pub struct StaticConfigSource {
    credentials: SessionCredentials,
}

impl StaticConfigSource {
    pub fn new(credentials: SessionCredentials) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl ConfigSource for StaticConfigSource {
    async fn fetch(&self, _kind: SessionKind) -> Result<SessionCredentials, SetupError> {
        Ok(self.credentials.clone())
    }
}

// ---------------------------------------------------------------------------
// HttpConfigSource
// ---------------------------------------------------------------------------

pub struct HttpConfigSource {
    client: reqwest::Client,
    provider: ProviderConfig,
}

impl HttpConfigSource {
    /// The HTTP client carries the per-request timeout from
    /// `provider.request_timeout_secs`.
    pub fn from_config(provider: &ProviderConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(provider.request_timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            provider: provider.clone(),
        }
    }

    fn request_body(avatar_id: &str) -> serde_json::Value {
        serde_json::json!({
            "personaConfig": {
                "avatarId": avatar_id,
                "enableAudioPassthrough": true
            }
        })
    }

    fn parse_token(json: &serde_json::Value) -> Result<String, SetupError> {
        let token = json["sessionToken"]
            .as_str()
            .ok_or_else(|| SetupError::Parse("response has no sessionToken".into()))?
            .trim();
        if token.is_empty() {
            return Err(SetupError::Parse("sessionToken is empty".into()));
        }
        Ok(token.to_string())
    }

    fn require<'a>(value: &'a str, name: &str) -> Result<&'a str, SetupError> {
        if value.trim().is_empty() {
            return Err(SetupError::MissingSetting(name.to_string()));
        }
        Ok(value)
    }
}

#[async_trait]
impl ConfigSource for HttpConfigSource {
    async fn fetch(&self, kind: SessionKind) -> Result<SessionCredentials, SetupError> {
        let persona = self.provider.persona(kind);
        let auth_uri = Self::require(&self.provider.auth_uri, "provider.auth_uri")?;
        let avatar_id = Self::require(&persona.avatar_id, "persona avatar_id")?;
        let agent_id = Self::require(&persona.voice_agent_id, "persona voice_agent_id")?;
        let api_key = std::env::var(&persona.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| SetupError::MissingSetting(persona.api_key_env.clone()))?;

        log::debug!("setup: requesting {} avatar session token", kind.label());

        let response = self
            .client
            .post(auth_uri)
            .bearer_auth(api_key)
            .json(&Self::request_body(avatar_id))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::error!("setup: avatar token endpoint error ({status}): {body}");
            return Err(SetupError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SetupError::Parse(e.to_string()))?;

        Ok(SessionCredentials {
            avatar_session_token: Self::parse_token(&json)?,
            voice_agent_id: agent_id.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
