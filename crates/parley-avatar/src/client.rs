//! Streaming avatar service client.
//!
//! [`AvatarService`] is what the session actor depends on. [`HeyGenClient`]
//! implements it against the HeyGen streaming API: a token is minted with the
//! account API key, every session call then carries that token.

use std::time::Duration;

use async_trait::async_trait;
use parley_core::config::{AvatarConfig, AvatarQuality, SpeakMode};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::AvatarError;

/// Media coordinates of a started session, handed to the video element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvatarStream {
    pub session_id: String,
    pub url: String,
    pub access_token: String,
}

/// Remote operations of a streaming avatar platform.
#[async_trait]
pub trait AvatarService: Send + Sync {
    /// Mint a short-lived session token.
    async fn create_token(&self) -> Result<String, AvatarError>;

    /// Create a session and return its media coordinates.
    async fn create_session(&self, token: &str) -> Result<AvatarStream, AvatarError>;

    /// Start streaming on a created session.
    async fn start_session(&self, token: &str, session_id: &str) -> Result<(), AvatarError>;

    /// Ask the avatar to speak `text`.
    async fn speak(
        &self,
        token: &str,
        session_id: &str,
        text: &str,
        mode: SpeakMode,
    ) -> Result<(), AvatarError>;

    /// Stop the session and release it remotely.
    async fn stop_session(&self, token: &str, session_id: &str) -> Result<(), AvatarError>;
}

// =============================================================================
// HeyGen wire types
// =============================================================================

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct TokenData {
    token: String,
}

#[derive(Debug, Serialize)]
struct NewSessionRequest<'a> {
    quality: AvatarQuality,
    avatar_name: &'a str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
struct SessionRequest<'a> {
    session_id: &'a str,
}

#[derive(Debug, Serialize)]
struct TaskRequest<'a> {
    session_id: &'a str,
    text: &'a str,
    task_type: SpeakMode,
}

/// Client for the HeyGen streaming avatar API.
pub struct HeyGenClient {
    http: Client,
    base_url: String,
    api_key: String,
    avatar_name: String,
    quality: AvatarQuality,
}

impl HeyGenClient {
    pub fn new(config: &AvatarConfig, api_key: impl Into<String>) -> Result<Self, AvatarError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AvatarError::Session(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            avatar_name: config.avatar_name.clone(),
            quality: config.quality,
        })
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/v1/streaming.{}", self.base_url, name)
    }

    async fn post_session<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        name: &str,
        token: &str,
        body: &B,
    ) -> Result<Option<T>, AvatarError> {
        let response = self
            .http
            .post(self.endpoint(name))
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|e| AvatarError::Session(format!("streaming.{name} failed: {e}")))?;
        read_envelope(response).await
    }
}

#[async_trait]
impl AvatarService for HeyGenClient {
    async fn create_token(&self) -> Result<String, AvatarError> {
        let response = self
            .http
            .post(self.endpoint("create_token"))
            .header("x-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| AvatarError::Token(e.to_string()))?;

        let data: Option<TokenData> = read_envelope(response).await?;
        data.map(|d| d.token)
            .filter(|t| !t.is_empty())
            .ok_or(AvatarError::MissingField("token"))
    }

    async fn create_session(&self, token: &str) -> Result<AvatarStream, AvatarError> {
        let body = NewSessionRequest {
            quality: self.quality,
            avatar_name: &self.avatar_name,
            version: "v2",
        };
        self.post_session::<_, AvatarStream>("new", token, &body)
            .await?
            .ok_or(AvatarError::MissingField("session"))
    }

    async fn start_session(&self, token: &str, session_id: &str) -> Result<(), AvatarError> {
        self.post_session::<_, serde_json::Value>("start", token, &SessionRequest { session_id })
            .await
            .map(|_| ())
    }

    async fn speak(
        &self,
        token: &str,
        session_id: &str,
        text: &str,
        mode: SpeakMode,
    ) -> Result<(), AvatarError> {
        let body = TaskRequest {
            session_id,
            text,
            task_type: mode,
        };
        self.post_session::<_, serde_json::Value>("task", token, &body)
            .await
            .map(|_| ())
    }

    async fn stop_session(&self, token: &str, session_id: &str) -> Result<(), AvatarError> {
        self.post_session::<_, serde_json::Value>("stop", token, &SessionRequest { session_id })
            .await
            .map(|_| ())
    }
}

async fn read_envelope<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<Option<T>, AvatarError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AvatarError::Http {
            status: status.as_u16(),
            body,
        });
    }
    let envelope: Envelope<T> = response
        .json()
        .await
        .map_err(|e| AvatarError::Session(format!("failed to parse response: {e}")))?;
    Ok(envelope.data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_request_shape() {
        let body = NewSessionRequest {
            quality: AvatarQuality::High,
            avatar_name: "Wayne_20240711",
            version: "v2",
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"quality": "high", "avatar_name": "Wayne_20240711", "version": "v2"})
        );
    }

    #[test]
    fn test_task_request_uses_speak_mode() {
        let body = TaskRequest {
            session_id: "s1",
            text: "hello",
            task_type: SpeakMode::Repeat,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["task_type"], "repeat");
    }

    #[test]
    fn test_envelope_with_null_data() {
        let env: Envelope<TokenData> =
            serde_json::from_str(r#"{"error": null, "data": null}"#).unwrap();
        assert!(env.data.is_none());
    }

    #[test]
    fn test_envelope_without_data_field() {
        let env: Envelope<TokenData> = serde_json::from_str(r#"{"error": null}"#).unwrap();
        assert!(env.data.is_none());
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let config = AvatarConfig {
            base_url: "https://api.heygen.com/".to_string(),
            ..AvatarConfig::default()
        };
        let client = HeyGenClient::new(&config, "key").unwrap();
        assert_eq!(
            client.endpoint("create_token"),
            "https://api.heygen.com/v1/streaming.create_token"
        );
    }
}
