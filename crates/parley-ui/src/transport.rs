//! Chat transport: how a front end reaches the chat endpoint.

use std::time::Duration;

use async_trait::async_trait;
use parley_core::error::{ParleyError, Result};
use parley_core::types::{ChatRequest, ChatResponse};
use reqwest::Client;
use serde::Deserialize;

/// Sends one query and returns the reply text.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send(&self, query: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// Posts `{query}` as JSON to `{base_url}/api`.
pub struct HttpChatTransport {
    http: Client,
    endpoint: String,
}

impl HttpChatTransport {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ParleyError::Transport(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            endpoint: format!("{}/api", base_url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ChatTransport for HttpChatTransport {
    async fn send(&self, query: &str) -> Result<String> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&ChatRequest {
                query: query.to_string(),
            })
            .send()
            .await
            .map_err(|e| ParleyError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|b| b.message)
                .unwrap_or(text);
            return Err(ParleyError::Transport(format!(
                "chat endpoint returned HTTP {}: {}",
                status.as_u16(),
                message
            )));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ParleyError::Transport(format!("malformed chat response: {}", e)))?;
        Ok(body.message.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_base_url() {
        let t = HttpChatTransport::new("http://127.0.0.1:3000/", 5).unwrap();
        assert_eq!(t.endpoint(), "http://127.0.0.1:3000/api");
    }
}
