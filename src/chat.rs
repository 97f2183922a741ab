//! Chat proxy — forwards a provider's chat request to the upstream
//! generative-model HTTP endpoint (spec §4.E).

use serde::{Deserialize, Serialize};

use crate::Error;
use crate::config::UpstreamConfig;
use crate::protocol::ChatMessage;

/// Upstream `POST /generate` request body.
#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    stream: bool,
}

/// Upstream `POST /generate` response body (non-streaming).
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// One upstream streamed chunk, as newline-delimited JSON.
#[derive(Debug, Deserialize)]
pub struct GenerateChunk {
    /// Partial token text for this chunk.
    #[serde(default)]
    pub response: String,
    /// Set on the final chunk.
    #[serde(default)]
    pub done: bool,
}

/// Client for the upstream generative-model endpoint.
pub struct ChatProxy {
    http: reqwest::Client,
    base_url: String,
    default_model: String,
}

impl ChatProxy {
    /// Build a proxy from upstream configuration.
    #[must_use]
    pub fn new(config: &UpstreamConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            default_model: config.default_model.clone(),
        }
    }

    /// The default model used when a request does not name one.
    #[must_use]
    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Build the upstream prompt from a provider's chat message list (spec
    /// §4.E): non-system message contents joined with newlines, the single
    /// `system` message (if any) carried separately.
    #[must_use]
    pub fn build_prompt(messages: &[ChatMessage]) -> (String, Option<String>) {
        let mut system = None;
        let mut lines = Vec::new();
        for message in messages {
            if message.role == "system" {
                system = Some(message.content.clone());
            } else {
                lines.push(message.content.clone());
            }
        }
        (lines.join("\n"), system)
    }

    /// Call `POST /generate` non-streaming, returning the response text and
    /// the model that was used.
    pub async fn generate(&self, model: Option<&str>, prompt: &str, system: Option<&str>) -> Result<(String, String), Error> {
        let model = model.unwrap_or(&self.default_model).to_string();
        let body = GenerateRequest {
            model: &model,
            prompt,
            system,
            stream: false,
        };

        let response = self
            .http
            .post(format!("{}/generate", self.base_url))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Transport(format!("upstream returned {}", response.status())));
        }

        let parsed: GenerateResponse = response.json().await?;
        Ok((parsed.response, model))
    }

    /// Call `POST /generate` streaming, returning the raw byte stream for
    /// the caller to split on newlines and decode as [`GenerateChunk`].
    pub async fn generate_stream(&self, model: Option<&str>, prompt: &str, system: Option<&str>) -> Result<reqwest::Response, Error> {
        let model = model.unwrap_or(&self.default_model).to_string();
        let body = GenerateRequest {
            model: &model,
            prompt,
            system,
            stream: true,
        };

        let response = self
            .http
            .post(format!("{}/generate", self.base_url))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Transport(format!("upstream returned {}", response.status())));
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_prompt_splits_system_from_messages() {
        let messages = vec![
            ChatMessage {
                role: "system".to_string(),
                content: "be terse".to_string(),
            },
            ChatMessage {
                role: "user".to_string(),
                content: "hi".to_string(),
            },
        ];
        let (prompt, system) = ChatProxy::build_prompt(&messages);
        assert_eq!(prompt, "hi");
        assert_eq!(system.as_deref(), Some("be terse"));
    }

    #[test]
    fn build_prompt_joins_multiple_non_system_messages() {
        let messages = vec![
            ChatMessage {
                role: "user".to_string(),
                content: "first".to_string(),
            },
            ChatMessage {
                role: "assistant".to_string(),
                content: "second".to_string(),
            },
        ];
        let (prompt, system) = ChatProxy::build_prompt(&messages);
        assert_eq!(prompt, "first\nsecond");
        assert!(system.is_none());
    }
}
