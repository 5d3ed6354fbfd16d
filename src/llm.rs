use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use thiserror::Error;

use crate::config::LlmConfig;

const USER_AGENT: &str = "gig-board/0.1";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompletionError {
    #[error("completion request timed out")]
    Timeout,
    #[error("completion service unavailable: {0}")]
    Unavailable(String),
}

/// Anything that turns a system instruction plus user text into a raw reply.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String, CompletionError>;
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct LlmClient {
    model: String,
    base_url: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
    client: Client,
}

impl LlmClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, CompletionError> {
        Self::build(config, config.timeout())
    }

    fn build(config: &LlmConfig, timeout: Duration) -> Result<Self, CompletionError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| CompletionError::Unavailable(err.to_string()))?;

        Ok(Self {
            model: config.model.clone(),
            base_url: config.endpoint.clone(),
            api_key: config
                .api_key
                .clone()
                .filter(|key| !key.trim().is_empty()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            client,
        })
    }
}

#[async_trait]
impl CompletionService for LlmClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String, CompletionError> {
        let base = self.base_url.trim_end_matches('/');
        let url = format!("{}/chat/completions", base);

        let payload = json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        });

        let mut request = self.client.post(url).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        let text_body = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(CompletionError::Unavailable(format!(
                "HTTP {}: {}",
                status, text_body
            )));
        }

        let value: serde_json::Value = serde_json::from_str(&text_body)
            .map_err(|err| CompletionError::Unavailable(err.to_string()))?;

        value
            .get("choices")
            .and_then(|choices| choices.as_array())
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CompletionError::Unavailable("LLM response missing content".to_string()))
    }
}

fn transport_error(err: reqwest::Error) -> CompletionError {
    if err.is_timeout() {
        CompletionError::Timeout
    } else {
        CompletionError::Unavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;

    fn config_for(server: &MockServer, api_key: Option<&str>) -> LlmConfig {
        LlmConfig {
            endpoint: format!("{}/v1/", server.base_url()),
            api_key: api_key.map(str::to_string),
            ..LlmConfig::default()
        }
    }

    #[tokio::test]
    async fn returns_trimmed_message_content() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .header("authorization", "Bearer test-key");
            then.status(200).json_body(json!({
                "choices": [
                    { "message": { "role": "assistant", "content": "  {\"venue\":\"Purples\"}\n" } }
                ]
            }));
        });

        let client = LlmClient::from_config(&config_for(&server, Some("test-key"))).unwrap();
        let reply = client.complete("system", "user").await.unwrap();

        assert_eq!(reply, "{\"venue\":\"Purples\"}");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_success_status_is_unavailable() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(429).body("rate limited");
        });

        let client = LlmClient::from_config(&config_for(&server, None)).unwrap();
        match client.complete("system", "user").await {
            Err(CompletionError::Unavailable(reason)) => assert!(reason.contains("429")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_content_is_unavailable() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(200)
                .json_body(json!({ "choices": [ { "message": { "content": "   " } } ] }));
        });

        let client = LlmClient::from_config(&config_for(&server, None)).unwrap();
        assert_eq!(
            client.complete("system", "user").await,
            Err(CompletionError::Unavailable(
                "LLM response missing content".to_string()
            ))
        );
    }

    #[tokio::test]
    async fn slow_service_times_out() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(200)
                .delay(Duration::from_millis(1500))
                .json_body(json!({ "choices": [ { "message": { "content": "{}" } } ] }));
        });

        let client =
            LlmClient::build(&config_for(&server, None), Duration::from_millis(200)).unwrap();
        assert_eq!(
            client.complete("system", "user").await,
            Err(CompletionError::Timeout)
        );
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_unavailable() {
        let config = LlmConfig {
            endpoint: "http://127.0.0.1:9/v1".to_string(),
            ..LlmConfig::default()
        };
        let client = LlmClient::build(&config, Duration::from_secs(2)).unwrap();
        assert!(matches!(
            client.complete("system", "user").await,
            Err(CompletionError::Unavailable(_))
        ));
    }
}
