//! OpenAI-compatible chat completions client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use super::streaming::chat_delta_stream;
use super::ChatMessage;
use super::GenerationService;
use super::StreamingResponse;
use crate::config::AppConfig;
use crate::errors::MindcareError;
use crate::errors::Result;

#[derive(Debug, Serialize)]
struct ChatRequestMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatRequestMessage<'a>>,
    temperature: f32,
    max_tokens: usize,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for any endpoint that speaks the `chat/completions` protocol
/// (OpenAI, vLLM, Ollama's `/v1`)
pub struct LlmService {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
    request_timeout: Duration,
}

impl LlmService {
    pub fn new(config: &AppConfig) -> Result<Self> {
        // No overall timeout here: it would cut long streams. The request
        // itself is bounded in `send`, chunk gaps by the answer generator.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| MindcareError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.llm_endpoint().trim_end_matches('/').to_string(),
            api_key: config.llm_key().to_string(),
            model: config.llm_model().to_string(),
            temperature: config.llm.temperature,
            max_tokens: config.llm.max_tokens,
            request_timeout: Duration::from_millis(config.llm.request_timeout_ms),
        })
    }

    /// Model name requests are sent to
    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send(&self, messages: &[ChatMessage], stream: bool) -> Result<reqwest::Response> {
        let request = ChatRequest {
            model: &self.model,
            messages: messages
                .iter()
                .map(|m| ChatRequestMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream,
        };

        let url = format!("{}/chat/completions", self.endpoint);
        debug!("POST {} (model={}, stream={})", url, self.model, stream);

        let mut builder = self.client.post(&url).json(&request);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }

        let response = tokio::time::timeout(self.request_timeout, builder.send())
            .await
            .map_err(|_| MindcareError::GenerationTimeout(self.request_timeout.as_millis() as u64))?
            .map_err(|e| MindcareError::HttpError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            warn!("LLM endpoint returned {}: {}", status, error_text);
            return Err(MindcareError::LlmError(format!(
                "API error ({status}): {error_text}"
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl GenerationService for LlmService {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let response = self.send(messages, false).await?;
        let body: ChatResponse = tokio::time::timeout(self.request_timeout, response.json())
            .await
            .map_err(|_| MindcareError::GenerationTimeout(self.request_timeout.as_millis() as u64))?
            .map_err(|e| MindcareError::LlmError(format!("Failed to parse response: {e}")))?;

        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| MindcareError::LlmError("Empty completion".to_string()))
    }

    async fn stream_complete(&self, messages: &[ChatMessage]) -> Result<StreamingResponse> {
        let response = self.send(messages, true).await?;
        Ok(chat_delta_stream(response.bytes_stream()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    #[test]
    fn test_request_serialization() {
        let messages = [ChatMessage::system("지시문"), ChatMessage::user("안녕")];
        let request = ChatRequest {
            model: "gpt-4o",
            messages: messages
                .iter()
                .map(|m| ChatRequestMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            temperature: 0.7,
            max_tokens: 256,
            stream: false,
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "안녕");
        assert!(json.get("stream").is_none());
        assert_eq!(messages[1].role, Role::User);
    }

    #[test]
    fn test_endpoint_normalized() {
        let mut config = AppConfig::default();
        config.llm.llm_endpoint = "http://localhost:11434/v1/".to_string();
        let service = LlmService::new(&config).unwrap();
        assert_eq!(service.endpoint, "http://localhost:11434/v1");
        assert_eq!(service.model(), "gpt-4o");
    }
}
