//! Embedding API clients for various providers

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use super::preprocess_text_for_embedding;
use super::EmbeddingService;
use super::MAX_BATCH_SIZE;
use crate::config::AppConfig;
use crate::errors::MindcareError;
use crate::errors::Result;

/// Supported embedding providers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingProvider {
    /// `OpenAI` embeddings API
    OpenAI,
    /// Ollama local embeddings
    Ollama,
}

impl EmbeddingProvider {
    /// Parse the `embeddings.provider` config value
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "openai" => Ok(Self::OpenAI),
            "ollama" => Ok(Self::Ollama),
            other => Err(MindcareError::ConfigError(format!(
                "unsupported embedding provider: {other}"
            ))),
        }
    }
}

/// Client for generating embeddings from various providers
pub struct EmbeddingClient {
    provider: EmbeddingProvider,
    model: String,
    endpoint: String,
    api_key: Option<String>,
    dimension: usize,
    client: Client,
}

impl EmbeddingClient {
    /// Create a new embedding client
    ///
    /// # Errors
    /// - HTTP client build errors (invalid configuration)
    pub fn new(
        provider: EmbeddingProvider,
        model: String,
        endpoint: String,
        api_key: Option<String>,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| MindcareError::HttpError(e.to_string()))?;

        Ok(Self {
            provider,
            model,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
            dimension,
            client,
        })
    }

    /// Build a client from the `[embeddings]` config section
    pub fn from_app_config(config: &AppConfig) -> Result<Self> {
        let embeddings = &config.embeddings;
        Self::new(
            EmbeddingProvider::from_name(&embeddings.provider)?,
            embeddings.model.clone(),
            embeddings.endpoint.clone(),
            embeddings.api_key.clone(),
            embeddings.dimension,
            Duration::from_millis(embeddings.timeout_ms),
        )
    }

    /// Generate embedding using `OpenAI` API
    async fn generate_openai(&self, input: Vec<&str>) -> Result<Vec<Vec<f32>>> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| MindcareError::ConfigError("OpenAI API key not provided".to_string()))?;

        #[derive(Serialize)]
        struct OpenAIRequest<'a> {
            input: Vec<&'a str>,
            model: &'a str,
        }

        #[derive(Deserialize)]
        struct OpenAIResponse {
            data: Vec<EmbeddingData>,
        }

        #[derive(Deserialize)]
        struct EmbeddingData {
            index: usize,
            embedding: Vec<f32>,
        }

        let url = format!("{}/embeddings", self.endpoint);
        debug!("Calling OpenAI embeddings API: {} items", input.len());

        let expected = input.len();
        let request = OpenAIRequest {
            input,
            model: &self.model,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&request)
            .send()
            .await
            .map_err(|e| MindcareError::HttpError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(MindcareError::EmbeddingError(format!(
                "OpenAI API error ({status}): {error_text}"
            )));
        }

        let mut result: OpenAIResponse = response
            .json()
            .await
            .map_err(|e| MindcareError::EmbeddingError(format!("Failed to parse response: {e}")))?;

        if result.data.len() != expected {
            return Err(MindcareError::EmbeddingError(format!(
                "expected {expected} embeddings, got {}",
                result.data.len()
            )));
        }
        result.data.sort_by_key(|d| d.index);
        Ok(result.data.into_iter().map(|d| d.embedding).collect())
    }

    /// Generate embedding using Ollama API
    async fn generate_ollama(&self, text: &str) -> Result<Vec<f32>> {
        #[derive(Serialize)]
        struct OllamaRequest<'a> {
            model: &'a str,
            prompt: &'a str,
        }

        #[derive(Deserialize)]
        struct OllamaResponse {
            embedding: Vec<f32>,
        }

        let url = format!("{}/api/embeddings", self.endpoint);
        debug!("Calling Ollama embeddings API: {}", url);

        let request = OllamaRequest {
            model: &self.model,
            prompt: text,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| MindcareError::HttpError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(MindcareError::EmbeddingError(format!(
                "Ollama API error ({status}): {error_text}"
            )));
        }

        let result: OllamaResponse = response
            .json()
            .await
            .map_err(|e| MindcareError::EmbeddingError(format!("Failed to parse response: {e}")))?;

        Ok(result.embedding)
    }

    fn check_dimension(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() == self.dimension {
            Ok(())
        } else {
            Err(MindcareError::EmbeddingError(format!(
                "model {} returned {} dimensions, expected {}",
                self.model,
                embedding.len(),
                self.dimension
            )))
        }
    }
}

#[async_trait]
impl EmbeddingService for EmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let text = preprocess_text_for_embedding(text)?;
        let embedding = match self.provider {
            EmbeddingProvider::OpenAI => self
                .generate_openai(vec![text.as_str()])
                .await?
                .pop()
                .ok_or_else(|| MindcareError::EmbeddingError("No embedding in response".into()))?,
            EmbeddingProvider::Ollama => self.generate_ollama(&text).await?,
        };
        self.check_dimension(&embedding)?;
        Ok(embedding)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let processed = texts
            .iter()
            .map(|t| preprocess_text_for_embedding(t))
            .collect::<Result<Vec<_>>>()?;

        let mut embeddings = Vec::with_capacity(processed.len());
        match self.provider {
            EmbeddingProvider::OpenAI => {
                for chunk in processed.chunks(MAX_BATCH_SIZE) {
                    let batch = self
                        .generate_openai(chunk.iter().map(String::as_str).collect())
                        .await?;
                    embeddings.extend(batch);
                }
            }
            // Ollama has no batch endpoint
            EmbeddingProvider::Ollama => {
                for text in &processed {
                    embeddings.push(self.generate_ollama(text).await?);
                }
            }
        }

        for embedding in &embeddings {
            self.check_dimension(embedding)?;
        }
        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_from_name() {
        assert_eq!(EmbeddingProvider::from_name("openai").unwrap(), EmbeddingProvider::OpenAI);
        assert_eq!(EmbeddingProvider::from_name("ollama").unwrap(), EmbeddingProvider::Ollama);
        assert!(EmbeddingProvider::from_name("local-gpu").is_err());
    }

    #[test]
    fn test_endpoint_trailing_slash_trimmed() {
        let client = EmbeddingClient::new(
            EmbeddingProvider::Ollama,
            "bge-m3".to_string(),
            "http://localhost:11434/".to_string(),
            None,
            1024,
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(client.endpoint, "http://localhost:11434");
    }

    #[tokio::test]
    #[ignore = "Requires API key"]
    async fn test_openai_embedding() {
        let client = EmbeddingClient::new(
            EmbeddingProvider::OpenAI,
            "text-embedding-3-small".to_string(),
            "https://api.openai.com/v1".to_string(),
            std::env::var("OPENAI_API_KEY").ok(),
            1536,
            Duration::from_secs(30),
        )
        .unwrap();

        let embedding = client.embed("안녕하세요").await.unwrap();
        assert_eq!(embedding.len(), 1536);
    }
}
