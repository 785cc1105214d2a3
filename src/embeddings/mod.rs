//! Embeddings generation module
//!
//! Maps text to fixed-dimension vectors. The pipeline only depends on the
//! [`EmbeddingService`] trait; [`EmbeddingClient`] is the HTTP implementation
//! for:
//! - OpenAI (text-embedding-3-small, text-embedding-3-large, ...)
//! - Ollama (local models)
//!
//! # Examples
//!
//! ```rust,no_run
//! use mindcare::embeddings::EmbeddingClient;
//! use mindcare::embeddings::EmbeddingService;
//! use mindcare::config::AppConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::load()?;
//!     let client = EmbeddingClient::from_app_config(&config)?;
//!
//!     let embedding = client.embed("요즘 잠이 안 와요").await?;
//!     println!("Generated embedding with {} dimensions", embedding.len());
//!
//!     Ok(())
//! }
//! ```

pub mod client;

use async_trait::async_trait;

pub use client::EmbeddingClient;
pub use client::EmbeddingProvider;

use crate::errors::MindcareError;
use crate::errors::Result;

/// Maximum characters sent to the embedding model for one text
pub const MAX_EMBEDDING_CHARS: usize = 2_000;

/// Maximum batch size for embedding generation
pub const MAX_BATCH_SIZE: usize = 100;

/// Text to vector mapping; identical input must give identical output
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts, order preserved
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// Dimensionality of every returned vector
    fn dimension(&self) -> usize;
}

/// Collapse whitespace and cap the length before a text is embedded
pub fn preprocess_text_for_embedding(text: &str) -> Result<String> {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() {
        return Err(MindcareError::EmbeddingError(
            "Text contains only whitespace".to_string(),
        ));
    }

    Ok(normalized.chars().take(MAX_EMBEDDING_CHARS).collect())
}
