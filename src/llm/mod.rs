//! Generation service seam and the OpenAI-compatible client behind it

pub mod client;
pub mod prompts;
pub mod streaming;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;

pub use client::LlmService;
pub use prompts::PromptTemplate;
pub use streaming::StreamingResponse;
pub use streaming::TokenStream;

use crate::errors::Result;
use crate::models::Role;

/// One message of a chat-style prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Prompt to completion, either in one piece or as a lazy chunk stream
///
/// Dropping the returned stream aborts the underlying request.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Complete a prompt and return the whole text
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Start a streamed completion; resolves once the first response arrives
    async fn stream_complete(&self, messages: &[ChatMessage]) -> Result<StreamingResponse>;
}
