//! Streamed answer generation with safety-marker scanning

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::MindcareError;
use crate::errors::Result;
use crate::llm::GenerationService;
use crate::llm::TokenStream;
use crate::rag::context::PromptContext;
use crate::rag::safety::SafetyScanner;

/// Final state of a fully consumed answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedAnswer {
    /// Visible text, marker removed
    pub text: String,
    /// The generation service asked for escalation
    pub escalate: bool,
}

pub struct AnswerGenerator {
    generation: Arc<dyn GenerationService>,
    marker: String,
    chunk_timeout: Duration,
}

impl AnswerGenerator {
    pub fn new(generation: Arc<dyn GenerationService>, marker: impl Into<String>, chunk_timeout: Duration) -> Self {
        Self {
            generation,
            marker: marker.into(),
            chunk_timeout,
        }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Start generating; the returned stream is lazy and can be read once
    pub async fn generate(&self, context: &PromptContext, cancel: CancellationToken) -> Result<AnswerStream> {
        let messages = context.messages();
        debug!(
            "Generating answer from {} passages and {} history messages",
            context.passages.len(),
            context.history.len()
        );

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(MindcareError::Cancelled),
            response = self.generation.stream_complete(&messages) => response?,
        };

        Ok(AnswerStream {
            inner: Some(response.into_stream()),
            scanner: SafetyScanner::new(self.marker.clone()),
            cancel,
            chunk_timeout: self.chunk_timeout,
            text: String::new(),
            completed: false,
        })
    }
}

/// Visible chunks of one answer
///
/// Ends after the first error, cancellation or chunk timeout; the underlying
/// request is dropped at that point.
pub struct AnswerStream {
    inner: Option<TokenStream>,
    scanner: SafetyScanner,
    cancel: CancellationToken,
    chunk_timeout: Duration,
    text: String,
    completed: bool,
}

impl AnswerStream {
    /// Next non-empty visible chunk, `None` once the stream has ended
    pub async fn next_chunk(&mut self) -> Option<Result<String>> {
        loop {
            let inner = self.inner.as_mut()?;
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    self.inner = None;
                    return Some(Err(MindcareError::Cancelled));
                }
                next = tokio::time::timeout(self.chunk_timeout, inner.next()) => next,
            };

            match next {
                Err(_) => {
                    self.inner = None;
                    let ms = u64::try_from(self.chunk_timeout.as_millis()).unwrap_or(u64::MAX);
                    return Some(Err(MindcareError::GenerationTimeout(ms)));
                }
                Ok(None) => {
                    self.inner = None;
                    self.completed = true;
                    let tail = self.scanner.finish();
                    if tail.is_empty() {
                        return None;
                    }
                    self.text.push_str(&tail);
                    return Some(Ok(tail));
                }
                Ok(Some(Err(e))) => {
                    self.inner = None;
                    return Some(Err(e));
                }
                Ok(Some(Ok(chunk))) => {
                    let visible = self.scanner.push(&chunk);
                    if !visible.is_empty() {
                        self.text.push_str(&visible);
                        return Some(Ok(visible));
                    }
                }
            }
        }
    }

    /// Marker seen so far, including in a stream that was cut short
    #[must_use]
    pub const fn escalation_flagged(&self) -> bool {
        self.scanner.detected()
    }

    /// The generation service finished the stream normally
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.completed
    }

    /// Visible text emitted so far
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Drain the stream; any error discards the partial text
    pub async fn collect(mut self) -> Result<GeneratedAnswer> {
        while let Some(chunk) = self.next_chunk().await {
            chunk?;
        }
        Ok(GeneratedAnswer {
            escalate: self.escalation_flagged(),
            text: self.text,
        })
    }
}
