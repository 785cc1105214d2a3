//! History-aware rewriting of the latest utterance into a search query

use std::sync::Arc;

use tracing::debug;
use tracing::warn;

use crate::llm::prompts::CounselingPrompts;
use crate::llm::ChatMessage;
use crate::llm::GenerationService;
use crate::models::Utterance;
use crate::rag::prompts::format_history;

/// Messages of history the rewriter looks at
pub const REWRITE_HISTORY: usize = 6;

pub struct QueryRewriter {
    generation: Arc<dyn GenerationService>,
}

impl QueryRewriter {
    pub fn new(generation: Arc<dyn GenerationService>) -> Self {
        Self { generation }
    }

    /// Standalone query for retrieval; any failure yields `latest` unchanged
    pub async fn rewrite(&self, history: &[Utterance], latest: &str) -> String {
        if history.is_empty() {
            return latest.to_string();
        }

        let window = &history[history.len().saturating_sub(REWRITE_HISTORY)..];
        let history_text = format_history(window);
        let prompt = CounselingPrompts::query_rewrite()
            .render_with(&[("history", history_text.as_str()), ("query", latest)]);
        let messages = [
            ChatMessage::system(CounselingPrompts::REWRITE_SYSTEM),
            ChatMessage::user(prompt),
        ];

        match self.generation.complete(&messages).await {
            Ok(raw) => match clean_rewrite(&raw) {
                Some(query) => {
                    debug!("Rewrote {:?} -> {:?}", latest, query);
                    query
                }
                None => latest.to_string(),
            },
            Err(e) => {
                warn!("Query rewrite failed, using raw utterance: {}", e);
                latest.to_string()
            }
        }
    }
}

/// First non-blank line with surrounding quotes removed
#[must_use]
pub fn clean_rewrite(raw: &str) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty())?;
    let cleaned = line
        .trim_matches(|c| matches!(c, '"' | '\'' | '“' | '”' | '‘' | '’'))
        .trim();
    (!cleaned.is_empty()).then(|| cleaned.to_string())
}
