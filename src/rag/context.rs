//! Prompt assembly under a character budget

use crate::config::ContextConfig;
use crate::llm::prompts::CounselingPrompts;
use crate::llm::ChatMessage;
use crate::models::RetrievedPassage;
use crate::models::Utterance;
use crate::rag::prompts::build_answer_prompt;
use crate::rag::prompts::format_history;
use crate::rag::prompts::format_transcript;
use crate::rag::prompts::render_passage;
use crate::rag::prompts::NO_PASSAGES_NOTICE;

/// What kind of answer the prompt asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    /// Grounded counseling reply
    Answer,
    /// Closing summary of the whole session
    Summary,
}

/// Everything sent to the generation service for one turn
#[derive(Debug, Clone, PartialEq)]
pub struct PromptContext {
    pub kind: PromptKind,
    /// Never trimmed
    pub directive: String,
    /// Kept passages, best rank first
    pub passages: Vec<RetrievedPassage>,
    /// Kept history, oldest first
    pub history: Vec<Utterance>,
    pub query: String,
}

impl PromptContext {
    /// User-turn text: passages, history and the latest utterance
    #[must_use]
    pub fn render_body(&self) -> String {
        match self.kind {
            PromptKind::Answer => {
                let context = render_passages(&self.passages);
                build_answer_prompt(&context, &format_history(&self.history), &self.query)
            }
            PromptKind::Summary => CounselingPrompts::session_summary()
                .render_with(&[("conversation", format_transcript(&self.history).as_str())]),
        }
    }

    #[must_use]
    pub fn messages(&self) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(self.directive.clone()),
            ChatMessage::user(self.render_body()),
        ]
    }

    /// Characters of directive plus body
    #[must_use]
    pub fn char_count(&self) -> usize {
        self.directive.chars().count() + self.render_body().chars().count()
    }
}

fn render_passages(passages: &[RetrievedPassage]) -> String {
    if passages.is_empty() {
        return NO_PASSAGES_NOTICE.to_string();
    }
    passages
        .iter()
        .enumerate()
        .map(|(i, p)| render_passage(i + 1, p))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Builds bounded prompt contexts
///
/// When over budget, the oldest history message goes first, then the
/// lowest-ranked passage. The directive and the latest utterance are kept
/// even if they alone exceed the budget.
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    max_chars: usize,
    history_messages: usize,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::from_config(&ContextConfig::default())
    }
}

impl ContextAssembler {
    #[must_use]
    pub const fn new(max_chars: usize, history_messages: usize) -> Self {
        Self {
            max_chars,
            history_messages,
        }
    }

    #[must_use]
    pub fn from_config(config: &ContextConfig) -> Self {
        Self::new(config.max_chars, config.history_messages)
    }

    #[must_use]
    pub const fn max_chars(&self) -> usize {
        self.max_chars
    }

    #[must_use]
    pub fn assemble(
        &self,
        passages: &[RetrievedPassage],
        history: &[Utterance],
        query: &str,
        directive: &str,
    ) -> PromptContext {
        let mut passages = passages.to_vec();
        passages.sort_by_key(|p| p.rank);

        let window = &history[history.len().saturating_sub(self.history_messages)..];
        let mut context = PromptContext {
            kind: PromptKind::Answer,
            directive: directive.to_string(),
            passages,
            history: window.to_vec(),
            query: query.to_string(),
        };

        while context.char_count() > self.max_chars {
            if !context.history.is_empty() {
                context.history.remove(0);
            } else if context.passages.pop().is_none() {
                break;
            }
        }
        context
    }

    /// Closing-turn variant over the whole session transcript
    #[must_use]
    pub fn assemble_summary(&self, history: &[Utterance], directive: &str) -> PromptContext {
        let mut context = PromptContext {
            kind: PromptKind::Summary,
            directive: directive.to_string(),
            passages: Vec::new(),
            history: history.to_vec(),
            query: String::new(),
        };

        while context.char_count() > self.max_chars && !context.history.is_empty() {
            context.history.remove(0);
        }
        context
    }
}
