//! Intent routing of the latest user utterance

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use crate::llm::prompts::CounselingPrompts;
use crate::llm::ChatMessage;
use crate::llm::GenerationService;
use crate::models::Utterance;
use crate::rag::prompts::format_history;
use crate::MindcareError;

const CRISIS_KEYWORDS: [&str; 7] = ["죽고", "자살", "자해", "끝내고", "죽을", "안 살고", "살기 싫"];
const GREETING_PATTERNS: [&str; 6] = ["안녕", "반가", "하이", "헬로", "좋은 아침", "좋은 저녁"];
const CLOSING_PHRASES: [&str; 4] = ["그만할래", "상담 종료", "이제 나갈게", "수고했어"];
const EMOTION_KEYWORDS: [&str; 14] = [
    "힘들", "우울", "불안", "슬프", "외롭", "짜증", "화나", "스트레스", "무기력", "지쳤", "피곤",
    "걱정", "두렵", "무섭",
];

/// Greetings are only recognized in utterances this short
const GREETING_MAX_CHARS: usize = 10;

/// History messages shown to the model classifier
const CLASSIFIER_HISTORY: usize = 4;

const GREETING_REPLIES: [&str; 3] = [
    "안녕하세요! 오늘 기분은 어떠세요?",
    "반가워요! 무엇이든 편하게 이야기해 주세요.",
    "안녕하세요! 오늘 하루는 어떠셨나요?",
];

const CHITCHAT_REPLIES: [&str; 1] = [
    "저는 심리 상담을 돕는 AI예요. 일상적인 대화보다는 당신의 고민을 듣고 싶어요. 요즘 마음이 힘든 일이 있으신가요?",
];

const CRISIS_REPLIES: [&str; 1] = [
    "지금 많이 힘드시군요. 당신의 이야기를 듣고 있어요.\n\n\
     혼자 감당하기 어려우시다면 전문 상담사와 이야기해 보시길 권해드려요.\n\
     📞 자살예방상담전화: 1393 (24시간)\n\
     📞 정신건강위기상담전화: 1577-0199\n\n\
     전화하기 어려우시면 저와 조금 더 이야기 나눠볼까요?",
];

/// What the user is doing with their latest message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Intent {
    Greeting,
    Chitchat,
    Emotion,
    Question,
    Crisis,
    Closing,
}

impl Intent {
    pub const ALL: [Self; 6] = [
        Self::Greeting,
        Self::Chitchat,
        Self::Emotion,
        Self::Question,
        Self::Crisis,
        Self::Closing,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Greeting => "GREETING",
            Self::Chitchat => "CHITCHAT",
            Self::Emotion => "EMOTION",
            Self::Question => "QUESTION",
            Self::Crisis => "CRISIS",
            Self::Closing => "CLOSING",
        }
    }

    /// Whether the turn runs rewrite, retrieval and generation
    #[must_use]
    pub const fn needs_retrieval(self) -> bool {
        match self {
            Self::Emotion | Self::Question => true,
            Self::Greeting | Self::Chitchat | Self::Crisis | Self::Closing => false,
        }
    }

    /// Canned reply for intents answered without generation
    ///
    /// The pick is a function of the utterance so the same input always gets
    /// the same reply.
    #[must_use]
    pub fn canned_reply(self, utterance: &str) -> Option<&'static str> {
        let replies: &[&'static str] = match self {
            Self::Greeting => &GREETING_REPLIES,
            Self::Chitchat => &CHITCHAT_REPLIES,
            Self::Crisis => &CRISIS_REPLIES,
            Self::Emotion | Self::Question | Self::Closing => return None,
        };
        Some(replies[utterance.chars().count() % replies.len()])
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Intent {
    type Err = MindcareError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        Self::ALL
            .into_iter()
            .find(|intent| intent.as_str() == upper)
            .ok_or_else(|| MindcareError::Custom(format!("unknown intent: {s}")))
    }
}

/// Keyword pass that needs no model call; crisis keywords win over everything
#[must_use]
pub fn quick_classify(utterance: &str) -> Option<Intent> {
    let text = utterance.trim().to_lowercase();

    if CRISIS_KEYWORDS.iter().any(|kw| text.contains(kw)) {
        return Some(Intent::Crisis);
    }
    if text.chars().count() <= GREETING_MAX_CHARS
        && GREETING_PATTERNS.iter().any(|p| text.contains(p))
    {
        return Some(Intent::Greeting);
    }
    if CLOSING_PHRASES.iter().any(|p| text.contains(p)) {
        return Some(Intent::Closing);
    }
    if EMOTION_KEYWORDS.iter().any(|kw| text.contains(kw)) {
        return Some(Intent::Emotion);
    }
    None
}

/// First intent label appearing in free-form model output
#[must_use]
pub fn parse_intent_label(raw: &str) -> Option<Intent> {
    let upper = raw.to_uppercase();
    Intent::ALL
        .into_iter()
        .filter_map(|intent| upper.find(intent.as_str()).map(|pos| (pos, intent)))
        .min_by_key(|(pos, _)| *pos)
        .map(|(_, intent)| intent)
}

/// Classifies utterances: keyword pass first, model second, EMOTION on doubt
pub struct IntentRouter {
    generation: Option<Arc<dyn GenerationService>>,
}

impl IntentRouter {
    pub fn new(generation: Arc<dyn GenerationService>) -> Self {
        Self {
            generation: Some(generation),
        }
    }

    /// Router that never calls a model
    pub fn keyword_only() -> Self {
        Self { generation: None }
    }

    /// Never fails: an unusable model answer falls back to EMOTION
    pub async fn classify(&self, utterance: &str, history: &[Utterance]) -> Intent {
        if let Some(intent) = quick_classify(utterance) {
            debug!("Intent (keyword): {}", intent);
            return intent;
        }

        let Some(generation) = &self.generation else {
            return Intent::Emotion;
        };

        let recent = &history[history.len().saturating_sub(CLASSIFIER_HISTORY)..];
        let history_text = format_history(recent);
        let prompt = CounselingPrompts::intent_classification()
            .render_with(&[("history", history_text.as_str()), ("query", utterance)]);
        let messages = [
            ChatMessage::system(CounselingPrompts::INTENT_SYSTEM),
            ChatMessage::user(prompt),
        ];

        match generation.complete(&messages).await {
            Ok(raw) => match parse_intent_label(&raw) {
                Some(intent) => {
                    debug!("Intent (model): {}", intent);
                    intent
                }
                None => {
                    debug!("Unparsable intent output {:?}, using EMOTION", raw);
                    Intent::Emotion
                }
            },
            Err(e) => {
                warn!("Intent classification failed, using EMOTION: {}", e);
                Intent::Emotion
            }
        }
    }
}
