use thiserror::Error;

#[derive(Error, Debug)]
pub enum MindcareError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Invalid session transition for {session_id}: {from} -> {to}")]
    InvalidTransition {
        session_id: String,
        from: String,
        to: String,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Embedding error: {0}")]
    EmbeddingError(String),

    #[error("Vector index error: {0}")]
    IndexError(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Generation timed out after {0} ms")]
    GenerationTimeout(u64),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("Parse error: {0}")]
    ParseError(#[from] std::num::ParseIntError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Custom(String),
}

impl MindcareError {
    /// Whether retrying the same call may succeed.
    ///
    /// Used by the escalation writer: connection drops and timeouts are worth
    /// another attempt, a malformed row is not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database(e) => matches!(
                e,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            Self::DatabaseError(_) | Self::HttpError(_) | Self::GenerationTimeout(_) => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Io(_) => true,
            _ => false,
        }
    }

    /// Short message that is safe to show to the end user.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::GenerationTimeout(_) | Self::LlmError(_) | Self::Http(_) | Self::HttpError(_) => {
                "죄송합니다. 지금은 답변을 생성할 수 없습니다. 잠시 후 다시 시도해 주세요."
            }
            Self::Cancelled => "요청이 취소되었습니다.",
            _ => "죄송합니다. 처리 중 오류가 발생했습니다.",
        }
    }
}

pub type Result<T> = std::result::Result<T, MindcareError>;
