use std::fmt;
use std::str::FromStr;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::MindcareError;

/// Who produced an utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl FromStr for Role {
    type Err = MindcareError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            other => Err(MindcareError::Custom(format!("unknown role: {other}"))),
        }
    }
}

/// One recorded message of a session; never edited after it is stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Utterance {
    #[must_use]
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }
}

/// Session lifecycle
///
/// `Active` moves to `Completed` (the user closed the conversation) or to
/// `Referred` (an escalation record exists). A completed session can still be
/// referred, since a late safety signal outranks a closed conversation. A
/// referred session never changes status again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
    Referred,
}

impl SessionStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Referred => "referred",
        }
    }

    /// Whether `self -> next` is an allowed transition (staying put is allowed)
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Active, _)
                | (Self::Completed, Self::Completed | Self::Referred)
                | (Self::Referred, Self::Referred)
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = MindcareError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "referred" => Ok(Self::Referred),
            other => Err(MindcareError::Custom(format!("unknown session status: {other}"))),
        }
    }
}

/// Chat session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub status: SessionStatus,
    pub screening_result: Option<serde_json::Value>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Session {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: SessionStatus::Active,
            screening_result: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }
}

/// How urgent a referral is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Mild,
    Moderate,
    Severe,
    Crisis,
}

impl Severity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mild => "mild",
            Self::Moderate => "moderate",
            Self::Severe => "severe",
            Self::Crisis => "crisis",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = MindcareError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mild" => Ok(Self::Mild),
            "moderate" => Ok(Self::Moderate),
            "severe" => Ok(Self::Severe),
            "crisis" => Ok(Self::Crisis),
            other => Err(MindcareError::Custom(format!("unknown severity: {other}"))),
        }
    }
}

/// Referral of a session to a human professional; at most one per session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub session_id: String,
    pub severity: Severity,
    pub recommended_action: String,
    pub created_at: DateTime<Utc>,
}

/// Named scoring policy of the retriever
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Top-k by vector distance
    Similarity,
    /// Distance blended with turn proximity inside the anchor session
    #[default]
    Contextual,
    /// Weighted mix of similarity and contextual scores
    Hybrid,
    /// BM25 over the passage corpus
    Sparse,
    /// Maximal marginal relevance with a per-source cap
    Diversity,
}

impl Strategy {
    pub const ALL: [Self; 5] = [
        Self::Similarity,
        Self::Contextual,
        Self::Hybrid,
        Self::Sparse,
        Self::Diversity,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Similarity => "similarity",
            Self::Contextual => "contextual",
            Self::Hybrid => "hybrid",
            Self::Sparse => "sparse",
            Self::Diversity => "diversity",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = MindcareError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == s)
            .ok_or_else(|| MindcareError::ConfigError(format!("unknown retrieval strategy: {s}")))
    }
}

/// A passage returned for one query; never persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPassage {
    /// Content-hash id of the indexed passage
    pub passage_id: String,
    pub text: String,
    /// Counseling record the passage belongs to
    pub source_id: String,
    /// Counseling session the passage was taken from
    pub session_id: String,
    /// Cosine distance to the query (for sparse hits: 1 - relevance)
    pub distance: f32,
    /// First-pass score of the strategy, in [0, 1]
    pub relevance: f32,
    /// Cross-encoder score when the re-ranking stage reordered the list
    pub rerank_score: Option<f32>,
    /// 1-based position in the returned list
    pub rank: usize,
    pub strategy: Strategy,
    pub category: Option<String>,
    pub counselor_response: Option<String>,
    pub context_text: Option<String>,
    pub timestamp: DateTime<Utc>,
}
