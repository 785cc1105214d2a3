//! Nearest-neighbour store over embedded counseling passages

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

pub use self::memory::MemoryVectorIndex;
pub use self::postgres::PgVectorIndex;
use crate::errors::Result;

/// Metadata stored next to every passage vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassageMetadata {
    pub source_id: String,
    /// Counseling session the passage was transcribed from
    pub session_id: String,
    /// Position of the utterance inside its session
    pub turn_index: i32,
    pub category: Option<String>,
    pub speaker: Option<String>,
    /// Clinical severity label of the source record, 0 when unknown
    pub severity: i32,
    pub counselor_response: Option<String>,
    pub context_text: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedPassage {
    pub id: String,
    pub text: String,
    pub vector: Vec<f32>,
    pub metadata: PassageMetadata,
}

/// Change marker for caches built over the whole corpus
///
/// Two equal revisions mean no passage was inserted, replaced or removed in
/// between. `stamp` is backend specific and only compared for equality.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorpusRevision {
    pub len: usize,
    pub stamp: i64,
}

/// Query result: a passage and its cosine distance to the query vector
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub passage: IndexedPassage,
    pub distance: f32,
}

/// Metadata restrictions applied before ranking
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassageFilter {
    pub category: Option<String>,
    pub speaker: Option<String>,
    pub min_severity: Option<i32>,
    pub session_id: Option<String>,
}

impl PassageFilter {
    /// Restrict to one origin session
    #[must_use]
    pub fn for_session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Self::default()
        }
    }

    /// Combine with another filter; `other` wins where both are set
    #[must_use]
    pub fn merged(&self, other: &Self) -> Self {
        Self {
            category: other.category.clone().or_else(|| self.category.clone()),
            speaker: other.speaker.clone().or_else(|| self.speaker.clone()),
            min_severity: other.min_severity.or(self.min_severity),
            session_id: other.session_id.clone().or_else(|| self.session_id.clone()),
        }
    }

    #[must_use]
    pub fn matches(&self, metadata: &PassageMetadata) -> bool {
        if let Some(category) = &self.category {
            if metadata.category.as_deref() != Some(category.as_str()) {
                return false;
            }
        }
        if let Some(speaker) = &self.speaker {
            if metadata.speaker.as_deref() != Some(speaker.as_str()) {
                return false;
            }
        }
        if let Some(min) = self.min_severity {
            if metadata.severity < min {
                return false;
            }
        }
        if let Some(session_id) = &self.session_id {
            if &metadata.session_id != session_id {
                return false;
            }
        }
        true
    }
}

/// Storage and nearest-neighbour search for passage vectors
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace a passage by id
    async fn upsert(&self, passage: IndexedPassage) -> Result<()>;

    /// The `k` nearest passages by cosine distance, closest first
    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&PassageFilter>,
    ) -> Result<Vec<Neighbor>>;

    /// Passages of one origin session with `from <= turn_index <= to`
    async fn session_turns(&self, session_id: &str, from: i32, to: i32)
        -> Result<Vec<IndexedPassage>>;

    /// Every passage matching the filter, for corpus-wide scoring
    async fn scan(&self, filter: Option<&PassageFilter>) -> Result<Vec<IndexedPassage>>;

    async fn contains(&self, id: &str) -> Result<bool>;

    async fn len(&self) -> Result<usize>;

    async fn revision(&self) -> Result<CorpusRevision>;
}

/// Cosine similarity in [-1, 1]; 0 when either vector has no length
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

/// Cosine distance in [0, 2], the same measure as pgvector's `<=>`
#[must_use]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}
