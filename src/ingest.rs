//! Loading counseling passages from JSONL into the vector index

use std::path::Path;
use std::sync::Arc;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use sha2::Digest;
use sha2::Sha256;
use tracing::info;
use tracing::warn;

use crate::embeddings::preprocess_text_for_embedding;
use crate::embeddings::EmbeddingService;
use crate::embeddings::MAX_BATCH_SIZE;
use crate::errors::Result;
use crate::vector::IndexedPassage;
use crate::vector::PassageMetadata;
use crate::vector::VectorIndex;

/// One line of a corpus file
#[derive(Debug, Clone, Deserialize)]
pub struct CorpusRecord {
    pub text: String,
    pub session_id: String,
    #[serde(default)]
    pub turn_index: i32,
    /// Counseling record id; the origin session when absent
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub speaker: Option<String>,
    #[serde(default)]
    pub severity: i32,
    #[serde(default)]
    pub counselor_response: Option<String>,
    #[serde(default)]
    pub context_text: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl CorpusRecord {
    /// Stable id derived from origin and content, so re-ingesting is a no-op
    #[must_use]
    pub fn passage_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.session_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.turn_index.to_le_bytes());
        hasher.update([0u8]);
        hasher.update(self.text.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn into_passage(self, id: String, vector: Vec<f32>) -> IndexedPassage {
        IndexedPassage {
            id,
            metadata: PassageMetadata {
                source_id: self.source_id.unwrap_or_else(|| self.session_id.clone()),
                session_id: self.session_id,
                turn_index: self.turn_index,
                category: self.category,
                speaker: self.speaker,
                severity: self.severity,
                counselor_response: self.counselor_response,
                context_text: self.context_text,
                created_at: self.created_at.unwrap_or_else(Utc::now),
            },
            text: self.text,
            vector,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub total: usize,
    pub indexed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Parse JSONL; blank lines are ignored, malformed lines counted and logged
pub fn parse_jsonl(content: &str) -> (Vec<CorpusRecord>, usize) {
    let mut records = Vec::new();
    let mut invalid = 0;
    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<CorpusRecord>(line) {
            Ok(record) if !record.text.trim().is_empty() => records.push(record),
            Ok(_) => {
                warn!("Line {}: empty text, skipped", line_no + 1);
                invalid += 1;
            }
            Err(e) => {
                warn!("Line {}: {}", line_no + 1, e);
                invalid += 1;
            }
        }
    }
    (records, invalid)
}

pub async fn ingest_file(
    path: &Path,
    embeddings: Arc<dyn EmbeddingService>,
    index: Arc<dyn VectorIndex>,
) -> Result<IngestStats> {
    let content = tokio::fs::read_to_string(path).await?;
    let (records, invalid) = parse_jsonl(&content);
    info!("Read {} passages from {}", records.len(), path.display());

    let mut stats = ingest_records(records, embeddings, index).await?;
    stats.total += invalid;
    stats.failed += invalid;
    Ok(stats)
}

/// Embed and upsert records in batches; passages already indexed are skipped
pub async fn ingest_records(
    records: Vec<CorpusRecord>,
    embeddings: Arc<dyn EmbeddingService>,
    index: Arc<dyn VectorIndex>,
) -> Result<IngestStats> {
    let mut stats = IngestStats {
        total: records.len(),
        ..IngestStats::default()
    };

    let mut pending: Vec<(String, CorpusRecord)> = Vec::new();
    for record in records {
        let id = record.passage_id();
        if index.contains(&id).await? || pending.iter().any(|(p, _)| *p == id) {
            stats.skipped += 1;
        } else {
            pending.push((id, record));
        }
    }

    let batches = pending.len().div_ceil(MAX_BATCH_SIZE);
    let mut remaining = pending.into_iter();
    for batch_idx in 0..batches {
        let batch: Vec<(String, CorpusRecord)> = remaining.by_ref().take(MAX_BATCH_SIZE).collect();
        info!(
            "Embedding batch {}/{} ({} passages)",
            batch_idx + 1,
            batches,
            batch.len()
        );

        let texts: Vec<String> = batch
            .iter()
            .map(|(_, r)| preprocess_text_for_embedding(&r.text))
            .collect::<Result<_>>()?;

        let vectors = match embeddings.embed_batch(&texts).await {
            Ok(vectors) => vectors,
            Err(e) => {
                warn!("Embedding batch {} failed: {}", batch_idx + 1, e);
                stats.failed += batch.len();
                continue;
            }
        };

        for ((id, record), vector) in batch.into_iter().zip(vectors) {
            match index.upsert(record.into_passage(id.clone(), vector)).await {
                Ok(()) => stats.indexed += 1,
                Err(e) => {
                    warn!("Failed to index passage {}: {}", id, e);
                    stats.failed += 1;
                }
            }
        }
    }

    info!(
        "Ingest complete: {} indexed, {} skipped, {} failed",
        stats.indexed, stats.skipped, stats.failed
    );
    Ok(stats)
}
