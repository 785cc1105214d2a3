//! Second-pass scoring over full query/passage pairs

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::config::RerankConfig;
use crate::errors::MindcareError;
use crate::errors::Result;

/// Scores `(query, passage)` pairs; higher is more relevant
#[async_trait]
pub trait CrossEncoder: Send + Sync {
    /// One score per passage, same order as `passages`
    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>>;
}

/// Whether the first-pass pool is too close to call
///
/// `scores` must be sorted best first. A single candidate is never ambiguous.
#[must_use]
pub fn is_ambiguous(scores: &[f32], gap: f32) -> bool {
    match scores {
        [first, second, ..] => (first - second).abs() <= gap,
        _ => false,
    }
}

fn char_bigrams(text: &str) -> HashSet<(char, char)> {
    let chars: Vec<char> = text
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect();
    chars.windows(2).map(|w| (w[0], w[1])).collect()
}

/// Dice coefficient over character bigrams
///
/// Works without a model and copes with Korean inflection, where whole-word
/// overlap misses `불안해요` vs `불안했어요`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LexicalCrossEncoder;

impl LexicalCrossEncoder {
    #[must_use]
    pub fn pair_score(query: &str, passage: &str) -> f32 {
        let q = char_bigrams(query);
        let p = char_bigrams(passage);
        if q.is_empty() || p.is_empty() {
            return 0.0;
        }
        let shared = q.intersection(&p).count() as f32;
        2.0 * shared / (q.len() + p.len()) as f32
    }
}

#[async_trait]
impl CrossEncoder for LexicalCrossEncoder {
    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>> {
        Ok(passages
            .iter()
            .map(|p| Self::pair_score(query, p))
            .collect())
    }
}

/// Client for a `/rerank` endpoint (text-embeddings-inference, Cohere, Jina)
pub struct HttpCrossEncoder {
    client: Client,
    endpoint: String,
}

impl HttpCrossEncoder {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MindcareError::HttpError(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn from_config(config: &RerankConfig) -> Result<Option<Self>> {
        config
            .endpoint
            .as_ref()
            .map(|endpoint| Self::new(endpoint.clone(), Duration::from_millis(config.timeout_ms)))
            .transpose()
    }
}

#[async_trait]
impl CrossEncoder for HttpCrossEncoder {
    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "query": query,
            "texts": passages,
            "documents": passages,
        });
        debug!("Re-ranking {} passages via {}", passages.len(), self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| MindcareError::HttpError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(MindcareError::HttpError(format!("rerank error ({status}): {text}")));
        }

        let json: Value = response.json().await?;
        parse_rerank_response(&json, passages.len())
    }
}

/// Align `[{index, score}]` style results to input order
///
/// Accepts a bare array (TEI) or an object with `results`/`data` (Cohere,
/// Jina), and `score` or `relevance_score` per item. Missing entries score 0.
pub fn parse_rerank_response(json: &Value, doc_count: usize) -> Result<Vec<f32>> {
    let results = json
        .as_array()
        .or_else(|| json.get("results").and_then(Value::as_array))
        .or_else(|| json.get("data").and_then(Value::as_array))
        .ok_or_else(|| MindcareError::HttpError("rerank response has no results".to_string()))?;

    let mut scores = vec![0.0f32; doc_count];
    for item in results {
        let index = item
            .get("index")
            .and_then(Value::as_u64)
            .ok_or_else(|| MindcareError::HttpError("rerank result missing index".to_string()))?
            as usize;
        let score = item
            .get("relevance_score")
            .or_else(|| item.get("score"))
            .and_then(Value::as_f64)
            .ok_or_else(|| MindcareError::HttpError("rerank result missing score".to_string()))?
            as f32;
        if let Some(slot) = scores.get_mut(index) {
            *slot = score;
        }
    }
    Ok(scores)
}
