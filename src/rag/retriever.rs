//! Multi-strategy passage retrieval over the vector index
//!
//! Every strategy is a scoring policy over the same nearest-neighbour
//! primitive. After scoring, results go through the same tail:
//!
//! 1. drop candidates whose query relevance is below `min_relevance`
//! 2. order by strategy score, then newer origin, then source id
//! 3. optional cross-encoder pass when the top of the pool is ambiguous
//! 4. truncate to `k` and number ranks from 1
//!
//! An unreachable embedding service or index never surfaces as an error: the
//! caller gets an empty list with `degraded` set and answers from history.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::debug;
use tracing::warn;

use crate::config::default_embedding_timeout_ms;
use crate::config::RetrievalConfig;
use crate::embeddings::EmbeddingService;
use crate::errors::MindcareError;
use crate::errors::Result;
use crate::models::RetrievedPassage;
use crate::models::Strategy;
use crate::rag::rerank::is_ambiguous;
use crate::rag::rerank::CrossEncoder;
use crate::rag::sparse::normalize_score;
use crate::rag::sparse::Bm25Index;
use crate::vector::cosine_distance;
use crate::vector::cosine_similarity;
use crate::vector::CorpusRevision;
use crate::vector::IndexedPassage;
use crate::vector::PassageFilter;
use crate::vector::VectorIndex;

/// Extra contextual score for a session that several seeds come from
const CONTINUITY_BONUS: f32 = 0.05;

/// Result of one retrieval call
#[derive(Debug, Clone, Default)]
pub struct RetrievalOutcome {
    pub passages: Vec<RetrievedPassage>,
    /// Set when the embedding service or index failed or timed out
    pub degraded: bool,
}

impl RetrievalOutcome {
    fn degraded() -> Self {
        Self {
            passages: Vec::new(),
            degraded: true,
        }
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    passage: IndexedPassage,
    distance: f32,
    /// Relevance to the query alone, the value `min_relevance` gates on
    query_relevance: f32,
    /// Strategy score used for ordering
    relevance: f32,
}

impl Candidate {
    fn dense(passage: IndexedPassage, distance: f32) -> Self {
        let query_relevance = (1.0 - distance).clamp(0.0, 1.0);
        Self {
            query_relevance,
            relevance: query_relevance,
            passage,
            distance,
        }
    }
}

fn first_pass_order(a: &Candidate, b: &Candidate) -> Ordering {
    b.relevance
        .total_cmp(&a.relevance)
        .then_with(|| b.passage.metadata.created_at.cmp(&a.passage.metadata.created_at))
        .then_with(|| a.passage.metadata.source_id.cmp(&b.passage.metadata.source_id))
        .then_with(|| a.passage.id.cmp(&b.passage.id))
}

/// Cached BM25 corpus, rebuilt when the index revision changes
struct SparseCorpus {
    revision: CorpusRevision,
    passages: Vec<IndexedPassage>,
    index: Bm25Index,
}

pub struct Retriever {
    embeddings: Arc<dyn EmbeddingService>,
    index: Arc<dyn VectorIndex>,
    reranker: Option<Arc<dyn CrossEncoder>>,
    config: RetrievalConfig,
    embed_timeout: Duration,
    sparse: RwLock<Option<SparseCorpus>>,
}

impl Retriever {
    pub fn new(
        embeddings: Arc<dyn EmbeddingService>,
        index: Arc<dyn VectorIndex>,
        config: RetrievalConfig,
        reranker: Option<Arc<dyn CrossEncoder>>,
    ) -> Self {
        Self {
            embeddings,
            index,
            reranker,
            config,
            embed_timeout: Duration::from_millis(default_embedding_timeout_ms()),
            sparse: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn with_embed_timeout(mut self, timeout: Duration) -> Self {
        self.embed_timeout = timeout;
        self
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    fn index_timeout(&self) -> Duration {
        Duration::from_millis(self.config.index_timeout_ms)
    }

    /// Ordered passages for `query`, at most `k`
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        strategy: Strategy,
        filter: Option<&PassageFilter>,
    ) -> RetrievalOutcome {
        if k == 0 || query.trim().is_empty() {
            return RetrievalOutcome::default();
        }

        match self.run(query, k, strategy, filter).await {
            Ok(passages) => {
                debug!(
                    "Retrieved {} passages with {} strategy",
                    passages.len(),
                    strategy
                );
                RetrievalOutcome {
                    passages,
                    degraded: false,
                }
            }
            Err(e) => {
                warn!("Retrieval degraded to history-only: {}", e);
                RetrievalOutcome::degraded()
            }
        }
    }

    async fn run(
        &self,
        query: &str,
        k: usize,
        strategy: Strategy,
        filter: Option<&PassageFilter>,
    ) -> Result<Vec<RetrievedPassage>> {
        let pool_size = self.pool_size(k);

        let ordered = match strategy {
            Strategy::Sparse => {
                let candidates = self.sparse_candidates(query, filter).await?;
                self.threshold_and_sort(candidates)
            }
            Strategy::Similarity => {
                let vector = self.embed(query).await?;
                let candidates = self.similarity_candidates(&vector, pool_size, filter).await?;
                self.threshold_and_sort(candidates)
            }
            Strategy::Contextual => {
                let vector = self.embed(query).await?;
                let seeds = self
                    .similarity_candidates(&vector, self.config.seed_k, filter)
                    .await?;
                let candidates = self.contextual_candidates(&vector, seeds, filter).await?;
                self.threshold_and_sort(candidates)
            }
            Strategy::Hybrid => {
                let vector = self.embed(query).await?;
                let candidates = self.hybrid_candidates(&vector, pool_size, filter).await?;
                self.threshold_and_sort(candidates)
            }
            Strategy::Diversity => {
                let vector = self.embed(query).await?;
                let pool = self
                    .similarity_candidates(&vector, self.config.fetch_k.max(k), filter)
                    .await?;
                let pool = self.threshold_and_sort(pool);
                mmr_select(
                    pool,
                    k,
                    self.config.mmr_lambda,
                    self.config.max_per_source,
                )
            }
        };

        let ordered = self.rerank(query, ordered, pool_size).await;
        Ok(finalize(ordered, k, strategy))
    }

    fn pool_size(&self, k: usize) -> usize {
        if self.config.rerank.enabled && self.reranker.is_some() {
            k.max(self.config.rerank.top_n)
        } else {
            k
        }
    }

    async fn embed(&self, query: &str) -> Result<Vec<f32>> {
        bounded(self.embed_timeout, "embedding", self.embeddings.embed(query)).await
    }

    async fn similarity_candidates(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&PassageFilter>,
    ) -> Result<Vec<Candidate>> {
        let neighbors = bounded(
            self.index_timeout(),
            "index query",
            self.index.query(vector, k, filter),
        )
        .await?;
        Ok(neighbors
            .into_iter()
            .map(|n| Candidate::dense(n.passage, n.distance))
            .collect())
    }

    /// Seeds plus the turns around the best seed, scored by proximity
    ///
    /// The anchor is the best seed's origin session and turn. Each candidate
    /// blends dense relevance with `1 / (1 + turn distance)` to the anchor,
    /// plus a small bonus for sessions that several seeds agree on.
    async fn contextual_candidates(
        &self,
        vector: &[f32],
        seeds: Vec<Candidate>,
        filter: Option<&PassageFilter>,
    ) -> Result<Vec<Candidate>> {
        let Some(anchor) = seeds.iter().min_by(|a, b| first_pass_order(a, b)) else {
            return Ok(Vec::new());
        };
        let anchor_session = anchor.passage.metadata.session_id.clone();
        let anchor_turn = anchor.passage.metadata.turn_index;

        let mut session_votes: HashMap<String, usize> = HashMap::new();
        for seed in &seeds {
            *session_votes
                .entry(seed.passage.metadata.session_id.clone())
                .or_insert(0) += 1;
        }
        let seed_count = seeds.len() as f32;

        let window = i32::try_from(self.config.window).unwrap_or(i32::MAX);
        let neighbours = bounded(
            self.index_timeout(),
            "session turns",
            self.index.session_turns(
                &anchor_session,
                anchor_turn.saturating_sub(window),
                anchor_turn.saturating_add(window),
            ),
        )
        .await?;

        let mut pool: Vec<Candidate> = seeds;
        let mut seen: HashSet<String> = pool.iter().map(|c| c.passage.id.clone()).collect();
        for passage in neighbours {
            if !filter.map_or(true, |f| f.matches(&passage.metadata)) {
                continue;
            }
            if seen.insert(passage.id.clone()) {
                let distance = cosine_distance(vector, &passage.vector);
                pool.push(Candidate::dense(passage, distance));
            }
        }

        let weight = self.config.contextual_weight;
        for candidate in &mut pool {
            let meta = &candidate.passage.metadata;
            let proximity = if meta.session_id == anchor_session {
                let gap = (i64::from(meta.turn_index) - i64::from(anchor_turn)).unsigned_abs();
                1.0 / (1.0 + gap as f32)
            } else {
                0.0
            };
            let votes = session_votes.get(&meta.session_id).copied().unwrap_or(0) as f32;
            let continuity = if votes > 1.0 {
                CONTINUITY_BONUS * votes / seed_count
            } else {
                0.0
            };
            candidate.relevance = ((1.0 - weight) * candidate.query_relevance
                + weight * proximity
                + continuity)
                .clamp(0.0, 1.0);
        }
        Ok(pool)
    }

    /// `alpha * similarity + (1 - alpha) * contextual` over the union of both pools
    async fn hybrid_candidates(
        &self,
        vector: &[f32],
        pool_size: usize,
        filter: Option<&PassageFilter>,
    ) -> Result<Vec<Candidate>> {
        let dense = self
            .similarity_candidates(vector, pool_size.max(self.config.seed_k), filter)
            .await?;
        let mut seeds = dense.clone();
        seeds.sort_by(first_pass_order);
        seeds.truncate(self.config.seed_k);

        let contextual = self.contextual_candidates(vector, seeds, filter).await?;
        let mut contextual_scores: HashMap<String, f32> = contextual
            .iter()
            .map(|c| (c.passage.id.clone(), c.relevance))
            .collect();

        let mut pool: Vec<Candidate> = dense;
        let mut seen: HashSet<String> = pool.iter().map(|c| c.passage.id.clone()).collect();
        for candidate in contextual {
            if seen.insert(candidate.passage.id.clone()) {
                pool.push(candidate);
            }
        }

        let alpha = self.config.hybrid_alpha;
        for candidate in &mut pool {
            let contextual = contextual_scores
                .remove(&candidate.passage.id)
                .unwrap_or(0.0);
            candidate.relevance = alpha * candidate.query_relevance + (1.0 - alpha) * contextual;
        }
        Ok(pool)
    }

    async fn sparse_candidates(
        &self,
        query: &str,
        filter: Option<&PassageFilter>,
    ) -> Result<Vec<Candidate>> {
        self.refresh_sparse().await?;

        let guard = self.sparse.read().await;
        let Some(corpus) = guard.as_ref() else {
            return Ok(Vec::new());
        };

        let saturation = self.config.sparse_saturation;
        Ok(corpus
            .index
            .search(query)
            .into_iter()
            .filter_map(|(doc, score)| {
                let passage = corpus.passages.get(doc)?;
                if !filter.map_or(true, |f| f.matches(&passage.metadata)) {
                    return None;
                }
                let relevance = normalize_score(score, saturation);
                Some(Candidate {
                    passage: passage.clone(),
                    distance: 1.0 - relevance,
                    query_relevance: relevance,
                    relevance,
                })
            })
            .collect())
    }

    async fn refresh_sparse(&self) -> Result<()> {
        let revision = bounded(self.index_timeout(), "index revision", self.index.revision()).await?;
        if let Some(corpus) = self.sparse.read().await.as_ref() {
            if corpus.revision == revision {
                return Ok(());
            }
        }

        let mut passages = bounded(self.index_timeout(), "corpus scan", self.index.scan(None)).await?;
        passages.sort_by(|a, b| a.id.cmp(&b.id));
        let index = Bm25Index::build(passages.iter().map(|p| p.text.as_str()));
        debug!("Built sparse index over {} passages", passages.len());

        *self.sparse.write().await = Some(SparseCorpus {
            revision,
            passages,
            index,
        });
        Ok(())
    }

    /// Gate on query relevance, then order by strategy score
    fn threshold_and_sort(&self, candidates: Vec<Candidate>) -> Vec<Candidate> {
        let mut seen = HashSet::new();
        let mut kept: Vec<Candidate> = candidates
            .into_iter()
            .filter(|c| c.query_relevance >= self.config.min_relevance)
            .filter(|c| seen.insert(c.passage.id.clone()))
            .collect();
        kept.sort_by(first_pass_order);
        kept
    }

    /// Reorder the head of the list by cross-encoder score if it is ambiguous
    ///
    /// Failures and timeouts keep the first-pass order.
    async fn rerank(
        &self,
        query: &str,
        ordered: Vec<Candidate>,
        pool_size: usize,
    ) -> Vec<Reranked> {
        let Some(reranker) = self.reranker.as_ref().filter(|_| self.config.rerank.enabled) else {
            return unscored(ordered);
        };
        let head: Vec<f32> = ordered.iter().map(|c| c.relevance).collect();
        if !is_ambiguous(&head, self.config.rerank.ambiguity_gap) {
            return unscored(ordered);
        }

        let mut ordered = ordered;
        let tail = ordered.split_off(ordered.len().min(pool_size));
        let texts: Vec<String> = ordered.iter().map(|c| c.passage.text.clone()).collect();
        let timeout = Duration::from_millis(self.config.rerank.timeout_ms);

        let scores = match bounded(timeout, "rerank", reranker.score(query, &texts)).await {
            Ok(scores) if scores.len() == ordered.len() => scores,
            Ok(scores) => {
                warn!(
                    "Re-ranker returned {} scores for {} passages, keeping first-pass order",
                    scores.len(),
                    ordered.len()
                );
                ordered.extend(tail);
                return unscored(ordered);
            }
            Err(e) => {
                warn!("Re-ranking skipped: {}", e);
                ordered.extend(tail);
                return unscored(ordered);
            }
        };

        let mut head: Vec<Reranked> = ordered.into_iter().zip(scores).map(|(c, s)| (c, Some(s))).collect();
        // Stable sort keeps first-pass order between equal cross scores
        head.sort_by(|a, b| {
            let (sa, sb) = (a.1.unwrap_or(0.0), b.1.unwrap_or(0.0));
            sb.total_cmp(&sa)
        });
        head.extend(tail.into_iter().map(|c| (c, None)));
        head
    }
}

type Reranked = (Candidate, Option<f32>);

fn unscored(ordered: Vec<Candidate>) -> Vec<Reranked> {
    ordered.into_iter().map(|c| (c, None)).collect()
}

async fn bounded<T, F>(timeout: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(MindcareError::IndexError(format!(
            "{what} timed out after {} ms",
            timeout.as_millis()
        ))),
    }
}

/// Greedy maximal marginal relevance with a per-source cap
///
/// `pool` must be sorted best first. Each step picks the candidate maximising
/// `lambda * relevance - (1 - lambda) * max similarity to the picked set`,
/// skipping sources that already hold `max_per_source` picks.
fn mmr_select(
    pool: Vec<Candidate>,
    k: usize,
    lambda: f32,
    max_per_source: usize,
) -> Vec<Candidate> {
    let lambda = lambda.clamp(0.0, 1.0);
    let mut remaining = pool;
    let mut selected: Vec<Candidate> = Vec::with_capacity(k);
    let mut per_source: HashMap<String, usize> = HashMap::new();

    while selected.len() < k {
        let mut best: Option<(usize, f32)> = None;
        for (idx, candidate) in remaining.iter().enumerate() {
            let used = per_source
                .get(&candidate.passage.metadata.source_id)
                .copied()
                .unwrap_or(0);
            if used >= max_per_source {
                continue;
            }
            let redundancy = selected
                .iter()
                .map(|s| cosine_similarity(&candidate.passage.vector, &s.passage.vector))
                .fold(0.0f32, f32::max);
            let mmr = lambda * candidate.relevance - (1.0 - lambda) * redundancy;
            if best.map_or(true, |(_, score)| mmr > score) {
                best = Some((idx, mmr));
            }
        }

        let Some((idx, _)) = best else {
            break;
        };
        let picked = remaining.remove(idx);
        *per_source
            .entry(picked.passage.metadata.source_id.clone())
            .or_insert(0) += 1;
        selected.push(picked);
    }
    selected
}

fn finalize(ordered: Vec<Reranked>, k: usize, strategy: Strategy) -> Vec<RetrievedPassage> {
    ordered
        .into_iter()
        .take(k)
        .enumerate()
        .map(|(i, (candidate, rerank_score))| {
            let IndexedPassage { id, text, metadata, .. } = candidate.passage;
            RetrievedPassage {
                passage_id: id,
                text,
                source_id: metadata.source_id,
                session_id: metadata.session_id,
                distance: candidate.distance,
                relevance: candidate.relevance,
                rerank_score,
                rank: i + 1,
                strategy,
                category: metadata.category,
                counselor_response: metadata.counselor_response,
                context_text: metadata.context_text,
                timestamp: metadata.created_at,
            }
        })
        .collect()
}
