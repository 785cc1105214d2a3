//! Process-local vector index with exact cosine search

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering as AtomicOrdering;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::cosine_distance;
use super::CorpusRevision;
use super::IndexedPassage;
use super::Neighbor;
use super::PassageFilter;
use super::VectorIndex;
use crate::errors::MindcareError;
use crate::errors::Result;

/// Brute-force index, fine for a few hundred thousand passages
#[derive(Debug, Default)]
pub struct MemoryVectorIndex {
    dimension: Option<usize>,
    passages: RwLock<HashMap<String, IndexedPassage>>,
    writes: AtomicI64,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject vectors whose length differs from `dimension`
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: Some(dimension),
            passages: RwLock::default(),
            writes: AtomicI64::default(),
        }
    }

    fn check_dimension(&self, len: usize) -> Result<()> {
        match self.dimension {
            Some(dimension) if dimension != len => Err(MindcareError::IndexError(format!(
                "vector has {len} dimensions, index expects {dimension}"
            ))),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert(&self, passage: IndexedPassage) -> Result<()> {
        self.check_dimension(passage.vector.len())?;
        let mut passages = self.passages.write().await;
        passages.insert(passage.id.clone(), passage);
        self.writes.fetch_add(1, AtomicOrdering::Relaxed);
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&PassageFilter>,
    ) -> Result<Vec<Neighbor>> {
        self.check_dimension(vector.len())?;

        let passages = self.passages.read().await;
        let mut neighbors: Vec<Neighbor> = passages
            .values()
            .filter(|p| filter.map_or(true, |f| f.matches(&p.metadata)))
            .map(|p| Neighbor {
                distance: cosine_distance(vector, &p.vector),
                passage: p.clone(),
            })
            .collect();

        neighbors.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.passage.id.cmp(&b.passage.id))
        });
        neighbors.truncate(k);
        Ok(neighbors)
    }

    async fn session_turns(
        &self,
        session_id: &str,
        from: i32,
        to: i32,
    ) -> Result<Vec<IndexedPassage>> {
        let passages = self.passages.read().await;
        let mut turns: Vec<IndexedPassage> = passages
            .values()
            .filter(|p| {
                p.metadata.session_id == session_id
                    && (from..=to).contains(&p.metadata.turn_index)
            })
            .cloned()
            .collect();
        turns.sort_by(|a, b| {
            a.metadata
                .turn_index
                .cmp(&b.metadata.turn_index)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(turns)
    }

    async fn scan(&self, filter: Option<&PassageFilter>) -> Result<Vec<IndexedPassage>> {
        let passages = self.passages.read().await;
        let mut all: Vec<IndexedPassage> = passages
            .values()
            .filter(|p| filter.map_or(true, |f| f.matches(&p.metadata)))
            .cloned()
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    async fn contains(&self, id: &str) -> Result<bool> {
        Ok(self.passages.read().await.contains_key(id))
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.passages.read().await.len())
    }

    async fn revision(&self) -> Result<CorpusRevision> {
        let passages = self.passages.read().await;
        Ok(CorpusRevision {
            len: passages.len(),
            stamp: self.writes.load(AtomicOrdering::Relaxed),
        })
    }
}
