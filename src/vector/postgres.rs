//! pgvector-backed passage index

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use pgvector::Vector;
use sqlx::PgPool;

use super::CorpusRevision;
use super::IndexedPassage;
use super::Neighbor;
use super::PassageFilter;
use super::PassageMetadata;
use super::VectorIndex;
use crate::errors::Result;

const PASSAGE_COLUMNS: &str = "id, text, embedding, source_id, session_id, turn_index, \
     category, speaker, severity, counselor_response, context_text, created_at";

const FILTER_CLAUSE: &str = "($1::text IS NULL OR category = $1) \
     AND ($2::text IS NULL OR speaker = $2) \
     AND ($3::int IS NULL OR severity >= $3) \
     AND ($4::text IS NULL OR session_id = $4)";

#[derive(Debug, sqlx::FromRow)]
struct PassageRow {
    id: String,
    text: String,
    embedding: Vector,
    source_id: String,
    session_id: String,
    turn_index: i32,
    category: Option<String>,
    speaker: Option<String>,
    severity: i32,
    counselor_response: Option<String>,
    context_text: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct NeighborRow {
    #[sqlx(flatten)]
    passage: PassageRow,
    distance: f64,
}

impl From<PassageRow> for IndexedPassage {
    fn from(row: PassageRow) -> Self {
        Self {
            id: row.id,
            text: row.text,
            vector: row.embedding.to_vec(),
            metadata: PassageMetadata {
                source_id: row.source_id,
                session_id: row.session_id,
                turn_index: row.turn_index,
                category: row.category,
                speaker: row.speaker,
                severity: row.severity,
                counselor_response: row.counselor_response,
                context_text: row.context_text,
                created_at: row.created_at,
            },
        }
    }
}

/// Index stored in the `counseling_passages` table
#[derive(Debug, Clone)]
pub struct PgVectorIndex {
    pool: PgPool,
}

impl PgVectorIndex {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VectorIndex for PgVectorIndex {
    async fn upsert(&self, passage: IndexedPassage) -> Result<()> {
        let meta = passage.metadata;
        sqlx::query(
            r"
            INSERT INTO counseling_passages (
                id, text, embedding, source_id, session_id, turn_index,
                category, speaker, severity, counselor_response, context_text, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO UPDATE SET
                text = EXCLUDED.text,
                embedding = EXCLUDED.embedding,
                source_id = EXCLUDED.source_id,
                session_id = EXCLUDED.session_id,
                turn_index = EXCLUDED.turn_index,
                category = EXCLUDED.category,
                speaker = EXCLUDED.speaker,
                severity = EXCLUDED.severity,
                counselor_response = EXCLUDED.counselor_response,
                context_text = EXCLUDED.context_text,
                created_at = EXCLUDED.created_at,
                updated_at = NOW()
            ",
        )
        .bind(passage.id)
        .bind(passage.text)
        .bind(Vector::from(passage.vector))
        .bind(meta.source_id)
        .bind(meta.session_id)
        .bind(meta.turn_index)
        .bind(meta.category)
        .bind(meta.speaker)
        .bind(meta.severity)
        .bind(meta.counselor_response)
        .bind(meta.context_text)
        .bind(meta.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&PassageFilter>,
    ) -> Result<Vec<Neighbor>> {
        let filter = filter.cloned().unwrap_or_default();
        let sql = format!(
            "SELECT {PASSAGE_COLUMNS}, (embedding <=> $5) AS distance \
             FROM counseling_passages \
             WHERE {FILTER_CLAUSE} \
             ORDER BY embedding <=> $5, id \
             LIMIT $6"
        );

        let rows = sqlx::query_as::<_, NeighborRow>(&sql)
            .bind(filter.category)
            .bind(filter.speaker)
            .bind(filter.min_severity)
            .bind(filter.session_id)
            .bind(Vector::from(vector.to_vec()))
            .bind(i64::try_from(k).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| Neighbor {
                distance: row.distance as f32,
                passage: row.passage.into(),
            })
            .collect())
    }

    async fn session_turns(
        &self,
        session_id: &str,
        from: i32,
        to: i32,
    ) -> Result<Vec<IndexedPassage>> {
        let sql = format!(
            "SELECT {PASSAGE_COLUMNS} FROM counseling_passages \
             WHERE session_id = $1 AND turn_index BETWEEN $2 AND $3 \
             ORDER BY turn_index, id"
        );
        let rows = sqlx::query_as::<_, PassageRow>(&sql)
            .bind(session_id)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn scan(&self, filter: Option<&PassageFilter>) -> Result<Vec<IndexedPassage>> {
        let filter = filter.cloned().unwrap_or_default();
        let sql = format!(
            "SELECT {PASSAGE_COLUMNS} FROM counseling_passages WHERE {FILTER_CLAUSE} ORDER BY id"
        );
        let rows = sqlx::query_as::<_, PassageRow>(&sql)
            .bind(filter.category)
            .bind(filter.speaker)
            .bind(filter.min_severity)
            .bind(filter.session_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn contains(&self, id: &str) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM counseling_passages WHERE id = $1)")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn len(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM counseling_passages")
            .fetch_one(&self.pool)
            .await?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    async fn revision(&self) -> Result<CorpusRevision> {
        let (count, stamp): (i64, i64) = sqlx::query_as(
            r"
            SELECT COUNT(*),
                   COALESCE((EXTRACT(EPOCH FROM MAX(updated_at)) * 1000000)::bigint, 0)
            FROM counseling_passages
            ",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(CorpusRevision {
            len: usize::try_from(count).unwrap_or_default(),
            stamp,
        })
    }
}
