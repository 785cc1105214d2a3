//! Wiring of the configured collaborators into a ready pipeline
//!
//! The storage backend decides where sessions and passages live:
//! - `memory`: process-local maps, nothing survives a restart
//! - `postgres`: `database.url`, schema must exist (`mindcare init-db`)

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::AppConfig;
use crate::config::StorageBackend;
use crate::database::ConversationStore;
use crate::database::Database;
use crate::database::MemoryStore;
use crate::embeddings::EmbeddingClient;
use crate::embeddings::EmbeddingService;
use crate::llm::GenerationService;
use crate::llm::LlmService;
use crate::rag::CounselingPipeline;
use crate::rag::CrossEncoder;
use crate::rag::HttpCrossEncoder;
use crate::rag::LexicalCrossEncoder;
use crate::rag::Retriever;
use crate::session::SessionManager;
use crate::vector::MemoryVectorIndex;
use crate::vector::PgVectorIndex;
use crate::vector::VectorIndex;
use crate::Result;

/// Shared handles to every collaborator of the pipeline
#[derive(Clone)]
pub struct Services {
    pub pipeline: Arc<CounselingPipeline>,
    pub sessions: Arc<SessionManager>,
    pub index: Arc<dyn VectorIndex>,
    pub embeddings: Arc<dyn EmbeddingService>,
    /// Present for the postgres backend
    pub database: Option<Database>,
}

impl Services {
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        config.validate()?;

        let (store, index, database): (Arc<dyn ConversationStore>, Arc<dyn VectorIndex>, Option<Database>) =
            match config.storage.backend {
                StorageBackend::Memory => {
                    info!("Using in-memory storage; sessions and passages are not persisted");
                    (
                        Arc::new(MemoryStore::new()),
                        Arc::new(MemoryVectorIndex::with_dimension(config.embedding_dimension())),
                        None,
                    )
                }
                StorageBackend::Postgres => {
                    let database = Database::from_config(config).await?;
                    database.verify_schema_or_error().await?;
                    info!("Connected to PostgreSQL");
                    (
                        Arc::new(database.clone()),
                        Arc::new(PgVectorIndex::new(database.pool().clone())),
                        Some(database),
                    )
                }
            };

        let embeddings: Arc<dyn EmbeddingService> = Arc::new(EmbeddingClient::from_app_config(config)?);
        let generation: Arc<dyn GenerationService> = Arc::new(LlmService::new(config)?);
        Ok(Self::assemble(config, store, index, embeddings, generation, database))
    }

    /// Build from already constructed collaborators
    pub fn assemble(
        config: &AppConfig,
        store: Arc<dyn ConversationStore>,
        index: Arc<dyn VectorIndex>,
        embeddings: Arc<dyn EmbeddingService>,
        generation: Arc<dyn GenerationService>,
        database: Option<Database>,
    ) -> Self {
        let sessions = Arc::new(SessionManager::new(store, &config.safety));
        let retriever = Retriever::new(
            Arc::clone(&embeddings),
            Arc::clone(&index),
            config.retrieval.clone(),
            reranker(config),
        )
        .with_embed_timeout(Duration::from_millis(config.embeddings.timeout_ms));
        let pipeline = Arc::new(CounselingPipeline::new(
            config,
            Arc::clone(&sessions),
            generation,
            retriever,
        ));

        Self {
            pipeline,
            sessions,
            index,
            embeddings,
            database,
        }
    }
}

fn reranker(config: &AppConfig) -> Option<Arc<dyn CrossEncoder>> {
    let rerank = &config.retrieval.rerank;
    if !rerank.enabled {
        return None;
    }
    match HttpCrossEncoder::from_config(rerank) {
        Ok(Some(encoder)) => Some(Arc::new(encoder)),
        Ok(None) => Some(Arc::new(LexicalCrossEncoder)),
        Err(e) => {
            tracing::warn!("Re-ranker endpoint unusable, falling back to lexical scoring: {}", e);
            Some(Arc::new(LexicalCrossEncoder))
        }
    }
}
