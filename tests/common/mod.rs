//! Fakes shared by the integration tests; no network or database involved

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream;
use futures::StreamExt;
use mindcare::database::ConversationStore;
use mindcare::database::MemoryStore;
use mindcare::embeddings::EmbeddingService;
use mindcare::llm::ChatMessage;
use mindcare::llm::GenerationService;
use mindcare::llm::StreamingResponse;
use mindcare::models::EscalationRecord;
use mindcare::models::Utterance;
use mindcare::rag::CounselingPipeline;
use mindcare::rag::IntentRouter;
use mindcare::rag::Retriever;
use mindcare::session::SessionManager;
use mindcare::vector::CorpusRevision;
use mindcare::vector::IndexedPassage;
use mindcare::vector::MemoryVectorIndex;
use mindcare::vector::Neighbor;
use mindcare::vector::PassageFilter;
use mindcare::vector::PassageMetadata;
use mindcare::vector::VectorIndex;
use mindcare::AppConfig;
use mindcare::MindcareError;
use mindcare::Result;

pub const DIM: usize = 16;
pub const MARKER: &str = "[EXPERT_REFERRAL_NEEDED]";

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.embeddings.dimension = DIM;
    config.embeddings.timeout_ms = 200;
    config.retrieval.min_relevance = 0.0;
    config.retrieval.index_timeout_ms = 100;
    config.retrieval.rerank.enabled = false;
    config.llm.chunk_timeout_ms = 300;
    config.safety.retry_backoff_ms = 1;
    config
}

/// Character histogram embedding: texts sharing syllables land close together
#[derive(Default)]
pub struct HashEmbeddings {
    pub calls: AtomicUsize,
}

pub fn hash_vector(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0; DIM];
    for c in text.chars().filter(|c| !c.is_whitespace()) {
        vector[c as u32 as usize % DIM] += 1.0;
    }
    vector
}

#[async_trait]
impl EmbeddingService for HashEmbeddings {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(hash_vector(text))
    }

    fn dimension(&self) -> usize {
        DIM
    }
}

/// Index whose reads take longer than any sensible timeout
pub struct SlowIndex {
    pub inner: MemoryVectorIndex,
    pub delay: Duration,
}

#[async_trait]
impl VectorIndex for SlowIndex {
    async fn upsert(&self, passage: IndexedPassage) -> Result<()> {
        self.inner.upsert(passage).await
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&PassageFilter>,
    ) -> Result<Vec<Neighbor>> {
        tokio::time::sleep(self.delay).await;
        self.inner.query(vector, k, filter).await
    }

    async fn session_turns(&self, session_id: &str, from: i32, to: i32) -> Result<Vec<IndexedPassage>> {
        tokio::time::sleep(self.delay).await;
        self.inner.session_turns(session_id, from, to).await
    }

    async fn scan(&self, filter: Option<&PassageFilter>) -> Result<Vec<IndexedPassage>> {
        tokio::time::sleep(self.delay).await;
        self.inner.scan(filter).await
    }

    async fn contains(&self, id: &str) -> Result<bool> {
        self.inner.contains(id).await
    }

    async fn len(&self) -> Result<usize> {
        self.inner.len().await
    }

    async fn revision(&self) -> Result<CorpusRevision> {
        tokio::time::sleep(self.delay).await;
        self.inner.revision().await
    }
}

/// How one streamed completion behaves
pub enum Script {
    /// Emit every chunk, then end
    Chunks(Vec<&'static str>),
    /// Emit the chunks, then fail
    FailAfter(Vec<&'static str>),
    /// Emit the chunks, then go silent forever
    Stall(Vec<&'static str>),
    /// Emit the chunks with a pause before each
    Paced(Vec<&'static str>, Duration),
}

/// Generation fake: scripted streams in call order, a fixed `complete` answer
pub struct ScriptedGeneration {
    scripts: Mutex<VecDeque<Script>>,
    complete_reply: String,
    pub stream_calls: AtomicUsize,
    pub complete_calls: AtomicUsize,
    pub prompts: Mutex<Vec<Vec<ChatMessage>>>,
    /// Set when the last handed-out stream has been dropped
    pub stream_dropped: Arc<AtomicBool>,
}

impl ScriptedGeneration {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            complete_reply: "QUESTION".to_string(),
            stream_calls: AtomicUsize::new(0),
            complete_calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
            stream_dropped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_complete_reply(mut self, reply: &str) -> Self {
        self.complete_reply = reply.to_string();
        self
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    /// Rendered user prompt of the n-th streamed completion
    pub fn streamed_prompt(&self, n: usize) -> String {
        let prompts = self.prompts.lock().unwrap();
        prompts[n]
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

fn owned(chunks: Vec<&'static str>) -> Vec<Result<String>> {
    chunks.into_iter().map(|c| Ok(c.to_string())).collect()
}

#[async_trait]
impl GenerationService for ScriptedGeneration {
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.complete_reply.clone())
    }

    async fn stream_complete(&self, messages: &[ChatMessage]) -> Result<StreamingResponse> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(messages.to_vec());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Script::Chunks(vec!["말씀해 주셔서 고마워요."]));

        self.stream_dropped.store(false, Ordering::SeqCst);
        let flag = DropFlag(Arc::clone(&self.stream_dropped));

        let inner: mindcare::llm::TokenStream = match script {
            Script::Chunks(chunks) => {
                StreamingResponse::from_chunks(chunks.into_iter().map(str::to_string).collect::<Vec<_>>())
                    .into_stream()
            }
            Script::FailAfter(chunks) => Box::pin(stream::iter(owned(chunks)).chain(stream::once(
                async { Err(MindcareError::LlmError("connection reset".to_string())) },
            ))),
            Script::Stall(chunks) => Box::pin(stream::iter(owned(chunks)).chain(stream::pending())),
            Script::Paced(chunks, pause) => Box::pin(stream::iter(owned(chunks)).then(move |c| async move {
                tokio::time::sleep(pause).await;
                c
            })),
        };
        let guarded = inner.map(move |item| {
            let _keep = &flag;
            item
        });
        Ok(StreamingResponse::new(Box::pin(guarded)))
    }
}

pub fn passage(id: &str, session_id: &str, turn_index: i32, text: &str, category: &str) -> IndexedPassage {
    IndexedPassage {
        id: id.to_string(),
        text: text.to_string(),
        vector: hash_vector(text),
        metadata: PassageMetadata {
            source_id: session_id.to_string(),
            session_id: session_id.to_string(),
            turn_index,
            category: Some(category.to_string()),
            speaker: Some("client".to_string()),
            severity: 1,
            counselor_response: Some("충분히 그럴 수 있어요. 천천히 이야기해 주세요.".to_string()),
            context_text: None,
            created_at: Utc::now(),
        },
    }
}

pub async fn sample_index() -> MemoryVectorIndex {
    let index = MemoryVectorIndex::with_dimension(DIM);
    for p in [
        passage("p1", "rec-1", 0, "요즘 잠을 잘 못 자고 계속 피곤해요", "수면"),
        passage("p2", "rec-1", 1, "밤마다 걱정이 많아서 잠들기가 어려워요", "수면"),
        passage("p3", "rec-2", 0, "회사에서 스트레스를 너무 많이 받아요", "직장"),
        passage("p4", "rec-3", 0, "친구들과 멀어진 것 같아 외로워요", "관계"),
    ] {
        index.upsert(p).await.unwrap();
    }
    index
}

pub struct Harness {
    pub pipeline: Arc<CounselingPipeline>,
    pub sessions: Arc<SessionManager>,
    pub store: Arc<MemoryStore>,
    pub embeddings: Arc<HashEmbeddings>,
    pub generation: Arc<ScriptedGeneration>,
}

impl Harness {
    pub async fn store_messages(&self, session_id: &str) -> Vec<Utterance> {
        self.store.get_messages(session_id).await.unwrap()
    }

    pub async fn store_escalation(&self, session_id: &str) -> Option<EscalationRecord> {
        self.store.get_escalation(session_id).await.unwrap()
    }
}

/// Pipeline over in-memory storage with the keyword-only router
pub fn harness(index: Arc<dyn VectorIndex>, generation: ScriptedGeneration) -> Harness {
    harness_with(test_config(), index, generation)
}

pub fn harness_with(config: AppConfig, index: Arc<dyn VectorIndex>, generation: ScriptedGeneration) -> Harness {
    build(config, index, generation, Some(IntentRouter::keyword_only()))
}

/// Pipeline whose router asks the generation fake for unmatched utterances
pub fn model_routed_harness(index: Arc<dyn VectorIndex>, generation: ScriptedGeneration) -> Harness {
    build(test_config(), index, generation, None)
}

fn build(
    config: AppConfig,
    index: Arc<dyn VectorIndex>,
    generation: ScriptedGeneration,
    router: Option<IntentRouter>,
) -> Harness {
    mindcare::logging::init_simple_logging().unwrap();
    let store = Arc::new(MemoryStore::new());
    let embeddings = Arc::new(HashEmbeddings::default());
    let generation = Arc::new(generation);
    let sessions = Arc::new(SessionManager::new(store.clone(), &config.safety));
    let retriever = Retriever::new(embeddings.clone(), index, config.retrieval.clone(), None)
        .with_embed_timeout(Duration::from_millis(config.embeddings.timeout_ms));
    let mut pipeline = CounselingPipeline::new(&config, Arc::clone(&sessions), generation.clone(), retriever);
    if let Some(router) = router {
        pipeline = pipeline.with_router(router);
    }

    Harness {
        pipeline: Arc::new(pipeline),
        sessions,
        store,
        embeddings,
        generation,
    }
}
