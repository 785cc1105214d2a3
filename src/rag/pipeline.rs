//! One counseling turn end to end: Route -> Rewrite -> Retrieve -> Assemble -> Generate -> Escalate
//!
//! Each turn runs in its own task behind a ticket taken when the turn arrives,
//! so turns of one session are processed in arrival order while different
//! sessions run in parallel. A queued turn never blocks its caller. The caller
//! reads [`TurnEvent`]s from a [`TurnHandle`]; dropping
//! the handle cancels generation but never rolls back what was persisted.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

use crate::config::AppConfig;
use crate::config::SafetyConfig;
use crate::errors::MindcareError;
use crate::errors::Result;
use crate::llm::GenerationService;
use crate::models::RetrievedPassage;
use crate::models::Role;
use crate::models::SessionStatus;
use crate::models::Severity;
use crate::models::Strategy;
use crate::rag::answer::AnswerGenerator;
use crate::rag::context::ContextAssembler;
use crate::rag::context::PromptContext;
use crate::rag::intent::Intent;
use crate::rag::intent::IntentRouter;
use crate::rag::prompts::counseling_directive;
use crate::rag::prompts::summary_directive;
use crate::rag::prompts::EMPTY_SUMMARY_REPLY;
use crate::rag::retriever::RetrievalOutcome;
use crate::rag::retriever::Retriever;
use crate::rag::rewrite::QueryRewriter;
use crate::rag::rewrite::REWRITE_HISTORY;
use crate::session::EscalationOutcome;
use crate::session::SessionManager;
use crate::vector::PassageFilter;

const EVENT_BUFFER: usize = 32;

/// Per-turn overrides of the configured retrieval
#[derive(Debug, Clone, Default)]
pub struct TurnOptions {
    pub strategy: Option<Strategy>,
    pub top_k: Option<usize>,
    pub filter: Option<PassageFilter>,
}

/// How a turn ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub intent: Intent,
    /// Retrieval ran in degraded mode (embedding or index unavailable)
    pub degraded: bool,
    /// Set when this turn triggered an escalation that was recorded
    pub escalation: Option<EscalationOutcome>,
    pub status: SessionStatus,
}

/// Events of one turn, in order: `Routed`, any number of `Chunk`s, `Finished`
///
/// A failed turn ends with an `Err` item instead of `Finished`.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    Routed {
        intent: Intent,
        /// Search query after rewriting, for intents that retrieve
        query: Option<String>,
        passages: Vec<RetrievedPassage>,
    },
    Chunk(String),
    Finished(TurnOutcome),
}

/// Everything a fully read turn produced
#[derive(Debug, Clone)]
pub struct TurnReply {
    pub text: String,
    pub query: Option<String>,
    pub passages: Vec<RetrievedPassage>,
    pub outcome: TurnOutcome,
}

/// Caller side of a running turn; dropping it cancels generation
pub struct TurnHandle {
    session_id: String,
    events: mpsc::Receiver<Result<TurnEvent>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl TurnHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub async fn next_event(&mut self) -> Option<Result<TurnEvent>> {
        self.events.recv().await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Read the whole turn; a failed turn returns its error
    pub async fn collect(mut self) -> Result<TurnReply> {
        let mut text = String::new();
        let mut query = None;
        let mut passages = Vec::new();
        let mut outcome = None;

        while let Some(event) = self.events.recv().await {
            match event? {
                TurnEvent::Routed {
                    query: q,
                    passages: p,
                    ..
                } => {
                    query = q;
                    passages = p;
                }
                TurnEvent::Chunk(chunk) => text.push_str(&chunk),
                TurnEvent::Finished(o) => outcome = Some(o),
            }
        }
        self.wait().await;

        let outcome = outcome.ok_or(MindcareError::Cancelled)?;
        Ok(TurnReply {
            text,
            query,
            passages,
            outcome,
        })
    }

    /// Stop reading as a disconnected client would, then wait for the turn's cleanup
    pub async fn abandon(mut self) {
        self.events.close();
        self.cancel.cancel();
        self.wait().await;
    }

    async fn wait(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Turn task for session {} panicked: {}", self.session_id, e);
            }
        }
    }
}

impl Drop for TurnHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct EventSink {
    tx: mpsc::Sender<Result<TurnEvent>>,
    cancel: CancellationToken,
}

impl EventSink {
    /// A gone receiver means the client disconnected
    async fn send(&self, event: Result<TurnEvent>) {
        if self.tx.send(event).await.is_err() {
            self.cancel.cancel();
        }
    }
}

struct Turn {
    session_id: String,
    utterance: String,
    options: TurnOptions,
}

pub struct CounselingPipeline {
    sessions: Arc<SessionManager>,
    router: IntentRouter,
    rewriter: QueryRewriter,
    retriever: Retriever,
    assembler: ContextAssembler,
    generator: AnswerGenerator,
    safety: SafetyConfig,
    directive: String,
    history_messages: usize,
}

impl CounselingPipeline {
    pub fn new(
        config: &AppConfig,
        sessions: Arc<SessionManager>,
        generation: Arc<dyn GenerationService>,
        retriever: Retriever,
    ) -> Self {
        Self {
            sessions,
            router: IntentRouter::new(Arc::clone(&generation)),
            rewriter: QueryRewriter::new(Arc::clone(&generation)),
            retriever,
            assembler: ContextAssembler::from_config(&config.context),
            generator: AnswerGenerator::new(
                generation,
                config.safety.marker.clone(),
                Duration::from_millis(config.llm.chunk_timeout_ms),
            ),
            safety: config.safety.clone(),
            directive: counseling_directive(&config.safety.marker),
            history_messages: config.context.history_messages,
        }
    }

    /// Replace the model-backed router, e.g. with [`IntentRouter::keyword_only`]
    #[must_use]
    pub fn with_router(mut self, router: IntentRouter) -> Self {
        self.router = router;
        self
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Queue a turn and return its handle at once
    ///
    /// The turn starts after earlier turns of the session have finished, so
    /// its first event may take a while even though the handle does not.
    pub async fn respond(
        self: &Arc<Self>,
        session_id: &str,
        utterance: &str,
        options: TurnOptions,
    ) -> Result<TurnHandle> {
        let utterance = utterance.trim();
        if utterance.is_empty() {
            return Err(MindcareError::InvalidInput("utterance is empty".to_string()));
        }
        if session_id.trim().is_empty() {
            return Err(MindcareError::InvalidInput("session id is empty".to_string()));
        }

        let mut ticket = self.sessions.enqueue_turn(session_id);
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();

        let turn = Turn {
            session_id: session_id.to_string(),
            utterance: utterance.to_string(),
            options,
        };
        let pipeline = Arc::clone(self);
        let sink = EventSink {
            tx,
            cancel: cancel.clone(),
        };

        let task = tokio::spawn(async move {
            ticket.ready().await;
            if let Err(e) = pipeline.run_turn(&turn, &sink).await {
                warn!("Turn for session {} failed: {}", turn.session_id, e);
                sink.send(Err(e)).await;
            }
            pipeline.sessions.finish_turn(ticket);
        });

        Ok(TurnHandle {
            session_id: session_id.to_string(),
            events: rx,
            cancel,
            task: Some(task),
        })
    }

    fn history_window(&self) -> usize {
        self.history_messages.max(REWRITE_HISTORY)
    }

    async fn run_turn(&self, turn: &Turn, sink: &EventSink) -> Result<()> {
        let id = turn.session_id.as_str();
        self.sessions.ensure_session(id).await?;
        let history = self.sessions.recent_history(id, self.history_window()).await?;
        self.sessions.record(id, Role::User, &turn.utterance).await?;

        let intent = self.router.classify(&turn.utterance, &history).await;
        info!(session_id = id, intent = %intent, "Routed turn");

        let mut degraded = false;
        let escalation = match intent {
            Intent::Greeting | Intent::Chitchat | Intent::Crisis => {
                // Crisis is recorded before anything is shown to the user
                let escalation = if intent == Intent::Crisis {
                    self.escalate(id, Severity::Crisis, &self.safety.crisis_action).await
                } else {
                    None
                };
                sink.send(Ok(routed(intent, None, Vec::new()))).await;
                let reply = intent.canned_reply(&turn.utterance).unwrap_or_default();
                sink.send(Ok(TurnEvent::Chunk(reply.to_string()))).await;
                self.sessions.record(id, Role::Assistant, reply).await?;
                escalation
            }
            Intent::Closing => {
                sink.send(Ok(routed(intent, None, Vec::new()))).await;
                let escalation = self.close_session(id, sink).await?;
                self.sessions.complete(id).await?;
                escalation
            }
            Intent::Emotion | Intent::Question => {
                let query = self.rewriter.rewrite(&history, &turn.utterance).await;
                let RetrievalOutcome {
                    passages,
                    degraded: retrieval_degraded,
                } = self
                    .retriever
                    .retrieve(
                        &query,
                        turn.options.top_k.unwrap_or(self.retriever.config().top_k),
                        turn.options.strategy.unwrap_or(self.retriever.config().strategy),
                        turn.options.filter.as_ref(),
                    )
                    .await;
                degraded = retrieval_degraded;

                let context = self
                    .assembler
                    .assemble(&passages, &history, &turn.utterance, &self.directive);
                sink.send(Ok(routed(intent, Some(query), passages))).await;
                self.stream_answer(id, &context, sink).await?
            }
        };

        let status = self.sessions.get_session(id).await?.status;
        sink.send(Ok(TurnEvent::Finished(TurnOutcome {
            intent,
            degraded,
            escalation,
            status,
        })))
        .await;
        Ok(())
    }

    /// Summary of the session so far, or a fixed notice if nothing was said yet
    async fn close_session(&self, id: &str, sink: &EventSink) -> Result<Option<EscalationOutcome>> {
        let mut transcript = self.sessions.store().get_messages(id).await?;
        // The closing utterance itself was just recorded
        transcript.pop();

        if transcript.iter().all(|u| u.role == Role::System) {
            sink.send(Ok(TurnEvent::Chunk(EMPTY_SUMMARY_REPLY.to_string()))).await;
            self.sessions
                .record(id, Role::Assistant, EMPTY_SUMMARY_REPLY)
                .await?;
            return Ok(None);
        }

        let context = self
            .assembler
            .assemble_summary(&transcript, &summary_directive());
        self.stream_answer(id, &context, sink).await
    }

    /// Forward visible chunks, then act on the marker and persist the answer
    ///
    /// A seen marker escalates even when the stream failed or was cancelled.
    /// Only a complete answer is recorded.
    async fn stream_answer(
        &self,
        id: &str,
        context: &PromptContext,
        sink: &EventSink,
    ) -> Result<Option<EscalationOutcome>> {
        if sink.cancel.is_cancelled() {
            return Err(MindcareError::Cancelled);
        }
        let mut stream = self.generator.generate(context, sink.cancel.clone()).await?;

        let mut failure = None;
        while let Some(chunk) = stream.next_chunk().await {
            match chunk {
                Ok(text) => sink.send(Ok(TurnEvent::Chunk(text))).await,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        let escalation = if stream.escalation_flagged() {
            self.escalate(id, Severity::Severe, &self.safety.referral_action)
                .await
        } else {
            None
        };

        if let Some(e) = failure {
            return Err(e);
        }
        if !stream.text().trim().is_empty() {
            self.sessions
                .record(id, Role::Assistant, stream.text())
                .await?;
        }
        Ok(escalation)
    }

    /// Escalation failures are already alerted on; the answer goes out regardless
    async fn escalate(&self, id: &str, severity: Severity, action: &str) -> Option<EscalationOutcome> {
        match self.sessions.mark_referred(id, severity, action).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!("Session {} answered without escalation record: {}", id, e);
                None
            }
        }
    }
}

fn routed(intent: Intent, query: Option<String>, passages: Vec<RetrievedPassage>) -> TurnEvent {
    TurnEvent::Routed {
        intent,
        query,
        passages,
    }
}
