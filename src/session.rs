//! Session lifecycle, per-session turn ordering and escalation records

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::error;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use crate::config::SafetyConfig;
use crate::database::ConversationStore;
use crate::logging::OPS_ALERT_TARGET;
use crate::models::Role;
use crate::models::Session;
use crate::models::SessionStatus;
use crate::models::Severity;
use crate::models::Utterance;
use crate::MindcareError;
use crate::Result;

/// Result of a `mark_referred` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationOutcome {
    /// This call created the session's escalation record
    Created,
    /// A record already existed; nothing was written
    AlreadyReferred,
}

/// A turn's place in its session's queue
///
/// Tickets are handed out synchronously when a turn arrives. Each one waits
/// for the ticket issued just before it, so turns of one session run in
/// arrival order no matter when their tasks are first polled. Dropping the
/// ticket releases the next turn.
#[derive(Debug)]
pub struct TurnTicket {
    session_id: String,
    seq: u64,
    previous: Option<oneshot::Receiver<()>>,
    _done: oneshot::Sender<()>,
}

impl TurnTicket {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Resolves once every earlier turn of the session has finished
    pub async fn ready(&mut self) {
        if let Some(previous) = self.previous.take() {
            // The sender is only ever dropped, never sent on
            let _ = previous.await;
        }
    }
}

/// Owns status transitions and escalation records
///
/// Turns of one session are serialized through a chain of [`TurnTicket`]s.
pub struct SessionManager {
    store: Arc<dyn ConversationStore>,
    /// Latest ticket per session and the signal it drops when done
    queues: DashMap<String, (u64, oneshot::Receiver<()>)>,
    next_ticket: AtomicU64,
    escalation_retries: u32,
    retry_backoff: Duration,
}

impl SessionManager {
    pub fn new(store: Arc<dyn ConversationStore>, safety: &SafetyConfig) -> Self {
        Self {
            store,
            queues: DashMap::new(),
            next_ticket: AtomicU64::new(0),
            escalation_retries: safety.escalation_retries,
            retry_backoff: Duration::from_millis(safety.retry_backoff_ms),
        }
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    /// Join the end of the session's turn queue without waiting
    pub fn enqueue_turn(&self, session_id: &str) -> TurnTicket {
        let seq = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (done, tail) = oneshot::channel();
        let previous = self
            .queues
            .insert(session_id.to_string(), (seq, tail))
            .map(|(_, previous)| previous);
        TurnTicket {
            session_id: session_id.to_string(),
            seq,
            previous,
            _done: done,
        }
    }

    /// Release the next turn and forget the queue if nobody joined it since
    pub fn finish_turn(&self, ticket: TurnTicket) {
        self.queues
            .remove_if(&ticket.session_id, |_, (seq, _)| *seq == ticket.seq);
        drop(ticket);
    }

    /// Number of sessions with a queued or running turn
    pub fn active_queues(&self) -> usize {
        self.queues.len()
    }

    /// Create a session with a fresh id
    pub async fn start_session(&self, screening_result: Option<serde_json::Value>) -> Result<Session> {
        let mut session = Session::new(Uuid::new_v4().to_string());
        session.screening_result = screening_result;
        let session = self.store.create_session(&session).await?;
        info!("Started session {}", session.id);
        Ok(session)
    }

    /// Fetch the session, creating it on its first utterance
    pub async fn ensure_session(&self, session_id: &str) -> Result<Session> {
        if let Some(session) = self.store.get_session(session_id).await? {
            return Ok(session);
        }
        self.store.create_session(&Session::new(session_id)).await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Session> {
        self.store
            .get_session(session_id)
            .await?
            .ok_or_else(|| MindcareError::SessionNotFound(session_id.to_string()))
    }

    pub async fn record(&self, session_id: &str, role: Role, text: &str) -> Result<Utterance> {
        self.store.append_message(session_id, role, text).await
    }

    pub async fn recent_history(&self, session_id: &str, n: usize) -> Result<Vec<Utterance>> {
        self.store.get_recent_messages(session_id, n).await
    }

    /// Refer the session to a professional; at most one record per session
    ///
    /// Transient storage failures are retried with exponential backoff. A
    /// persistent failure is logged on the ops alert target and returned.
    pub async fn mark_referred(
        &self,
        session_id: &str,
        severity: Severity,
        action: &str,
    ) -> Result<EscalationOutcome> {
        let mut attempt = 0u32;
        loop {
            match self.try_mark_referred(session_id, severity, action).await {
                Ok(outcome) => {
                    if outcome == EscalationOutcome::Created {
                        info!("Session {} referred ({})", session_id, severity);
                    }
                    return Ok(outcome);
                }
                Err(e) if e.is_transient() && attempt < self.escalation_retries => {
                    let delay = self.retry_backoff * 2u32.saturating_pow(attempt);
                    warn!(
                        "Escalation write for session {} failed (attempt {}): {}; retrying in {:?}",
                        session_id,
                        attempt + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        target: OPS_ALERT_TARGET,
                        session_id,
                        severity = %severity,
                        "Escalation could not be recorded after {} attempts: {}",
                        attempt + 1,
                        e
                    );
                    return Err(e);
                }
            }
        }
    }

    async fn try_mark_referred(
        &self,
        session_id: &str,
        severity: Severity,
        action: &str,
    ) -> Result<EscalationOutcome> {
        let session = self.get_session(session_id).await?;
        let created = self
            .store
            .create_escalation(session_id, severity, action)
            .await?;

        // Re-applied on every call so a crash between the two writes heals
        if session.status != SessionStatus::Referred {
            self.transition(&session, SessionStatus::Referred).await?;
        }

        Ok(if created {
            EscalationOutcome::Created
        } else {
            EscalationOutcome::AlreadyReferred
        })
    }

    /// Close the conversation; a referred session keeps its status
    pub async fn complete(&self, session_id: &str) -> Result<SessionStatus> {
        let session = self.get_session(session_id).await?;
        match session.status {
            SessionStatus::Active => {
                self.transition(&session, SessionStatus::Completed).await?;
                Ok(SessionStatus::Completed)
            }
            status => Ok(status),
        }
    }

    async fn transition(&self, session: &Session, next: SessionStatus) -> Result<()> {
        if !session.status.can_transition_to(next) {
            return Err(MindcareError::InvalidTransition {
                session_id: session.id.clone(),
                from: session.status.to_string(),
                to: next.to_string(),
            });
        }
        self.store.set_session_status(&session.id, next).await
    }
}
