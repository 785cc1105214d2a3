//! API request and response types

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::models::EscalationRecord;
use crate::models::RetrievedPassage;
use crate::models::Session;
use crate::models::SessionStatus;
use crate::models::Strategy;
use crate::rag::Intent;
use crate::rag::TurnOutcome;
use crate::session::EscalationOutcome;
use crate::vector::PassageFilter;

/// Standard API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub indexed_passages: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    /// Result of the intake questionnaire, stored as-is
    #[serde(default)]
    pub screening_result: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub id: String,
    pub status: SessionStatus,
    pub screening_result: Option<serde_json::Value>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub escalation: Option<EscalationRecord>,
}

impl SessionResponse {
    pub fn new(session: Session, escalation: Option<EscalationRecord>) -> Self {
        Self {
            id: session.id,
            status: session.status,
            screening_result: session.screening_result,
            started_at: session.started_at,
            ended_at: session.ended_at,
            escalation,
        }
    }
}

/// Body of `POST /api/sessions/:id/messages`
#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub message: String,
    #[serde(default)]
    pub strategy: Option<Strategy>,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub min_severity: Option<i32>,
}

impl MessageRequest {
    pub fn filter(&self) -> Option<PassageFilter> {
        if self.category.is_none() && self.min_severity.is_none() {
            return None;
        }
        Some(PassageFilter {
            category: self.category.clone(),
            min_severity: self.min_severity,
            ..PassageFilter::default()
        })
    }
}

/// Passage summary sent with the `routed` event
#[derive(Debug, Serialize)]
pub struct PassageView {
    pub rank: usize,
    pub source_id: String,
    pub category: Option<String>,
    pub relevance: f32,
    pub rerank_score: Option<f32>,
}

impl From<&RetrievedPassage> for PassageView {
    fn from(p: &RetrievedPassage) -> Self {
        Self {
            rank: p.rank,
            source_id: p.source_id.clone(),
            category: p.category.clone(),
            relevance: p.relevance,
            rerank_score: p.rerank_score,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RoutedEvent {
    pub intent: Intent,
    pub query: Option<String>,
    pub passages: Vec<PassageView>,
}

#[derive(Debug, Serialize)]
pub struct ChunkEvent {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct DoneEvent {
    pub intent: Intent,
    pub status: SessionStatus,
    pub degraded: bool,
    /// This turn referred the session to a professional
    pub referred: bool,
}

impl From<&TurnOutcome> for DoneEvent {
    fn from(outcome: &TurnOutcome) -> Self {
        Self {
            intent: outcome.intent,
            status: outcome.status,
            degraded: outcome.degraded,
            referred: outcome.escalation == Some(EscalationOutcome::Created),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorEvent {
    pub message: String,
}
