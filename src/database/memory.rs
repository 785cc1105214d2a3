use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use super::ConversationStore;
use crate::models::EscalationRecord;
use crate::models::Role;
use crate::models::Session;
use crate::models::SessionStatus;
use crate::models::Severity;
use crate::models::Utterance;
use crate::MindcareError;
use crate::Result;

/// Session-keyed in-process store
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: DashMap<String, Session>,
    messages: DashMap<String, Vec<Utterance>>,
    escalations: DashMap<String, EscalationRecord>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of escalation records across all sessions
    #[must_use]
    pub fn escalation_count(&self) -> usize {
        self.escalations.len()
    }

    fn require_session(&self, session_id: &str) -> Result<()> {
        if self.sessions.contains_key(session_id) {
            Ok(())
        } else {
            Err(MindcareError::SessionNotFound(session_id.to_string()))
        }
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn create_session(&self, session: &Session) -> Result<Session> {
        let stored = self
            .sessions
            .entry(session.id.clone())
            .or_insert_with(|| session.clone());
        Ok(stored.value().clone())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.get(session_id).map(|s| s.value().clone()))
    }

    async fn append_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
    ) -> Result<Utterance> {
        self.require_session(session_id)?;
        let utterance = Utterance::new(role, content);
        self.messages
            .entry(session_id.to_string())
            .or_default()
            .push(utterance.clone());
        Ok(utterance)
    }

    async fn get_recent_messages(&self, session_id: &str, n: usize) -> Result<Vec<Utterance>> {
        Ok(self
            .messages
            .get(session_id)
            .map(|history| {
                let start = history.len().saturating_sub(n);
                history[start..].to_vec()
            })
            .unwrap_or_default())
    }

    async fn get_messages(&self, session_id: &str) -> Result<Vec<Utterance>> {
        Ok(self
            .messages
            .get(session_id)
            .map(|history| history.clone())
            .unwrap_or_default())
    }

    async fn create_escalation(
        &self,
        session_id: &str,
        severity: Severity,
        action: &str,
    ) -> Result<bool> {
        self.require_session(session_id)?;
        let mut created = false;
        self.escalations
            .entry(session_id.to_string())
            .or_insert_with(|| {
                created = true;
                EscalationRecord {
                    session_id: session_id.to_string(),
                    severity,
                    recommended_action: action.to_string(),
                    created_at: Utc::now(),
                }
            });
        Ok(created)
    }

    async fn get_escalation(&self, session_id: &str) -> Result<Option<EscalationRecord>> {
        Ok(self.escalations.get(session_id).map(|r| r.value().clone()))
    }

    async fn set_session_status(&self, session_id: &str, status: SessionStatus) -> Result<()> {
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| MindcareError::SessionNotFound(session_id.to_string()))?;
        session.status = status;
        if status != SessionStatus::Active && session.ended_at.is_none() {
            session.ended_at = Some(Utc::now());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_session_keeps_first() {
        let store = MemoryStore::new();
        let first = store.create_session(&Session::new("s")).await.unwrap();
        store
            .set_session_status("s", SessionStatus::Referred)
            .await
            .unwrap();
        let again = store.create_session(&Session::new("s")).await.unwrap();
        assert_eq!(again.started_at, first.started_at);
        assert_eq!(again.status, SessionStatus::Referred);
    }

    #[tokio::test]
    async fn test_recent_messages_are_the_tail_in_order() {
        let store = MemoryStore::new();
        store.create_session(&Session::new("s")).await.unwrap();
        for i in 0..5 {
            store
                .append_message("s", Role::User, &format!("m{i}"))
                .await
                .unwrap();
        }
        let recent = store.get_recent_messages("s", 2).await.unwrap();
        let texts: Vec<&str> = recent.iter().map(|u| u.text.as_str()).collect();
        assert_eq!(texts, vec!["m3", "m4"]);
    }

    #[tokio::test]
    async fn test_append_requires_session() {
        let store = MemoryStore::new();
        let result = store.append_message("missing", Role::User, "hi").await;
        assert!(matches!(result, Err(MindcareError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_create_escalation_twice_keeps_one_row() {
        let store = MemoryStore::new();
        store.create_session(&Session::new("s")).await.unwrap();
        assert!(store
            .create_escalation("s", Severity::Crisis, "call")
            .await
            .unwrap());
        assert!(!store
            .create_escalation("s", Severity::Severe, "other")
            .await
            .unwrap());
        assert_eq!(store.escalation_count(), 1);
        let record = store.get_escalation("s").await.unwrap().unwrap();
        assert_eq!(record.severity, Severity::Crisis);
    }

    #[tokio::test]
    async fn test_status_change_sets_ended_at() {
        let store = MemoryStore::new();
        store.create_session(&Session::new("s")).await.unwrap();
        store
            .set_session_status("s", SessionStatus::Completed)
            .await
            .unwrap();
        let session = store.get_session("s").await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert!(session.ended_at.is_some());
    }
}
