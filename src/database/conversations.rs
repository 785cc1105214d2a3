use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;

use super::ConversationStore;
use super::Database;
use crate::models::EscalationRecord;
use crate::models::Role;
use crate::models::Session;
use crate::models::SessionStatus;
use crate::models::Severity;
use crate::models::Utterance;
use crate::MindcareError;
use crate::Result;

#[derive(Debug, sqlx::FromRow)]
struct SessionRow {
    id: String,
    status: String,
    screening_result: Option<serde_json::Value>,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
}

impl TryFrom<SessionRow> for Session {
    type Error = MindcareError;

    fn try_from(row: SessionRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            status: row.status.parse()?,
            screening_result: row.screening_result,
            started_at: row.started_at,
            ended_at: row.ended_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    role: String,
    content: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for Utterance {
    type Error = MindcareError;

    fn try_from(row: MessageRow) -> Result<Self> {
        Ok(Self {
            role: row.role.parse()?,
            text: row.content,
            timestamp: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ReferralRow {
    session_id: String,
    severity_level: String,
    recommended_action: String,
    created_at: DateTime<Utc>,
}

#[async_trait]
impl ConversationStore for Database {
    async fn create_session(&self, session: &Session) -> Result<Session> {
        sqlx::query(
            r"
            INSERT INTO chat_sessions (id, status, screening_result, started_at, ended_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
            ",
        )
        .bind(&session.id)
        .bind(session.status.as_str())
        .bind(&session.screening_result)
        .bind(session.started_at)
        .bind(session.ended_at)
        .execute(&self.pool)
        .await?;

        self.get_session(&session.id)
            .await?
            .ok_or_else(|| MindcareError::SessionNotFound(session.id.clone()))
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT id, status, screening_result, started_at, ended_at FROM chat_sessions WHERE id = $1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Session::try_from).transpose()
    }

    async fn append_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
    ) -> Result<Utterance> {
        let row = sqlx::query_as::<_, MessageRow>(
            r"
            INSERT INTO chat_messages (session_id, role, content)
            VALUES ($1, $2, $3)
            RETURNING role, content, created_at
            ",
        )
        .bind(session_id)
        .bind(role.as_str())
        .bind(content)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                MindcareError::SessionNotFound(session_id.to_string())
            }
            other => MindcareError::Database(other),
        })?;

        row.try_into()
    }

    async fn get_recent_messages(&self, session_id: &str, n: usize) -> Result<Vec<Utterance>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r"
            SELECT role, content, created_at FROM (
                SELECT id, role, content, created_at
                FROM chat_messages
                WHERE session_id = $1
                ORDER BY id DESC
                LIMIT $2
            ) recent
            ORDER BY id ASC
            ",
        )
        .bind(session_id)
        .bind(i64::try_from(n).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Utterance::try_from).collect()
    }

    async fn get_messages(&self, session_id: &str) -> Result<Vec<Utterance>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT role, content, created_at FROM chat_messages WHERE session_id = $1 ORDER BY id ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Utterance::try_from).collect()
    }

    async fn create_escalation(
        &self,
        session_id: &str,
        severity: Severity,
        action: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r"
            INSERT INTO expert_referrals (session_id, severity_level, recommended_action)
            VALUES ($1, $2, $3)
            ON CONFLICT (session_id) DO NOTHING
            ",
        )
        .bind(session_id)
        .bind(severity.as_str())
        .bind(action)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_escalation(&self, session_id: &str) -> Result<Option<EscalationRecord>> {
        let row = sqlx::query_as::<_, ReferralRow>(
            r"
            SELECT session_id, severity_level, recommended_action, created_at
            FROM expert_referrals
            WHERE session_id = $1
            ",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            Ok(EscalationRecord {
                session_id: r.session_id,
                severity: r.severity_level.parse()?,
                recommended_action: r.recommended_action,
                created_at: r.created_at,
            })
        })
        .transpose()
    }

    async fn set_session_status(&self, session_id: &str, status: SessionStatus) -> Result<()> {
        let result = sqlx::query(
            r"
            UPDATE chat_sessions
            SET status = $2,
                ended_at = CASE WHEN $2 <> 'active' THEN COALESCE(ended_at, NOW()) ELSE ended_at END
            WHERE id = $1
            ",
        )
        .bind(session_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MindcareError::SessionNotFound(session_id.to_string()));
        }
        Ok(())
    }
}
