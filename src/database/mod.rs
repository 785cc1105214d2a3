//! Conversation persistence: sessions, messages and escalation records

use async_trait::async_trait;
use sqlx::PgPool;

use crate::models::EscalationRecord;
use crate::models::Role;
use crate::models::Session;
use crate::models::SessionStatus;
use crate::models::Severity;
use crate::models::Utterance;
use crate::Result;

mod conversations;
mod memory;
mod schema;

pub use memory::MemoryStore;

/// Read/write contract the counseling pipeline needs from storage
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Insert the session unless one with the same id exists; returns the stored one
    async fn create_session(&self, session: &Session) -> Result<Session>;

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>>;

    /// Append one utterance at the end of the session's history
    async fn append_message(&self, session_id: &str, role: Role, content: &str)
        -> Result<Utterance>;

    /// The last `n` utterances, oldest first
    async fn get_recent_messages(&self, session_id: &str, n: usize) -> Result<Vec<Utterance>>;

    /// Whole history, oldest first
    async fn get_messages(&self, session_id: &str) -> Result<Vec<Utterance>>;

    /// Create the session's escalation record; returns `false` when one already existed
    async fn create_escalation(
        &self,
        session_id: &str,
        severity: Severity,
        action: &str,
    ) -> Result<bool>;

    async fn get_escalation(&self, session_id: &str) -> Result<Option<EscalationRecord>>;

    async fn set_session_status(&self, session_id: &str, status: SessionStatus) -> Result<()>;
}

/// Database connection pool wrapper
#[derive(Debug, Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a new database instance from configuration
    pub async fn from_config(config: &crate::config::AppConfig) -> Result<Self> {
        let pool_options = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.max_connections())
            .min_connections(config.min_connections())
            .acquire_timeout(std::time::Duration::from_secs(config.connection_timeout()));

        let pool = pool_options.connect(config.database_url()).await?;
        Ok(Self::new(pool))
    }

    /// Get a reference to the database pool for raw queries
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}
