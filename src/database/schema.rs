use super::Database;
use crate::MindcareError;
use crate::Result;

const REQUIRED_TABLES: [&str; 4] = [
    "chat_sessions",
    "chat_messages",
    "expert_referrals",
    "counseling_passages",
];

impl Database {
    /// Check if database schema is initialized
    /// Returns true if all required tables exist
    pub async fn is_schema_initialized(&self) -> Result<bool> {
        for table_name in REQUIRED_TABLES {
            let exists = sqlx::query_scalar::<_, bool>(
                r"
                SELECT EXISTS (
                    SELECT FROM information_schema.tables
                    WHERE table_schema = 'public'
                    AND table_name = $1
                )
                ",
            )
            .bind(table_name)
            .fetch_one(&self.pool)
            .await?;

            if !exists {
                tracing::debug!("Missing required table: {}", table_name);
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Verify database schema or return helpful error
    pub async fn verify_schema_or_error(&self) -> Result<()> {
        if !self.is_schema_initialized().await? {
            return Err(MindcareError::Custom(
                "❌ Database schema not initialized!\n\n\
                 Please run the following command to initialize the database:\n\n\
                 \x1b[1;32mmindcare init-db\x1b[0m"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Initialize database schema; `dimension` sizes the passage vector column
    pub async fn init_schema(&self, dimension: usize) -> Result<()> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS chat_sessions (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL DEFAULT 'active'
                    CHECK (status IN ('active', 'completed', 'referred')),
                screening_result JSONB,
                started_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                ended_at TIMESTAMPTZ
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS chat_messages (
                id BIGSERIAL PRIMARY KEY,
                session_id TEXT NOT NULL REFERENCES chat_sessions(id) ON DELETE CASCADE,
                role TEXT NOT NULL CHECK (role IN ('user', 'assistant', 'system')),
                content TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        // UNIQUE(session_id) is what makes escalation writes idempotent
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS expert_referrals (
                id BIGSERIAL PRIMARY KEY,
                session_id TEXT NOT NULL UNIQUE REFERENCES chat_sessions(id) ON DELETE CASCADE,
                severity_level TEXT NOT NULL,
                recommended_action TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            r"
            CREATE TABLE IF NOT EXISTS counseling_passages (
                id TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                embedding vector({dimension}) NOT NULL,
                source_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                turn_index INTEGER NOT NULL DEFAULT 0,
                category TEXT,
                speaker TEXT,
                severity INTEGER NOT NULL DEFAULT 0,
                counselor_response TEXT,
                context_text TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "ALTER TABLE counseling_passages \
             ADD COLUMN IF NOT EXISTS updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()",
        )
        .execute(&self.pool)
        .await?;

        self.create_indexes().await?;

        tracing::info!("Database schema initialized (vector dimension {})", dimension);
        Ok(())
    }

    async fn create_indexes(&self) -> Result<()> {
        let statements = [
            "CREATE INDEX IF NOT EXISTS idx_chat_messages_session ON chat_messages(session_id, id)",
            "CREATE INDEX IF NOT EXISTS idx_passages_session_turn ON counseling_passages(session_id, turn_index)",
            "CREATE INDEX IF NOT EXISTS idx_passages_category ON counseling_passages(category)",
            "CREATE INDEX IF NOT EXISTS idx_passages_embedding ON counseling_passages \
             USING hnsw (embedding vector_cosine_ops)",
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}
