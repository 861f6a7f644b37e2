// Repository layer for database operations

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::types::JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::*;

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create database connection from URL
    pub async fn from_url(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    // ============================================
    // Sessions
    // ============================================

    pub async fn upsert_session(
        &self,
        session_id: &str,
        agent_name: &str,
        user_input: JsonValue,
        state: JsonValue,
    ) -> Result<SessionRow> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            INSERT INTO sessions (session_id, agent_name, user_input, state)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (session_id, agent_name)
            DO UPDATE SET user_input = $3, state = $4, updated_at = now()
            RETURNING session_id, agent_name, user_input, state, created_at, updated_at
            "#,
        )
        .bind(session_id)
        .bind(agent_name)
        .bind(user_input)
        .bind(state)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_session(
        &self,
        session_id: &str,
        agent_name: &str,
    ) -> Result<Option<SessionRow>> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT session_id, agent_name, user_input, state, created_at, updated_at
            FROM sessions
            WHERE session_id = $1 AND agent_name = $2
            "#,
        )
        .bind(session_id)
        .bind(agent_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    // ============================================
    // Messages (append-only; re-inserting a known id is a no-op)
    // ============================================

    pub async fn insert_message(&self, input: CreateMessageRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO messages (
                id, session_id, agent_name, role, content,
                tool_name, tool_call_id, tool_calls,
                turn_uuid, user_message_id, variant_index, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(input.id)
        .bind(&input.session_id)
        .bind(&input.agent_name)
        .bind(&input.role)
        .bind(&input.content)
        .bind(&input.tool_name)
        .bind(&input.tool_call_id)
        .bind(&input.tool_calls)
        .bind(input.turn_uuid)
        .bind(input.user_message_id)
        .bind(input.variant_index)
        .bind(input.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_messages(
        &self,
        session_id: &str,
        agent_name: &str,
    ) -> Result<Vec<MessageRow>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, session_id, agent_name, sequence, role, content,
                   tool_name, tool_call_id, tool_calls,
                   turn_uuid, user_message_id, variant_index, created_at
            FROM messages
            WHERE session_id = $1 AND agent_name = $2
            ORDER BY sequence ASC
            "#,
        )
        .bind(session_id)
        .bind(agent_name)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ============================================
    // Agent memories
    // ============================================

    pub async fn get_memory(&self, agent_name: &str, user_id: &str) -> Result<Option<MemoryRow>> {
        let row = sqlx::query_as::<_, MemoryRow>(
            r#"
            SELECT agent_name, user_id, entries, key_learnings, summary, updated_at
            FROM agent_memories
            WHERE agent_name = $1 AND user_id = $2
            "#,
        )
        .bind(agent_name)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn upsert_memory(
        &self,
        agent_name: &str,
        user_id: &str,
        entries: JsonValue,
        key_learnings: JsonValue,
        summary: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO agent_memories (agent_name, user_id, entries, key_learnings, summary, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (agent_name, user_id)
            DO UPDATE SET entries = $3, key_learnings = $4, summary = $5, updated_at = $6
            "#,
        )
        .bind(agent_name)
        .bind(user_id)
        .bind(entries)
        .bind(key_learnings)
        .bind(summary)
        .bind(updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ============================================
    // Vector memories
    // ============================================

    /// Insert unless (agent_name, content_hash) already exists; the unique
    /// index makes this the one atomic insert-if-absent in the system.
    /// Returns true when the row was written.
    pub async fn insert_vector_memory(&self, row: VectorMemoryRow) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO vector_memories (
                id, agent_name, namespace, content, metadata,
                source, source_id, chunk_index,
                embedding_provider, embedding_model, dimensions,
                vector, norm, content_hash, token_count, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (agent_name, content_hash) DO NOTHING
            "#,
        )
        .bind(&row.id)
        .bind(&row.agent_name)
        .bind(&row.namespace)
        .bind(&row.content)
        .bind(&row.metadata)
        .bind(&row.source)
        .bind(&row.source_id)
        .bind(row.chunk_index)
        .bind(&row.embedding_provider)
        .bind(&row.embedding_model)
        .bind(row.dimensions)
        .bind(&row.vector)
        .bind(row.norm)
        .bind(&row.content_hash)
        .bind(row.token_count)
        .bind(row.created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn list_vector_memories(
        &self,
        agent_name: &str,
        namespace: &str,
    ) -> Result<Vec<VectorMemoryRow>> {
        let rows = sqlx::query_as::<_, VectorMemoryRow>(
            r#"
            SELECT id, agent_name, namespace, content, metadata,
                   source, source_id, chunk_index,
                   embedding_provider, embedding_model, dimensions,
                   vector, norm, content_hash, token_count, created_at
            FROM vector_memories
            WHERE agent_name = $1 AND namespace = $2
            "#,
        )
        .bind(agent_name)
        .bind(namespace)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ============================================
    // Interrupts
    // ============================================

    pub async fn create_interrupt(&self, row: InterruptRow) -> Result<InterruptRow> {
        let row = sqlx::query_as::<_, InterruptRow>(
            r#"
            INSERT INTO interrupts (
                id, session_id, workflow_id, step_name, agent_name,
                kind, reason, data, status,
                modifications, rejection_reason, user_response,
                resolved_by, resolved_at, expires_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING id, session_id, workflow_id, step_name, agent_name,
                      kind, reason, data, status,
                      modifications, rejection_reason, user_response,
                      resolved_by, resolved_at, expires_at, created_at
            "#,
        )
        .bind(&row.id)
        .bind(&row.session_id)
        .bind(&row.workflow_id)
        .bind(&row.step_name)
        .bind(&row.agent_name)
        .bind(&row.kind)
        .bind(&row.reason)
        .bind(&row.data)
        .bind(&row.status)
        .bind(&row.modifications)
        .bind(&row.rejection_reason)
        .bind(&row.user_response)
        .bind(&row.resolved_by)
        .bind(row.resolved_at)
        .bind(row.expires_at)
        .bind(row.created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_interrupt(&self, id: &str) -> Result<Option<InterruptRow>> {
        let row = sqlx::query_as::<_, InterruptRow>(
            r#"
            SELECT id, session_id, workflow_id, step_name, agent_name,
                   kind, reason, data, status,
                   modifications, rejection_reason, user_response,
                   resolved_by, resolved_at, expires_at, created_at
            FROM interrupts
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Apply a resolution. The pending guard makes concurrent resolutions
    /// race-safe: exactly one wins. Returns false when the record was no
    /// longer pending.
    pub async fn resolve_interrupt(&self, row: &InterruptRow) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE interrupts
            SET status = $2, modifications = $3, rejection_reason = $4,
                user_response = $5, resolved_by = $6, resolved_at = $7
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(&row.id)
        .bind(&row.status)
        .bind(&row.modifications)
        .bind(&row.rejection_reason)
        .bind(&row.user_response)
        .bind(&row.resolved_by)
        .bind(row.resolved_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn list_pending_interrupts(&self, session_id: &str) -> Result<Vec<InterruptRow>> {
        let rows = sqlx::query_as::<_, InterruptRow>(
            r#"
            SELECT id, session_id, workflow_id, step_name, agent_name,
                   kind, reason, data, status,
                   modifications, rejection_reason, user_response,
                   resolved_by, resolved_at, expires_at, created_at
            FROM interrupts
            WHERE session_id = $1 AND status = 'pending'
            ORDER BY id ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Sweep every pending interrupt past its deadline into 'expired'
    pub async fn expire_due_interrupts(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE interrupts
            SET status = 'expired', resolved_at = $1
            WHERE status = 'pending' AND expires_at IS NOT NULL AND expires_at <= $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    // ============================================
    // Trace events
    // ============================================

    pub async fn insert_event(
        &self,
        event_type: &str,
        session_id: Option<&str>,
        agent_name: Option<&str>,
        data: JsonValue,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO events (event_type, session_id, agent_name, data)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(event_type)
        .bind(session_id)
        .bind(agent_name)
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_events(&self, session_id: &str) -> Result<Vec<EventRow>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT id, event_type, session_id, agent_name, data, created_at
            FROM events
            WHERE session_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
