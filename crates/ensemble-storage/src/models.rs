// Database rows (internal; may differ from the engine's public types)

use chrono::{DateTime, Utc};
use ensemble_core::{
    AgentInterrupt, InterruptKind, InterruptStatus, Message, MessageRole, VectorMemoryEntry,
};
use sqlx::types::JsonValue;
use sqlx::FromRow;
use uuid::Uuid;

// ============================================
// Sessions + messages
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct SessionRow {
    pub session_id: String,
    pub agent_name: String,
    pub user_input: JsonValue,
    pub state: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct MessageRow {
    pub id: Uuid,
    pub session_id: String,
    pub agent_name: String,
    pub sequence: i64,
    pub role: String,
    pub content: String,
    pub tool_name: Option<String>,
    pub tool_call_id: Option<String>,
    pub tool_calls: Option<JsonValue>,
    pub turn_uuid: Uuid,
    pub user_message_id: Option<Uuid>,
    pub variant_index: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateMessageRow {
    pub id: Uuid,
    pub session_id: String,
    pub agent_name: String,
    pub role: String,
    pub content: String,
    pub tool_name: Option<String>,
    pub tool_call_id: Option<String>,
    pub tool_calls: Option<JsonValue>,
    pub turn_uuid: Uuid,
    pub user_message_id: Option<Uuid>,
    pub variant_index: i32,
    pub created_at: DateTime<Utc>,
}

impl MessageRow {
    /// Rebuild the engine message this row persists
    pub fn into_message(self) -> Message {
        let tool_calls = self
            .tool_calls
            .and_then(|v| serde_json::from_value(v).ok());
        Message {
            id: self.id,
            role: MessageRole::from(self.role.as_str()),
            content: self.content,
            tool_name: self.tool_name,
            tool_call_id: self.tool_call_id,
            tool_calls,
            created_at: self.created_at,
        }
    }
}

// ============================================
// Agent memories
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct MemoryRow {
    pub agent_name: String,
    /// Empty string means the agent-global scope
    pub user_id: String,
    pub entries: JsonValue,
    pub key_learnings: JsonValue,
    pub summary: String,
    pub updated_at: DateTime<Utc>,
}

// ============================================
// Vector memories
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct VectorMemoryRow {
    pub id: String,
    pub agent_name: String,
    pub namespace: String,
    pub content: String,
    pub metadata: JsonValue,
    pub source: Option<String>,
    pub source_id: Option<String>,
    pub chunk_index: i32,
    pub embedding_provider: String,
    pub embedding_model: String,
    pub dimensions: i32,
    pub vector: JsonValue,
    pub norm: f32,
    pub content_hash: String,
    pub token_count: Option<i32>,
    pub created_at: DateTime<Utc>,
}

impl VectorMemoryRow {
    pub fn into_entry(self) -> VectorMemoryEntry {
        let vector: Vec<f32> = serde_json::from_value(self.vector).unwrap_or_default();
        VectorMemoryEntry {
            id: self.id,
            agent_name: self.agent_name,
            namespace: self.namespace,
            content: self.content,
            metadata: self.metadata,
            source: self.source,
            source_id: self.source_id,
            chunk_index: self.chunk_index.max(0) as u32,
            embedding_provider: self.embedding_provider,
            embedding_model: self.embedding_model,
            dimensions: self.dimensions.max(0) as usize,
            vector,
            norm: self.norm,
            content_hash: self.content_hash,
            token_count: self.token_count.map(|t| t.max(0) as u32),
            created_at: self.created_at,
        }
    }
}

// ============================================
// Interrupts
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct InterruptRow {
    pub id: String,
    pub session_id: String,
    pub workflow_id: Option<String>,
    pub step_name: Option<String>,
    pub agent_name: String,
    pub kind: String,
    pub reason: String,
    pub data: JsonValue,
    pub status: String,
    pub modifications: Option<JsonValue>,
    pub rejection_reason: Option<String>,
    pub user_response: Option<JsonValue>,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

fn parse_kind(raw: &str) -> InterruptKind {
    match raw {
        "confirmation" => InterruptKind::Confirmation,
        "input" => InterruptKind::Input,
        "feedback" => InterruptKind::Feedback,
        _ => InterruptKind::Approval,
    }
}

fn parse_status(raw: &str) -> InterruptStatus {
    match raw {
        "approved" => InterruptStatus::Approved,
        "rejected" => InterruptStatus::Rejected,
        "expired" => InterruptStatus::Expired,
        "cancelled" => InterruptStatus::Cancelled,
        _ => InterruptStatus::Pending,
    }
}

impl InterruptRow {
    pub fn into_interrupt(self) -> AgentInterrupt {
        AgentInterrupt {
            id: self.id,
            session_id: self.session_id,
            workflow_id: self.workflow_id,
            step_name: self.step_name,
            agent_name: self.agent_name,
            kind: parse_kind(&self.kind),
            reason: self.reason,
            data: self.data,
            status: parse_status(&self.status),
            modifications: self.modifications,
            rejection_reason: self.rejection_reason,
            user_response: self.user_response,
            resolved_by: self.resolved_by,
            resolved_at: self.resolved_at,
            expires_at: self.expires_at,
            created_at: self.created_at,
        }
    }
}

// ============================================
// Trace events
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct EventRow {
    pub id: i64,
    pub event_type: String,
    pub session_id: Option<String>,
    pub agent_name: Option<String>,
    pub data: JsonValue,
    pub created_at: DateTime<Utc>,
}
