// Database-backed ContextStore
//
// The session row holds the state blob and last input; history lives in the
// messages table, ordered by an append sequence. Saving is idempotent for
// history: message ids are stable, so re-inserting an already-persisted
// message is a no-op and only the new tail of the history lands as rows.

use async_trait::async_trait;
use ensemble_core::{AgentContext, AgentError, ContextStore, MessageRole, Result};
use uuid::Uuid;

use crate::models::CreateMessageRow;
use crate::repositories::Database;

#[derive(Clone)]
pub struct DbContextStore {
    db: Database,
}

impl DbContextStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ContextStore for DbContextStore {
    async fn load(&self, session_id: &str, agent_name: &str) -> Result<Option<AgentContext>> {
        let session = match self
            .db
            .get_session(session_id, agent_name)
            .await
            .map_err(|e| AgentError::store(e.to_string()))?
        {
            Some(session) => session,
            None => return Ok(None),
        };

        let mut context = AgentContext::new(&session.session_id);
        context.set_user_input(session.user_input);
        if let Ok(state) = serde_json::from_value(session.state) {
            context.load_state(state);
        }

        let rows = self
            .db
            .list_messages(session_id, agent_name)
            .await
            .map_err(|e| AgentError::store(e.to_string()))?;
        for row in rows {
            context.add_message(row.into_message());
        }
        Ok(Some(context))
    }

    async fn save(&self, agent_name: &str, context: &AgentContext) -> Result<()> {
        self.db
            .upsert_session(
                context.session_id(),
                agent_name,
                context.user_input().clone(),
                context.state_json(),
            )
            .await
            .map_err(|e| AgentError::store(e.to_string()))?;

        // Turn grouping: every message is anchored to the user message that
        // opened its exchange, which keeps the grouping stable across saves
        let mut turn_anchor: Option<Uuid> = None;
        for message in context.history() {
            if message.role == MessageRole::User {
                turn_anchor = Some(message.id);
            }
            let tool_calls = message
                .tool_calls
                .as_ref()
                .and_then(|calls| serde_json::to_value(calls).ok());
            let row = CreateMessageRow {
                id: message.id,
                session_id: context.session_id().to_string(),
                agent_name: agent_name.to_string(),
                role: message.role.to_string(),
                content: message.content.clone(),
                tool_name: message.tool_name.clone(),
                tool_call_id: message.tool_call_id.clone(),
                tool_calls,
                turn_uuid: turn_anchor.unwrap_or(message.id),
                user_message_id: turn_anchor,
                variant_index: 0,
                created_at: message.created_at,
            };
            self.db
                .insert_message(row)
                .await
                .map_err(|e| AgentError::store(e.to_string()))?;
        }
        Ok(())
    }
}
