// Database-backed MemoryStore
//
// One row per (agent_name, user_id); the empty user_id string is the
// agent-global scope, keeping the composite primary key non-null.

use async_trait::async_trait;
use ensemble_core::{AgentError, AgentMemory, MemoryStore, Result};
use serde_json::json;

use crate::repositories::Database;

#[derive(Clone)]
pub struct DbMemoryStore {
    db: Database,
}

impl DbMemoryStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MemoryStore for DbMemoryStore {
    async fn load(&self, agent_name: &str, user_id: Option<&str>) -> Result<Option<AgentMemory>> {
        let row = match self
            .db
            .get_memory(agent_name, user_id.unwrap_or(""))
            .await
            .map_err(|e| AgentError::store(e.to_string()))?
        {
            Some(row) => row,
            None => return Ok(None),
        };

        Ok(Some(AgentMemory {
            agent_name: row.agent_name,
            user_id: if row.user_id.is_empty() {
                None
            } else {
                Some(row.user_id)
            },
            entries: serde_json::from_value(row.entries).unwrap_or_default(),
            key_learnings: serde_json::from_value(row.key_learnings).unwrap_or_default(),
            summary: row.summary,
            updated_at: row.updated_at,
        }))
    }

    async fn save(&self, memory: &AgentMemory) -> Result<()> {
        let entries = serde_json::to_value(&memory.entries).unwrap_or_else(|_| json!([]));
        let key_learnings =
            serde_json::to_value(&memory.key_learnings).unwrap_or_else(|_| json!([]));
        self.db
            .upsert_memory(
                &memory.agent_name,
                memory.user_id.as_deref().unwrap_or(""),
                entries,
                key_learnings,
                &memory.summary,
                memory.updated_at,
            )
            .await
            .map_err(|e| AgentError::store(e.to_string()))
    }
}
