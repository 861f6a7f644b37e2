// Agent memory - durable knowledge persisted across sessions
//
// Memory is keyed by (agent_name, user_id): an agent accumulates entries,
// key learnings, and a running summary over many runs. The run loop injects
// a rendered context block into the prompt (when the agent opts in) and
// applies model-proposed deltas after a run. A malformed delta degrades to
// no update, never a failed run.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One remembered fact or observation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Free-form category (e.g., "preference", "fact", "outcome")
    pub kind: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl MemoryEntry {
    pub fn new(kind: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// Everything an agent remembers for one user scope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMemory {
    pub agent_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub entries: Vec<MemoryEntry>,
    #[serde(default)]
    pub key_learnings: Vec<String>,
    #[serde(default)]
    pub summary: String,
    pub updated_at: DateTime<Utc>,
}

impl AgentMemory {
    pub fn new(agent_name: impl Into<String>, user_id: Option<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            user_id,
            entries: Vec::new(),
            key_learnings: Vec::new(),
            summary: String::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.key_learnings.is_empty() && self.summary.is_empty()
    }

    /// Apply a model-proposed delta in place
    pub fn apply(&mut self, delta: MemoryDelta) {
        for entry in delta.entries {
            self.entries.push(entry);
        }
        for learning in delta.key_learnings {
            if !self.key_learnings.contains(&learning) {
                self.key_learnings.push(learning);
            }
        }
        if let Some(summary) = delta.summary {
            self.summary = summary;
        }
        self.updated_at = Utc::now();
    }

    /// Render the memory block injected into the prompt. Empty memory
    /// renders to None so the prompt stays untouched.
    pub fn context_block(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        let mut block = String::from("## Persistent memory\n");
        if !self.summary.is_empty() {
            block.push_str(&format!("Summary: {}\n", self.summary));
        }
        if !self.key_learnings.is_empty() {
            block.push_str("Key learnings:\n");
            for learning in &self.key_learnings {
                block.push_str(&format!("- {}\n", learning));
            }
        }
        if !self.entries.is_empty() {
            block.push_str("Notes:\n");
            for entry in &self.entries {
                block.push_str(&format!("- [{}] {}\n", entry.kind, entry.content));
            }
        }
        Some(block)
    }
}

/// A model-proposed memory update, extracted from the final answer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryDelta {
    #[serde(default)]
    pub entries: Vec<MemoryEntry>,
    #[serde(default)]
    pub key_learnings: Vec<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

impl MemoryDelta {
    /// Parse a delta out of raw model output. The expected shape is a JSON
    /// object with optional `entries`, `key_learnings`, and `summary`
    /// fields; anything else yields None (no memory update, run unaffected).
    pub fn from_model_output(output: &str) -> Option<MemoryDelta> {
        let raw = crate::planner::extract_json_block(output)?;
        serde_json::from_str(&raw).ok()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.key_learnings.is_empty() && self.summary.is_none()
    }
}

/// Persistence boundary for agent memory
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Load memory for (agent_name, user_id); None when nothing is stored yet
    async fn load(&self, agent_name: &str, user_id: Option<&str>) -> Result<Option<AgentMemory>>;

    /// Persist the full memory state (last writer wins)
    async fn save(&self, memory: &AgentMemory) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_memory_renders_no_block() {
        let memory = AgentMemory::new("helper", None);
        assert!(memory.context_block().is_none());
    }

    #[test]
    fn test_context_block_includes_all_sections() {
        let mut memory = AgentMemory::new("helper", Some("u1".into()));
        memory.apply(MemoryDelta {
            entries: vec![MemoryEntry::new("preference", "prefers metric units")],
            key_learnings: vec!["responds well to short answers".to_string()],
            summary: Some("Long-time user, travel planning focus".to_string()),
        });

        let block = memory.context_block().unwrap();
        assert!(block.contains("Summary: Long-time user"));
        assert!(block.contains("- responds well to short answers"));
        assert!(block.contains("[preference] prefers metric units"));
    }

    #[test]
    fn test_apply_deduplicates_learnings_and_replaces_summary() {
        let mut memory = AgentMemory::new("helper", None);
        let delta = MemoryDelta {
            entries: Vec::new(),
            key_learnings: vec!["likes brevity".to_string()],
            summary: Some("v1".to_string()),
        };
        memory.apply(delta.clone());
        memory.apply(delta);
        memory.apply(MemoryDelta {
            summary: Some("v2".to_string()),
            ..Default::default()
        });

        assert_eq!(memory.key_learnings, vec!["likes brevity"]);
        assert_eq!(memory.summary, "v2");
    }

    #[test]
    fn test_malformed_delta_degrades_to_none() {
        assert!(MemoryDelta::from_model_output("not json at all").is_none());
        assert!(MemoryDelta::from_model_output("{\"entries\": \"oops").is_none());
    }

    #[test]
    fn test_delta_parses_from_fenced_output() {
        let output = r#"Here is the update:
```json
{"key_learnings": ["user is in UTC+2"], "summary": "short"}
```"#;
        let delta = MemoryDelta::from_model_output(output).unwrap();
        assert_eq!(delta.key_learnings, vec!["user is in UTC+2"]);
        assert_eq!(delta.summary.as_deref(), Some("short"));
    }
}
