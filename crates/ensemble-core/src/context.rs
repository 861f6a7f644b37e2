// AgentContext - execution-scoped state container
//
// One AgentContext is exclusively owned by one run of one (session, agent)
// pair. It is pure data: persistence is the ContextStore's job, and the
// persisted copy is the source of truth between runs. State writes are
// immediately visible to subsequent reads within the same run; history is
// append-only.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;
use crate::message::Message;

/// Mutable execution-scoped state for one agent invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentContext {
    /// Stable key for persistence, grouping one user's ongoing interaction
    /// with one agent
    session_id: String,

    /// The single input slot for the current run (string or structured)
    user_input: Value,

    /// String-keyed scratch state, arbitrary JSON values
    state: HashMap<String, Value>,

    /// Ordered conversation history, append-only during a run
    history: Vec<Message>,
}

impl AgentContext {
    /// Create an empty context for a session
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_input: Value::Null,
            state: HashMap::new(),
            history: Vec::new(),
        }
    }

    /// Create a context with a freshly generated ephemeral session id
    pub fn ephemeral() -> Self {
        Self::new(Uuid::now_v7().to_string())
    }

    /// The session id this context is keyed by
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Get a state value by key
    pub fn state(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    /// Get a state value, falling back to a default
    pub fn state_or(&self, key: &str, default: Value) -> Value {
        self.state.get(key).cloned().unwrap_or(default)
    }

    /// Set a state value; immediately visible to subsequent reads
    pub fn set_state(&mut self, key: impl Into<String>, value: Value) {
        self.state.insert(key.into(), value);
    }

    /// Merge a map into state; later keys overwrite existing ones
    pub fn load_state(&mut self, values: HashMap<String, Value>) {
        self.state.extend(values);
    }

    /// Snapshot of the full state map
    pub fn state_map(&self) -> &HashMap<String, Value> {
        &self.state
    }

    /// The current user input
    pub fn user_input(&self) -> &Value {
        &self.user_input
    }

    /// User input rendered as text (structured inputs serialize to JSON)
    pub fn user_input_text(&self) -> String {
        match &self.user_input {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    /// Rewrite the input slot (used when a tool or delegation rewrites
    /// input for a sub-call)
    pub fn set_user_input(&mut self, input: Value) {
        self.user_input = input;
    }

    /// Append a message to the history. There is no mutation/removal API:
    /// history order is the source of truth for prompt construction.
    pub fn add_message(&mut self, message: Message) {
        self.history.push(message);
    }

    /// The conversation history, in append order
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Serialize state alone (persisted independently of history)
    pub fn state_json(&self) -> Value {
        serde_json::to_value(&self.state).unwrap_or(Value::Null)
    }

    /// Serialize history alone (persisted independently of state)
    pub fn history_json(&self) -> Value {
        serde_json::to_value(&self.history).unwrap_or(Value::Null)
    }
}

/// Persistence boundary for contexts, keyed by (session_id, agent_name).
/// The persisted copy is the source of truth between runs; within a run the
/// in-memory context is authoritative and saved back at the end.
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Load the persisted context; None when the session has no history yet
    async fn load(&self, session_id: &str, agent_name: &str) -> Result<Option<AgentContext>>;

    /// Persist the full context state (last writer wins)
    async fn save(&self, agent_name: &str, context: &AgentContext) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_state_visible_immediately() {
        let mut ctx = AgentContext::new("s1");
        ctx.set_state("count", serde_json::json!(1));
        assert_eq!(ctx.state("count"), Some(&serde_json::json!(1)));
        ctx.set_state("count", serde_json::json!(2));
        assert_eq!(ctx.state("count"), Some(&serde_json::json!(2)));
    }

    #[test]
    fn test_load_state_later_keys_win() {
        let mut ctx = AgentContext::new("s1");
        ctx.set_state("a", serde_json::json!("old"));
        let mut incoming = HashMap::new();
        incoming.insert("a".to_string(), serde_json::json!("new"));
        incoming.insert("b".to_string(), serde_json::json!(true));
        ctx.load_state(incoming);
        assert_eq!(ctx.state("a"), Some(&serde_json::json!("new")));
        assert_eq!(ctx.state("b"), Some(&serde_json::json!(true)));
    }

    #[test]
    fn test_history_append_order() {
        let mut ctx = AgentContext::new("s1");
        ctx.add_message(Message::user("first"));
        ctx.add_message(Message::assistant("second"));
        let roles: Vec<String> = ctx.history().iter().map(|m| m.role.to_string()).collect();
        assert_eq!(roles, vec!["user", "assistant"]);
    }

    #[test]
    fn test_state_and_history_serialize_independently() {
        let mut ctx = AgentContext::new("s1");
        ctx.set_state("k", serde_json::json!("v"));
        ctx.add_message(Message::user("hi"));

        let state = ctx.state_json();
        let history = ctx.history_json();
        assert_eq!(state["k"], "v");
        assert_eq!(history.as_array().map(|a| a.len()), Some(1));
    }

    #[test]
    fn test_user_input_text_rendering() {
        let mut ctx = AgentContext::new("s1");
        ctx.set_user_input(serde_json::json!("plain"));
        assert_eq!(ctx.user_input_text(), "plain");
        ctx.set_user_input(serde_json::json!({"q": 1}));
        assert_eq!(ctx.user_input_text(), r#"{"q":1}"#);
    }
}
