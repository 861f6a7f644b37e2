// Database-backed EventSink
//
// Appends trace events as rows an async consumer can tail. Emission is
// fire-and-forget per the EventSink contract: a write failure is logged
// and swallowed, never surfaced to the run.

use async_trait::async_trait;
use ensemble_core::{EventSink, ExecutionEvent};
use serde_json::Value;

use crate::repositories::Database;

#[derive(Clone)]
pub struct DbEventSink {
    db: Database,
}

impl DbEventSink {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl EventSink for DbEventSink {
    async fn emit(&self, event: ExecutionEvent) {
        let data = match serde_json::to_value(&event) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize trace event");
                return;
            }
        };
        let event_type = data
            .get("event")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let session_id = data
            .get("session_id")
            .and_then(Value::as_str)
            .map(String::from);
        let agent_name = data.get("agent").and_then(Value::as_str).map(String::from);

        if let Err(e) = self
            .db
            .insert_event(
                &event_type,
                session_id.as_deref(),
                agent_name.as_deref(),
                data,
            )
            .await
        {
            tracing::warn!(error = %e, event_type = %event_type, "failed to persist trace event");
        }
    }
}
