// Execution lifecycle events
//
// The run loop and workflow engine emit these for an external trace sink
// (tracing storage, SSE, dashboards). Emission is fire-and-forget from the
// engine's perspective: a sink that fails must not fail the run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events emitted during agent and workflow execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// An agent run is starting
    ExecutionStarting {
        agent: String,
        session_id: String,
        timestamp: DateTime<Utc>,
    },

    /// An agent run finished (any outcome)
    ExecutionFinished {
        agent: String,
        session_id: String,
        outcome: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A completion-provider call is being issued
    LlmCallInitiating {
        agent: String,
        session_id: String,
        model: String,
        timestamp: DateTime<Utc>,
    },

    /// A completion-provider response arrived
    LlmCallReceived {
        agent: String,
        session_id: String,
        has_tool_calls: bool,
        timestamp: DateTime<Utc>,
    },

    /// A completion-provider call failed (fatal to the run)
    LlmCallFailed {
        agent: String,
        session_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// A tool call is being dispatched
    ToolCallInitiating {
        agent: String,
        session_id: String,
        tool_call_id: String,
        tool_name: String,
        timestamp: DateTime<Utc>,
    },

    /// A tool call completed successfully
    ToolCallCompleted {
        agent: String,
        session_id: String,
        tool_call_id: String,
        tool_name: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A tool call failed (contained; the run continues)
    ToolCallFailed {
        agent: String,
        session_id: String,
        tool_call_id: String,
        tool_name: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Context state was written
    StateUpdated {
        agent: String,
        session_id: String,
        key: String,
        timestamp: DateTime<Utc>,
    },

    /// A task was delegated to a sub-agent
    TaskDelegated {
        agent: String,
        session_id: String,
        sub_agent: String,
        depth: usize,
        timestamp: DateTime<Utc>,
    },

    /// Agent memory was written
    MemoryUpdated {
        agent: String,
        timestamp: DateTime<Utc>,
    },

    /// A run raised an interrupt and is suspended
    InterruptRequested {
        agent: String,
        session_id: String,
        interrupt_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A pending interrupt was approved
    InterruptApproved {
        interrupt_id: String,
        resolved_by: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A pending interrupt was rejected
    InterruptRejected {
        interrupt_id: String,
        resolved_by: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A workflow started
    WorkflowStarted {
        workflow: String,
        kind: String,
        timestamp: DateTime<Utc>,
    },

    /// One workflow step finished
    WorkflowStepCompleted {
        workflow: String,
        step: String,
        success: bool,
        timestamp: DateTime<Utc>,
    },

    /// A workflow finished
    WorkflowFinished {
        workflow: String,
        success: bool,
        payload: Value,
        timestamp: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    pub fn execution_starting(agent: impl Into<String>, session_id: impl Into<String>) -> Self {
        ExecutionEvent::ExecutionStarting {
            agent: agent.into(),
            session_id: session_id.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn execution_finished(
        agent: impl Into<String>,
        session_id: impl Into<String>,
        outcome: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        ExecutionEvent::ExecutionFinished {
            agent: agent.into(),
            session_id: session_id.into(),
            outcome: outcome.into(),
            duration_ms,
            timestamp: Utc::now(),
        }
    }

    pub fn llm_call_initiating(
        agent: impl Into<String>,
        session_id: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        ExecutionEvent::LlmCallInitiating {
            agent: agent.into(),
            session_id: session_id.into(),
            model: model.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn llm_call_received(
        agent: impl Into<String>,
        session_id: impl Into<String>,
        has_tool_calls: bool,
    ) -> Self {
        ExecutionEvent::LlmCallReceived {
            agent: agent.into(),
            session_id: session_id.into(),
            has_tool_calls,
            timestamp: Utc::now(),
        }
    }

    pub fn llm_call_failed(
        agent: impl Into<String>,
        session_id: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        ExecutionEvent::LlmCallFailed {
            agent: agent.into(),
            session_id: session_id.into(),
            error: error.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn tool_call_initiating(
        agent: impl Into<String>,
        session_id: impl Into<String>,
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
    ) -> Self {
        ExecutionEvent::ToolCallInitiating {
            agent: agent.into(),
            session_id: session_id.into(),
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn tool_call_completed(
        agent: impl Into<String>,
        session_id: impl Into<String>,
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        ExecutionEvent::ToolCallCompleted {
            agent: agent.into(),
            session_id: session_id.into(),
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            duration_ms,
            timestamp: Utc::now(),
        }
    }

    pub fn tool_call_failed(
        agent: impl Into<String>,
        session_id: impl Into<String>,
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        ExecutionEvent::ToolCallFailed {
            agent: agent.into(),
            session_id: session_id.into(),
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            error: error.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn state_updated(
        agent: impl Into<String>,
        session_id: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        ExecutionEvent::StateUpdated {
            agent: agent.into(),
            session_id: session_id.into(),
            key: key.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn task_delegated(
        agent: impl Into<String>,
        session_id: impl Into<String>,
        sub_agent: impl Into<String>,
        depth: usize,
    ) -> Self {
        ExecutionEvent::TaskDelegated {
            agent: agent.into(),
            session_id: session_id.into(),
            sub_agent: sub_agent.into(),
            depth,
            timestamp: Utc::now(),
        }
    }

    pub fn memory_updated(agent: impl Into<String>) -> Self {
        ExecutionEvent::MemoryUpdated {
            agent: agent.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn interrupt_requested(
        agent: impl Into<String>,
        session_id: impl Into<String>,
        interrupt_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        ExecutionEvent::InterruptRequested {
            agent: agent.into(),
            session_id: session_id.into(),
            interrupt_id: interrupt_id.into(),
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn interrupt_approved(
        interrupt_id: impl Into<String>,
        resolved_by: Option<String>,
    ) -> Self {
        ExecutionEvent::InterruptApproved {
            interrupt_id: interrupt_id.into(),
            resolved_by,
            timestamp: Utc::now(),
        }
    }

    pub fn interrupt_rejected(
        interrupt_id: impl Into<String>,
        resolved_by: Option<String>,
    ) -> Self {
        ExecutionEvent::InterruptRejected {
            interrupt_id: interrupt_id.into(),
            resolved_by,
            timestamp: Utc::now(),
        }
    }

    pub fn workflow_started(workflow: impl Into<String>, kind: impl Into<String>) -> Self {
        ExecutionEvent::WorkflowStarted {
            workflow: workflow.into(),
            kind: kind.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn workflow_step_completed(
        workflow: impl Into<String>,
        step: impl Into<String>,
        success: bool,
    ) -> Self {
        ExecutionEvent::WorkflowStepCompleted {
            workflow: workflow.into(),
            step: step.into(),
            success,
            timestamp: Utc::now(),
        }
    }

    pub fn workflow_finished(workflow: impl Into<String>, success: bool, payload: Value) -> Self {
        ExecutionEvent::WorkflowFinished {
            workflow: workflow.into(),
            success,
            payload,
            timestamp: Utc::now(),
        }
    }
}

// ============================================================================
// EventSink - fire-and-forget consumer boundary
// ============================================================================

/// Trait for trace sinks. `emit` must not fail the caller: implementations
/// swallow and log their own errors.
#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: ExecutionEvent);
}

/// Sink that discards all events
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait::async_trait]
impl EventSink for NullSink {
    async fn emit(&self, _event: ExecutionEvent) {}
}

/// Sink that forwards events over an mpsc channel (e.g., toward SSE or a
/// tracing-store consumer). A closed or full channel drops the event.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: tokio::sync::mpsc::Sender<ExecutionEvent>,
}

impl ChannelSink {
    pub fn new(tx: tokio::sync::mpsc::Sender<ExecutionEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait::async_trait]
impl EventSink for ChannelSink {
    async fn emit(&self, event: ExecutionEvent) {
        if let Err(e) = self.tx.try_send(event) {
            tracing::debug!(error = %e, "event sink channel unavailable, dropping event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_tag() {
        let event = ExecutionEvent::execution_starting("helper", "s1");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "execution_starting");
        assert_eq!(json["agent"], "helper");
    }

    #[tokio::test]
    async fn test_channel_sink_drops_when_closed() {
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        drop(rx);
        // Must not panic or error
        ChannelSink::new(tx)
            .emit(ExecutionEvent::memory_updated("helper"))
            .await;
    }
}
