// Error types for the orchestration engine
//
// The taxonomy separates outcomes callers must tell apart:
// - Configuration: bad wiring (unknown agent, delegation too deep) - fatal, never retried
// - Provider/Embedding: transport failures at a collaborator boundary - fatal to the run
// - ToolExecution: contained per-call, fed back to the model as an error result
// - Validation: fail-fast at construction time
// - BoundExceeded: the plumbing gave up (loop ceiling, parallel timeout),
//   distinguishable from "the agent said no"
// - Interrupt: not a failure; a control-flow carrier converted to a run outcome
//   at the loop boundary

use thiserror::Error;

use crate::interrupt::InterruptSignal;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors that can occur during agent execution and workflow orchestration
#[derive(Debug, Error)]
pub enum AgentError {
    /// Bad agent/tool wiring, unknown agent name, delegation depth exceeded
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Completion provider transport/auth failure
    #[error("Provider error: {0}")]
    Provider(String),

    /// Tool execution failure (contained per-call by the run loop)
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// Construction-time validation failure (bad schema, score out of range)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Plan generation or plan-step execution failure
    #[error("Planning error{}: {reason}", step.map(|s| format!(" at step {}", s)).unwrap_or_default())]
    Planning { step: Option<u32>, reason: String },

    /// A configured bound was hit: loop iteration ceiling, parallel wait timeout
    #[error("Bound exceeded: {0}")]
    BoundExceeded(String),

    /// Attempt to resolve an interrupt that is not pending
    #[error("Interrupt resolution error: {0}")]
    InterruptResolution(String),

    /// Embedding provider failure (input too long, transport error)
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Persistence collaborator failure
    #[error("Store error: {0}")]
    Store(String),

    /// Control-flow carrier: a tool requested human input.
    /// Caught exactly at the run-loop boundary and converted into
    /// `RunOutcome::Interrupted`; it never escapes a run.
    #[error("Execution interrupted: {}", .0.reason)]
    Interrupt(InterruptSignal),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AgentError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        AgentError::Configuration(msg.into())
    }

    /// Create a provider error
    pub fn provider(msg: impl Into<String>) -> Self {
        AgentError::Provider(msg.into())
    }

    /// Create a tool execution error
    pub fn tool(msg: impl Into<String>) -> Self {
        AgentError::ToolExecution(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        AgentError::Validation(msg.into())
    }

    /// Create a planning error not tied to a specific step
    pub fn planning(reason: impl Into<String>) -> Self {
        AgentError::Planning {
            step: None,
            reason: reason.into(),
        }
    }

    /// Create a planning error for a specific step
    pub fn planning_step(step: u32, reason: impl Into<String>) -> Self {
        AgentError::Planning {
            step: Some(step),
            reason: reason.into(),
        }
    }

    /// Create a bound-exceeded error
    pub fn bound(msg: impl Into<String>) -> Self {
        AgentError::BoundExceeded(msg.into())
    }

    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        AgentError::Store(msg.into())
    }

    /// Create an embedding error
    pub fn embedding(msg: impl Into<String>) -> Self {
        AgentError::Embedding(msg.into())
    }

    /// True if this error is fatal to the current run (as opposed to a
    /// per-tool failure the loop can absorb)
    pub fn is_fatal(&self) -> bool {
        !matches!(self, AgentError::ToolExecution(_) | AgentError::Interrupt(_))
    }
}
