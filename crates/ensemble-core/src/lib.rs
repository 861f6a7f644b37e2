// Agent Orchestration Engine
//
// This crate provides a DB-agnostic engine for tool-using LLM agents and
// their composition into workflows.
//
// Key design decisions:
// - Collaborators are traits (CompletionProvider, ContextStore, MemoryStore,
//   InterruptStore, VectorMemoryStore, EventSink) for pluggable backends
// - One run ends in a closed sum (RunOutcome): completed, interrupted, failed
// - Interrupts are durable records, not blocked threads; a suspended run is
//   resumed by a fresh invocation after human resolution
// - Agents and tools live in explicit typed registries populated at startup
// - Workflows are a tree of WorkflowNode values; composites nest freely and
//   have a serializable descriptor form (WorkflowSpec)
// - Plan -> act -> reflect is layered on top of the same runtime
// - In-memory implementations back the defaults, examples, and tests

pub mod agent;
pub mod context;
pub mod error;
pub mod events;
pub mod executor;
pub mod interrupt;
pub mod memory;
pub mod message;
pub mod plan;
pub mod planner;
pub mod provider;
pub mod runtime;
pub mod scheduler;
pub mod tool;
pub mod vector;
pub mod workflow;

// In-memory implementations for embedding and testing
pub mod in_memory;

// Re-exports for convenience
pub use agent::{AgentDefinition, AgentRegistry, DEFAULT_MAX_DELEGATION_DEPTH, DEFAULT_MAX_ITERATIONS};
pub use context::{AgentContext, ContextStore};
pub use error::{AgentError, Result};
pub use events::{ChannelSink, EventSink, ExecutionEvent, NullSink};
pub use executor::{AgentExecutor, JobHandle};
pub use interrupt::{
    AgentInterrupt, InterruptKind, InterruptResolver, InterruptSignal, InterruptStatus,
    InterruptStore,
};
pub use memory::{AgentMemory, MemoryDelta, MemoryEntry, MemoryStore};
pub use message::{Message, MessageRole};
pub use plan::{Plan, PlanStep, Reflection};
pub use planner::{PlanningAgent, PlanningResponse, PlanningStatus, DEFAULT_MAX_ATTEMPTS};
pub use provider::{CompletionProvider, CompletionRequest, CompletionResponse, GenerationParams};
pub use runtime::{AgentRuntime, RunOutcome, RuntimeBuilder, DELEGATE_TOOL_PREFIX};
pub use scheduler::{Schedule, ScheduledTask, Scheduler};
pub use tool::{AuthorizationContext, Tool, ToolCall, ToolDefinition, ToolRegistry, Toolbox};
pub use vector::{
    content_hash, cosine_similarity, EmbeddingProvider, VectorMemoryEntry, VectorMemoryStore,
    VectorSearchHit,
};
pub use workflow::{
    AgentNode, ConditionalArm, ConditionalWorkflow, LoopMode, LoopSpec, LoopWorkflow, NodeOutcome,
    ParallelWorkflow, Predicate, PredicateSpec, SequentialWorkflow, Transform, WorkflowNode,
    WorkflowSpec, DEFAULT_LOOP_CEILING,
};
