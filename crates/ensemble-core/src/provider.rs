// Completion provider boundary
//
// The engine consumes an opaque completion capability: given instructions,
// history, tool schemas, and generation parameters, the provider returns
// either a final answer or a list of tool-call requests. Transport/auth
// failures must surface as a distinguishable error; the engine never
// retries them (retry policy belongs to the transport or an outer job
// layer).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::Message;
use crate::tool::{ToolCall, ToolDefinition};

/// Generation parameters for one completion call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
}

impl GenerationParams {
    /// Overlay: values set on `self` win over `base`
    pub fn merged_over(&self, base: &GenerationParams) -> GenerationParams {
        GenerationParams {
            temperature: self.temperature.or(base.temperature),
            max_tokens: self.max_tokens.or(base.max_tokens),
            top_p: self.top_p.or(base.top_p),
        }
    }
}

/// A structured prompt for the completion provider
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Model identifier (e.g., "gpt-5.2", "claude-sonnet-4-5")
    pub model: String,
    /// Full prompt: system instructions first, then history in append order
    pub messages: Vec<Message>,
    /// Tool schemas visible to the model for this call
    pub tools: Vec<ToolDefinition>,
    /// Sampling parameters
    pub params: GenerationParams,
}

/// Provider response: a final answer, tool-call requests, or both
#[derive(Debug, Clone, Default)]
pub struct CompletionResponse {
    /// Final (or interim) text answer
    pub text: Option<String>,
    /// Tool-call requests, in the order the model issued them
    pub tool_calls: Vec<ToolCall>,
}

impl CompletionResponse {
    /// Create a text-only response
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            tool_calls: Vec::new(),
        }
    }

    /// Create a response requesting tool calls
    pub fn with_tools(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            text: None,
            tool_calls,
        }
    }

    /// Whether the model requested any tool calls
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Trait for completion providers.
///
/// Implementations own transport, auth, and any retry policy; failures map
/// to `AgentError::Provider` and are fatal to the current run.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;
}
