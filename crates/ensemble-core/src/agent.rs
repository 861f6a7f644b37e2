// Agent definition and registry
//
// An agent is a named, configured unit: instructions, a model, tool names,
// and optional sub-agents it may delegate to. The registry is an explicit
// typed map populated at startup; referring to an unknown agent name is a
// configuration error, surfaced immediately.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};
use crate::provider::GenerationParams;

/// Default cap on tool-call loop turns within one run
pub const DEFAULT_MAX_ITERATIONS: usize = 10;

/// Default cap on sub-agent delegation depth from the root invocation
pub const DEFAULT_MAX_DELEGATION_DEPTH: usize = 5;

/// Declared configuration of one agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    /// Unique agent name (the registry key)
    pub name: String,

    /// Human-readable description (also shown to parents that delegate here)
    #[serde(default)]
    pub description: String,

    /// System instructions defining the agent's behavior
    pub instructions: String,

    /// Model identifier passed through to the completion provider
    pub model: String,

    /// Names of tools (resolved against the ToolRegistry) visible to this agent
    #[serde(default)]
    pub tool_names: Vec<String>,

    /// Sub-agents this agent may delegate to (each becomes a synthetic tool)
    #[serde(default)]
    pub sub_agents: Vec<String>,

    /// Maximum tool-call loop turns per run
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Maximum delegation depth counted from the root invocation
    #[serde(default = "default_max_delegation_depth")]
    pub max_delegation_depth: usize,

    /// Inject the agent's persisted memory block into the prompt
    #[serde(default = "default_true")]
    pub include_memory_context: bool,

    /// Default sampling parameters (per-invocation overrides win)
    #[serde(default)]
    pub params: GenerationParams,
}

fn default_max_iterations() -> usize {
    DEFAULT_MAX_ITERATIONS
}

fn default_max_delegation_depth() -> usize {
    DEFAULT_MAX_DELEGATION_DEPTH
}

fn default_true() -> bool {
    true
}

impl AgentDefinition {
    /// Create a new agent definition
    pub fn new(
        name: impl Into<String>,
        instructions: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            instructions: instructions.into(),
            model: model.into(),
            tool_names: Vec::new(),
            sub_agents: Vec::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_delegation_depth: DEFAULT_MAX_DELEGATION_DEPTH,
            include_memory_context: true,
            params: GenerationParams::default(),
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add tool names
    pub fn with_tools(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tool_names.extend(names.into_iter().map(Into::into));
        self
    }

    /// Add sub-agents available for delegation
    pub fn with_sub_agents(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.sub_agents.extend(names.into_iter().map(Into::into));
        self
    }

    /// Set the tool-call loop ceiling
    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    /// Set the delegation depth limit
    pub fn with_max_delegation_depth(mut self, max: usize) -> Self {
        self.max_delegation_depth = max;
        self
    }

    /// Disable memory-context injection
    pub fn without_memory_context(mut self) -> Self {
        self.include_memory_context = false;
        self
    }

    /// Set default temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.params.temperature = Some(temperature);
        self
    }

    /// Set default max tokens
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.params.max_tokens = Some(max_tokens);
        self
    }
}

/// Explicit typed registry mapping agent names to definitions.
///
/// Populated at process startup; preserves "refer to an agent by name"
/// ergonomics without stringly-typed reflection.
#[derive(Debug, Default, Clone)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<AgentDefinition>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: HashMap::new(),
        }
    }

    /// Register an agent definition under its name
    pub fn register(&mut self, definition: AgentDefinition) {
        self.agents
            .insert(definition.name.clone(), Arc::new(definition));
    }

    /// Look up an agent by name
    pub fn get(&self, name: &str) -> Option<Arc<AgentDefinition>> {
        self.agents.get(name).cloned()
    }

    /// Look up an agent by name, failing with a configuration error
    pub fn resolve(&self, name: &str) -> Result<Arc<AgentDefinition>> {
        self.get(name)
            .ok_or_else(|| AgentError::config(format!("Unknown agent: {}", name)))
    }

    /// All registered agent names
    pub fn names(&self) -> Vec<String> {
        self.agents.keys().cloned().collect()
    }
}
