// Tool & Toolbox abstraction
//
// Tools are callable capabilities with a JSON-schema-shaped definition,
// invocable by the model during a run. Toolboxes group tools under an
// authorization gate; visibility is decided at three levels, all of which
// must pass: toolbox gate -> per-tool gate -> conditional inclusion.
//
// Authorization is an explicit AuthorizationContext passed in by the host,
// not an ambient global service.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::AgentContext;
use crate::error::{AgentError, Result};

/// JSON-schema-shaped capability descriptor exposed to the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's arguments
    pub parameters: Value,
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Trait for implementing tools executed by the run loop.
///
/// `definition()` is pure; `execute()` performs the tool's effect against
/// the current AgentContext and returns a JSON-string result. Invalid
/// arguments or internal failures must surface as a typed error, never a
/// silent empty result, so the loop can feed the failure back to the model.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The tool's capability descriptor (name must be unique per registry)
    fn definition(&self) -> ToolDefinition;

    /// Execute the tool with the given arguments
    async fn execute(&self, arguments: Value, context: &mut AgentContext) -> Result<String>;
}

// ============================================================================
// AuthorizationContext - explicit, host-injected capability checks
// ============================================================================

/// Actor identity plus a capability-check function injected by the host.
///
/// Carried into toolbox gates so authorization stays pluggable without any
/// ambient global lookup.
#[derive(Clone)]
pub struct AuthorizationContext {
    /// Acting user/principal, if known
    pub actor: Option<String>,
    check: Arc<dyn Fn(&str) -> bool + Send + Sync>,
}

impl AuthorizationContext {
    /// Context that grants every capability
    pub fn allow_all() -> Self {
        Self {
            actor: None,
            check: Arc::new(|_| true),
        }
    }

    /// Context that denies every capability
    pub fn deny_all() -> Self {
        Self {
            actor: None,
            check: Arc::new(|_| false),
        }
    }

    /// Context with a host-supplied capability check
    pub fn with_check(
        actor: Option<String>,
        check: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            actor,
            check: Arc::new(check),
        }
    }

    /// Check a capability name against the host policy
    pub fn can(&self, capability: &str) -> bool {
        (self.check)(capability)
    }
}

impl std::fmt::Debug for AuthorizationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationContext")
            .field("actor", &self.actor)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Toolbox - an authorized, named grouping of tools
// ============================================================================

/// An authorized grouping of tools.
///
/// The toolbox gate is evaluated once per toolbox before any of its tools
/// are exposed; per-tool gates and the conditional-inclusion predicate
/// narrow further. A tool is visible to the model only when all three pass.
pub trait Toolbox: Send + Sync {
    /// Toolbox name (used as the default capability name for gating)
    fn name(&self) -> &str;

    /// All tools in this toolbox, before any gating
    fn tools(&self) -> Vec<Arc<dyn Tool>>;

    /// Toolbox-level gate; default checks the toolbox name as a capability
    fn authorize(&self, auth: &AuthorizationContext) -> bool {
        auth.can(self.name())
    }

    /// Per-tool gate; default allows every tool the toolbox gate admitted
    fn tool_allowed(&self, _tool_name: &str, _auth: &AuthorizationContext) -> bool {
        true
    }

    /// Conditional inclusion against the current execution context;
    /// default includes everything
    fn include_tool(&self, _tool_name: &str, _context: &AgentContext) -> bool {
        true
    }

    /// Tools visible in the given authorization + execution context.
    /// Returns empty when the toolbox gate itself fails.
    fn authorized_tools(
        &self,
        auth: &AuthorizationContext,
        context: &AgentContext,
    ) -> Vec<Arc<dyn Tool>> {
        if !self.authorize(auth) {
            return Vec::new();
        }
        self.tools()
            .into_iter()
            .filter(|tool| {
                let name = tool.definition().name;
                self.tool_allowed(&name, auth) && self.include_tool(&name, context)
            })
            .collect()
    }
}

// ============================================================================
// ToolRegistry - typed name -> tool lookup
// ============================================================================

/// Explicit typed registry mapping tool names to implementations,
/// populated at process startup.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool; the last registration for a name wins
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.definition().name, tool);
    }

    /// Register every tool of a toolbox (ungated; gating applies at
    /// visibility time through the Toolbox trait)
    pub fn register_toolbox(&mut self, toolbox: &dyn Toolbox) {
        for tool in toolbox.tools() {
            self.register(tool);
        }
    }

    /// Resolve a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Resolve a tool by name, failing with a configuration error
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Tool>> {
        self.get(name)
            .ok_or_else(|| AgentError::config(format!("Unknown tool: {}", name)))
    }

    /// Definitions for a named subset, in the order given.
    /// Unknown names are a configuration error.
    pub fn definitions_for(&self, names: &[String]) -> Result<Vec<ToolDefinition>> {
        names
            .iter()
            .map(|name| self.resolve(name).map(|t| t.definition()))
            .collect()
    }

    /// All registered tool names
    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct StaticTool {
        name: &'static str,
    }

    #[async_trait]
    impl Tool for StaticTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: self.name.to_string(),
                description: "test tool".to_string(),
                parameters: json!({"type": "object", "properties": {}}),
            }
        }

        async fn execute(&self, _arguments: Value, _context: &mut AgentContext) -> Result<String> {
            Ok("ok".to_string())
        }
    }

    struct TestToolbox;

    impl Toolbox for TestToolbox {
        fn name(&self) -> &str {
            "reporting"
        }

        fn tools(&self) -> Vec<Arc<dyn Tool>> {
            vec![
                Arc::new(StaticTool { name: "export" }),
                Arc::new(StaticTool { name: "delete" }),
            ]
        }

        fn tool_allowed(&self, tool_name: &str, auth: &AuthorizationContext) -> bool {
            tool_name != "delete" || auth.can("reporting.delete")
        }

        fn include_tool(&self, tool_name: &str, context: &AgentContext) -> bool {
            tool_name != "export" || context.state("export_enabled").is_some()
        }
    }

    fn names(tools: &[Arc<dyn Tool>]) -> Vec<String> {
        tools.iter().map(|t| t.definition().name).collect()
    }

    #[test]
    fn test_toolbox_gate_blocks_everything() {
        let ctx = AgentContext::new("s");
        let visible = TestToolbox.authorized_tools(&AuthorizationContext::deny_all(), &ctx);
        assert!(visible.is_empty());
    }

    #[test]
    fn test_per_tool_gate_and_conditional_inclusion() {
        let toolbox = TestToolbox;

        // Toolbox allowed, per-tool capability missing, export not enabled
        let auth = AuthorizationContext::with_check(Some("u1".into()), |cap| cap == "reporting");
        let ctx = AgentContext::new("s");
        assert!(names(&toolbox.authorized_tools(&auth, &ctx)).is_empty());

        // Enable export via context state
        let mut ctx = AgentContext::new("s");
        ctx.set_state("export_enabled", json!(true));
        assert_eq!(names(&toolbox.authorized_tools(&auth, &ctx)), vec!["export"]);

        // Grant the delete capability as well
        let auth = AuthorizationContext::allow_all();
        let mut got = names(&toolbox.authorized_tools(&auth, &ctx));
        got.sort();
        assert_eq!(got, vec!["delete", "export"]);
    }

    #[test]
    fn test_registry_resolution() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(StaticTool { name: "echo" }));

        assert!(registry.get("echo").is_some());
        assert!(matches!(
            registry.resolve("missing"),
            Err(AgentError::Configuration(_))
        ));

        let defs = registry.definitions_for(&["echo".to_string()]).unwrap();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");
    }
}
