// AgentRuntime - the tool-call run loop
//
// One run: append the user input, then alternate provider calls and tool
// execution until the model answers without tool calls, a bound is hit, or
// a tool raises an interrupt. The three terminal shapes are a closed sum
// (RunOutcome), so callers match instead of string-matching exceptions:
// - tool failures are contained (fed back to the model as an error result)
// - provider failures are fatal
// - interrupts are caught here, persisted as pending records, and surfaced
//   as an outcome, never as an error
//
// Sub-agent delegation exposes each sub-agent as a synthetic
// `delegate_to_<name>` tool; depth is counted from the root invocation and
// capped by the agent's max_delegation_depth.

use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use serde_json::{json, Value};

use crate::agent::{AgentDefinition, AgentRegistry};
use crate::context::{AgentContext, ContextStore};
use crate::error::{AgentError, Result};
use crate::events::{EventSink, ExecutionEvent, NullSink};
use crate::interrupt::{AgentInterrupt, InterruptStore};
use crate::memory::{AgentMemory, MemoryDelta, MemoryStore};
use crate::message::Message;
use crate::provider::{CompletionProvider, CompletionRequest, GenerationParams};
use crate::tool::{AuthorizationContext, Toolbox, ToolCall, ToolDefinition, ToolRegistry};

/// Prefix for synthetic delegation tools
pub const DELEGATE_TOOL_PREFIX: &str = "delegate_to_";

/// Terminal shape of one agent run
#[derive(Debug)]
pub enum RunOutcome {
    /// The model produced a final answer
    Completed(String),
    /// A tool requested human input; the run is suspended behind this
    /// pending interrupt record
    Interrupted(AgentInterrupt),
    /// The run failed (provider error, configuration error, bound exceeded)
    Failed(AgentError),
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed(_))
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, RunOutcome::Interrupted(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, RunOutcome::Failed(_))
    }

    /// The final answer, for completed runs
    pub fn output(&self) -> Option<&str> {
        match self {
            RunOutcome::Completed(text) => Some(text),
            _ => None,
        }
    }

    /// Short label for events and logs
    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Completed(_) => "completed",
            RunOutcome::Interrupted(_) => "interrupted",
            RunOutcome::Failed(_) => "failed",
        }
    }
}

/// Result of one dispatched tool call
enum CallOutput {
    /// A tool-result payload for the history
    Text(String),
    /// A delegated run suspended on this already-persisted pending record
    Suspended(AgentInterrupt),
}

/// The engine: registries plus collaborator boundaries, wired once at
/// startup and shared across runs
pub struct AgentRuntime {
    agents: AgentRegistry,
    tools: ToolRegistry,
    toolboxes: Vec<Arc<dyn Toolbox>>,
    authorization: AuthorizationContext,
    provider: Arc<dyn CompletionProvider>,
    context_store: Arc<dyn ContextStore>,
    memory_store: Arc<dyn MemoryStore>,
    interrupt_store: Arc<dyn InterruptStore>,
    events: Arc<dyn EventSink>,
}

/// Builder for AgentRuntime; stores and the event sink default to the
/// in-memory/null implementations
pub struct RuntimeBuilder {
    agents: AgentRegistry,
    tools: ToolRegistry,
    toolboxes: Vec<Arc<dyn Toolbox>>,
    authorization: Option<AuthorizationContext>,
    provider: Arc<dyn CompletionProvider>,
    context_store: Option<Arc<dyn ContextStore>>,
    memory_store: Option<Arc<dyn MemoryStore>>,
    interrupt_store: Option<Arc<dyn InterruptStore>>,
    events: Option<Arc<dyn EventSink>>,
}

impl RuntimeBuilder {
    pub fn agents(mut self, agents: AgentRegistry) -> Self {
        self.agents = agents;
        self
    }

    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Add a toolbox; its tools join the registry at build time and stay
    /// behind the toolbox's gates
    pub fn toolbox(mut self, toolbox: Arc<dyn Toolbox>) -> Self {
        self.toolboxes.push(toolbox);
        self
    }

    /// Authorization context the toolbox gates are evaluated against;
    /// defaults to allow-all
    pub fn authorization(mut self, authorization: AuthorizationContext) -> Self {
        self.authorization = Some(authorization);
        self
    }

    pub fn context_store(mut self, store: Arc<dyn ContextStore>) -> Self {
        self.context_store = Some(store);
        self
    }

    pub fn memory_store(mut self, store: Arc<dyn MemoryStore>) -> Self {
        self.memory_store = Some(store);
        self
    }

    pub fn interrupt_store(mut self, store: Arc<dyn InterruptStore>) -> Self {
        self.interrupt_store = Some(store);
        self
    }

    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> AgentRuntime {
        let mut tools = self.tools;
        for toolbox in &self.toolboxes {
            tools.register_toolbox(toolbox.as_ref());
        }
        AgentRuntime {
            agents: self.agents,
            tools,
            toolboxes: self.toolboxes,
            authorization: self
                .authorization
                .unwrap_or_else(AuthorizationContext::allow_all),
            provider: self.provider,
            context_store: self
                .context_store
                .unwrap_or_else(|| Arc::new(crate::in_memory::InMemoryContextStore::new())),
            memory_store: self
                .memory_store
                .unwrap_or_else(|| Arc::new(crate::in_memory::InMemoryMemoryStore::new())),
            interrupt_store: self
                .interrupt_store
                .unwrap_or_else(|| Arc::new(crate::in_memory::InMemoryInterruptStore::new())),
            events: self.events.unwrap_or_else(|| Arc::new(NullSink)),
        }
    }
}

impl AgentRuntime {
    pub fn builder(provider: Arc<dyn CompletionProvider>) -> RuntimeBuilder {
        RuntimeBuilder {
            agents: AgentRegistry::new(),
            tools: ToolRegistry::new(),
            toolboxes: Vec::new(),
            authorization: None,
            provider,
            context_store: None,
            memory_store: None,
            interrupt_store: None,
            events: None,
        }
    }

    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn provider(&self) -> &Arc<dyn CompletionProvider> {
        &self.provider
    }

    pub fn context_store(&self) -> &Arc<dyn ContextStore> {
        &self.context_store
    }

    pub fn memory_store(&self) -> &Arc<dyn MemoryStore> {
        &self.memory_store
    }

    pub fn interrupt_store(&self) -> &Arc<dyn InterruptStore> {
        &self.interrupt_store
    }

    pub fn events(&self) -> &Arc<dyn EventSink> {
        &self.events
    }

    /// Run one agent to a terminal outcome at the root delegation depth
    pub async fn run(
        &self,
        agent_name: &str,
        context: &mut AgentContext,
        overrides: GenerationParams,
    ) -> RunOutcome {
        self.run_at_depth(agent_name, context, overrides, 0).await
    }

    /// Boxed recursion point used by delegation
    fn run_boxed<'a>(
        &'a self,
        agent_name: &'a str,
        context: &'a mut AgentContext,
        overrides: GenerationParams,
        depth: usize,
    ) -> BoxFuture<'a, RunOutcome> {
        Box::pin(self.run_at_depth(agent_name, context, overrides, depth))
    }

    async fn run_at_depth(
        &self,
        agent_name: &str,
        context: &mut AgentContext,
        overrides: GenerationParams,
        depth: usize,
    ) -> RunOutcome {
        let agent = match self.agents.resolve(agent_name) {
            Ok(agent) => agent,
            Err(e) => return RunOutcome::Failed(e),
        };
        let started = Instant::now();
        let session_id = context.session_id().to_string();
        self.events
            .emit(ExecutionEvent::execution_starting(&agent.name, &session_id))
            .await;

        let outcome = self.drive_loop(&agent, context, overrides, depth).await;

        self.events
            .emit(ExecutionEvent::execution_finished(
                &agent.name,
                &session_id,
                outcome.label(),
                started.elapsed().as_millis() as u64,
            ))
            .await;
        outcome
    }

    async fn drive_loop(
        &self,
        agent: &AgentDefinition,
        context: &mut AgentContext,
        overrides: GenerationParams,
        depth: usize,
    ) -> RunOutcome {
        let session_id = context.session_id().to_string();
        let params = overrides.merged_over(&agent.params);

        let tools = match self.visible_tools(agent, context) {
            Ok(tools) => tools,
            Err(e) => return RunOutcome::Failed(e),
        };

        let system = match self.system_message(agent, context).await {
            Ok(system) => system,
            Err(e) => return RunOutcome::Failed(e),
        };

        let input = context.user_input_text();
        if !input.is_empty() {
            context.add_message(Message::user(input));
        }

        for _ in 0..agent.max_iterations {
            self.events
                .emit(ExecutionEvent::llm_call_initiating(
                    &agent.name,
                    &session_id,
                    &agent.model,
                ))
                .await;

            let mut messages = Vec::with_capacity(context.history().len() + 1);
            messages.push(system.clone());
            messages.extend(context.history().iter().cloned());

            let request = CompletionRequest {
                model: agent.model.clone(),
                messages,
                tools: tools.clone(),
                params: params.clone(),
            };

            let response = match self.provider.complete(request).await {
                Ok(response) => response,
                Err(e) => {
                    self.events
                        .emit(ExecutionEvent::llm_call_failed(
                            &agent.name,
                            &session_id,
                            e.to_string(),
                        ))
                        .await;
                    return RunOutcome::Failed(e);
                }
            };
            self.events
                .emit(ExecutionEvent::llm_call_received(
                    &agent.name,
                    &session_id,
                    response.has_tool_calls(),
                ))
                .await;

            if !response.has_tool_calls() {
                let text = response.text.unwrap_or_default();
                context.add_message(Message::assistant(&text));
                return RunOutcome::Completed(text);
            }

            context.add_message(Message::assistant_with_tools(
                response.text.clone().unwrap_or_default(),
                response.tool_calls.clone(),
            ));

            for call in &response.tool_calls {
                match self.dispatch_call(agent, context, call, depth).await {
                    Ok(CallOutput::Text(result)) => {
                        context.add_message(Message::tool_result(&call.name, &call.id, result));
                    }
                    Ok(CallOutput::Suspended(record)) => {
                        // A delegated run already persisted and announced
                        // this pending record; surface it as ours
                        return RunOutcome::Interrupted(record);
                    }
                    Err(AgentError::Interrupt(signal)) => {
                        let record = AgentInterrupt::pending(&signal, &session_id, &agent.name);
                        let record = match self.interrupt_store.create(record).await {
                            Ok(record) => record,
                            Err(e) => return RunOutcome::Failed(e),
                        };
                        self.events
                            .emit(ExecutionEvent::interrupt_requested(
                                &agent.name,
                                &session_id,
                                &record.id,
                                &record.reason,
                            ))
                            .await;
                        return RunOutcome::Interrupted(record);
                    }
                    Err(e) if e.is_fatal() => return RunOutcome::Failed(e),
                    Err(e) => {
                        self.events
                            .emit(ExecutionEvent::tool_call_failed(
                                &agent.name,
                                &session_id,
                                &call.id,
                                &call.name,
                                e.to_string(),
                            ))
                            .await;
                        context.add_message(Message::tool_error(
                            &call.name,
                            &call.id,
                            e.to_string(),
                        ));
                    }
                }
            }
        }

        RunOutcome::Failed(AgentError::bound(format!(
            "agent '{}' hit the iteration ceiling of {}",
            agent.name, agent.max_iterations
        )))
    }

    /// Execute one tool call: a synthetic delegation tool or a registry tool
    async fn dispatch_call(
        &self,
        agent: &AgentDefinition,
        context: &mut AgentContext,
        call: &ToolCall,
        depth: usize,
    ) -> Result<CallOutput> {
        if let Some(sub_name) = call.name.strip_prefix(DELEGATE_TOOL_PREFIX) {
            if agent.sub_agents.iter().any(|s| s == sub_name) {
                return self.delegate(agent, context, sub_name, call, depth).await;
            }
        }

        let session_id = context.session_id().to_string();
        let tool = self.tools.resolve(&call.name)?;
        if !self.tool_authorized(&call.name, context) {
            return Err(AgentError::tool(format!(
                "tool '{}' is not authorized in this context",
                call.name
            )));
        }
        self.events
            .emit(ExecutionEvent::tool_call_initiating(
                &agent.name,
                &session_id,
                &call.id,
                &call.name,
            ))
            .await;
        let started = Instant::now();
        let result = tool.execute(call.arguments.clone(), context).await?;
        self.events
            .emit(ExecutionEvent::tool_call_completed(
                &agent.name,
                &session_id,
                &call.id,
                &call.name,
                started.elapsed().as_millis() as u64,
            ))
            .await;
        Ok(CallOutput::Text(result))
    }

    /// Run a sub-agent against a fresh context and return its answer as a
    /// tool result. Interrupts and fatal failures in the sub-run propagate.
    async fn delegate(
        &self,
        parent: &AgentDefinition,
        context: &AgentContext,
        sub_name: &str,
        call: &ToolCall,
        depth: usize,
    ) -> Result<CallOutput> {
        let next_depth = depth + 1;
        if next_depth > parent.max_delegation_depth {
            return Err(AgentError::config(format!(
                "delegation from '{}' to '{}' exceeds max depth {}",
                parent.name, sub_name, parent.max_delegation_depth
            )));
        }
        let task = call
            .arguments
            .get("task")
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::tool("delegation call missing string 'task' argument"))?;

        self.events
            .emit(ExecutionEvent::task_delegated(
                &parent.name,
                context.session_id(),
                sub_name,
                next_depth,
            ))
            .await;

        // Fresh context: the sub-agent sees the task plus a summary of where
        // the parent is, never the parent's full history
        let mut sub_context = AgentContext::ephemeral();
        sub_context.set_user_input(json!(task));
        sub_context.set_state("parent_agent", json!(parent.name));
        sub_context.set_state("parent_session_id", json!(context.session_id()));
        if let Some(user_id) = context.state("user_id") {
            sub_context.set_state("user_id", user_id.clone());
        }
        if let Some(summary) = last_assistant_text(context) {
            sub_context.set_state("parent_summary", json!(summary));
        }

        match self
            .run_boxed(sub_name, &mut sub_context, GenerationParams::default(), next_depth)
            .await
        {
            RunOutcome::Completed(text) => Ok(CallOutput::Text(text)),
            RunOutcome::Interrupted(record) => Ok(CallOutput::Suspended(record)),
            RunOutcome::Failed(e) if e.is_fatal() => Err(e),
            RunOutcome::Failed(e) => Err(AgentError::tool(format!(
                "delegated run to '{}' failed: {}",
                sub_name, e
            ))),
        }
    }

    /// Whether a tool passes its owning toolbox's gates in this context.
    /// Tools registered outside any toolbox are ungated.
    fn tool_authorized(&self, tool_name: &str, context: &AgentContext) -> bool {
        for toolbox in &self.toolboxes {
            let owns = toolbox
                .tools()
                .iter()
                .any(|t| t.definition().name == tool_name);
            if owns {
                return toolbox
                    .authorized_tools(&self.authorization, context)
                    .iter()
                    .any(|t| t.definition().name == tool_name);
            }
        }
        true
    }

    /// Tool schemas visible to the model: the agent's declared tools that
    /// pass their toolbox gates, plus a synthetic delegation tool per
    /// sub-agent
    fn visible_tools(
        &self,
        agent: &AgentDefinition,
        context: &AgentContext,
    ) -> Result<Vec<ToolDefinition>> {
        let mut tools = Vec::with_capacity(agent.tool_names.len() + agent.sub_agents.len());
        for name in &agent.tool_names {
            let tool = self.tools.resolve(name)?;
            if self.tool_authorized(name, context) {
                tools.push(tool.definition());
            }
        }
        for sub_name in &agent.sub_agents {
            let sub = self.agents.resolve(sub_name)?;
            tools.push(ToolDefinition {
                name: format!("{}{}", DELEGATE_TOOL_PREFIX, sub.name),
                description: format!(
                    "Delegate a task to the '{}' agent. {}",
                    sub.name, sub.description
                ),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "task": {
                            "type": "string",
                            "description": "The task for the sub-agent, phrased as an instruction"
                        }
                    },
                    "required": ["task"]
                }),
            });
        }
        Ok(tools)
    }

    /// System message: instructions plus the persisted memory block when the
    /// agent opts in
    async fn system_message(
        &self,
        agent: &AgentDefinition,
        context: &AgentContext,
    ) -> Result<Message> {
        let mut content = agent.instructions.clone();
        if agent.include_memory_context {
            let user_id = context.state("user_id").and_then(Value::as_str).map(String::from);
            if let Some(memory) = self
                .memory_store
                .load(&agent.name, user_id.as_deref())
                .await?
            {
                if let Some(block) = memory.context_block() {
                    content.push_str("\n\n");
                    content.push_str(&block);
                }
            }
        }
        Ok(Message::system(content))
    }

    /// Apply a memory delta for an agent and persist it
    pub async fn remember(
        &self,
        agent_name: &str,
        user_id: Option<&str>,
        delta: MemoryDelta,
    ) -> Result<()> {
        if delta.is_empty() {
            return Ok(());
        }
        let mut memory = self
            .memory_store
            .load(agent_name, user_id)
            .await?
            .unwrap_or_else(|| AgentMemory::new(agent_name, user_id.map(String::from)));
        memory.apply(delta);
        self.memory_store.save(&memory).await?;
        self.events
            .emit(ExecutionEvent::memory_updated(agent_name))
            .await;
        Ok(())
    }
}

fn last_assistant_text(context: &AgentContext) -> Option<String> {
    context
        .history()
        .iter()
        .rev()
        .find(|m| m.role == crate::message::MessageRole::Assistant && !m.content.is_empty())
        .map(|m| m.content.clone())
}
