// AgentExecutor - fluent invocation front door
//
// Wraps the runtime with per-invocation configuration: user scope, session
// selection, seeded state, input, and sampling overrides. Session selection
// precedence is explicit session > user-derived session > fresh ephemeral
// session. Context is loaded before the run and persisted after it on every
// outcome, including interrupted and failed runs, so a resumed session sees
// everything that happened.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::context::AgentContext;
use crate::error::AgentError;
use crate::events::ExecutionEvent;
use crate::provider::GenerationParams;
use crate::runtime::{AgentRuntime, RunOutcome};

/// Fluent, single-use invocation builder
pub struct AgentExecutor {
    runtime: Arc<AgentRuntime>,
    agent_name: String,
    /// Run-scoped suffix for derived session ids, fixed at construction
    run_id: String,
    user_id: Option<String>,
    session_id: Option<String>,
    state: HashMap<String, Value>,
    input: Value,
    streaming: bool,
    params: GenerationParams,
}

impl AgentExecutor {
    pub fn new(runtime: Arc<AgentRuntime>, agent_name: impl Into<String>) -> Self {
        Self {
            runtime,
            agent_name: agent_name.into(),
            run_id: uuid::Uuid::now_v7().simple().to_string(),
            user_id: None,
            session_id: None,
            state: HashMap::new(),
            input: Value::Null,
            streaming: false,
            params: GenerationParams::default(),
        }
    }

    /// Scope the run to a user; without an explicit session this derives a
    /// session id from a stable per-user prefix plus this executor's
    /// run-scoped suffix
    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Pin the run to an explicit session id (wins over the user-derived one)
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Seed a context state value before the run
    pub fn with_state(mut self, key: impl Into<String>, value: Value) -> Self {
        self.state.insert(key.into(), value);
        self
    }

    /// Set the input for this run (string or structured JSON)
    pub fn with_input(mut self, input: impl Into<Value>) -> Self {
        self.input = input.into();
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.params.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.params.max_tokens = Some(max_tokens);
        self
    }

    pub fn top_p(mut self, top_p: f32) -> Self {
        self.params.top_p = Some(top_p);
        self
    }

    /// Ask for a streaming transport. Recorded in context state for the
    /// host's provider wiring; the engine itself stays response-at-a-time.
    pub fn streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    /// The session this run will use, applying the selection precedence.
    /// The user-derived form keeps a stable `user:{user}:{agent}` prefix and
    /// appends the run suffix, so distinct executors never share a session
    /// by accident.
    pub fn resolved_session_id(&self) -> String {
        if let Some(explicit) = &self.session_id {
            return explicit.clone();
        }
        if let Some(user_id) = &self.user_id {
            return format!("user:{}:{}:{}", user_id, self.agent_name, self.run_id);
        }
        AgentContext::ephemeral().session_id().to_string()
    }

    /// Run in the foreground and return the outcome
    pub async fn execute(self) -> RunOutcome {
        self.execute_as("foreground").await
    }

    /// Run on a background task; the handle resolves to the same outcome
    /// `execute` would have produced
    pub fn dispatch(self) -> JobHandle {
        let handle = tokio::spawn(async move { self.execute_as("background").await });
        JobHandle { handle }
    }

    async fn execute_as(self, mode: &str) -> RunOutcome {
        let session_id = self.resolved_session_id();
        let runtime = self.runtime;

        let mut context = match runtime
            .context_store()
            .load(&session_id, &self.agent_name)
            .await
        {
            Ok(Some(context)) => context,
            Ok(None) => AgentContext::new(&session_id),
            Err(e) => return RunOutcome::Failed(e),
        };

        if let Some(user_id) = &self.user_id {
            context.set_state("user_id", json!(user_id));
        }
        context.set_state("execution_mode", json!(mode));
        if self.streaming {
            context.set_state("streaming", json!(true));
        }
        for key in self.state.keys() {
            runtime
                .events()
                .emit(ExecutionEvent::state_updated(
                    &self.agent_name,
                    &session_id,
                    key,
                ))
                .await;
        }
        context.load_state(self.state);
        context.set_user_input(self.input);

        let outcome = runtime.run(&self.agent_name, &mut context, self.params).await;

        // Persist on every outcome so interrupted/failed runs can be resumed
        // or inspected
        if let Err(e) = runtime.context_store().save(&self.agent_name, &context).await {
            tracing::warn!(
                session_id = %session_id,
                agent = %self.agent_name,
                error = %e,
                "failed to persist context after run"
            );
            if outcome.is_completed() {
                return RunOutcome::Failed(e);
            }
        }
        outcome
    }
}

/// Handle to a background run
pub struct JobHandle {
    handle: tokio::task::JoinHandle<RunOutcome>,
}

impl JobHandle {
    /// Wait for the background run to finish
    pub async fn join(self) -> RunOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => RunOutcome::Failed(AgentError::Internal(anyhow::anyhow!(
                "background run panicked or was aborted: {}",
                e
            ))),
        }
    }

    /// Abort the background run
    pub fn abort(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
