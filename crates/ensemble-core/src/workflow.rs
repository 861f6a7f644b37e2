// Workflow engine - composition of agent runs
//
// A workflow is a tree of WorkflowNode values; composites (sequential,
// parallel, conditional, loop) hold child nodes, so any pattern nests
// inside any other. Nodes pass JSON values: each node receives the previous
// node's output as its input.
//
// Interrupts compose: a node that suspends on a pending interrupt surfaces
// NodeOutcome::Interrupted and the enclosing workflow stops there. Bounds
// (loop ceiling, parallel timeout) are engine errors (BoundExceeded),
// distinguishable from an agent deciding to stop.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{AgentError, Result};
use crate::events::ExecutionEvent;
use crate::executor::AgentExecutor;
use crate::interrupt::AgentInterrupt;
use crate::runtime::{AgentRuntime, RunOutcome};

/// Default ceiling on loop iterations
pub const DEFAULT_LOOP_CEILING: usize = 100;

/// Terminal shape of one workflow node
#[derive(Debug)]
pub enum NodeOutcome {
    /// The node produced an output value
    Completed(Value),
    /// The node suspended on a pending interrupt
    Interrupted(AgentInterrupt),
    /// No branch applied; input passes through unchanged downstream
    Skipped,
}

impl NodeOutcome {
    pub fn output(&self) -> Option<&Value> {
        match self {
            NodeOutcome::Completed(value) => Some(value),
            _ => None,
        }
    }
}

/// One composable unit of a workflow
#[async_trait]
pub trait WorkflowNode: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, runtime: Arc<AgentRuntime>, input: Value) -> Result<NodeOutcome>;
}

/// Output rewrite applied between sequential steps
pub type Transform = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Branch predicate over the current value
pub type Predicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

// ============================================================================
// AgentNode - leaf node running one agent
// ============================================================================

/// Leaf node: one agent run per node execution
pub struct AgentNode {
    name: String,
    agent_name: String,
    session_id: Option<String>,
}

impl AgentNode {
    pub fn new(agent_name: impl Into<String>) -> Self {
        let agent_name = agent_name.into();
        Self {
            name: agent_name.clone(),
            agent_name,
            session_id: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Pin every execution of this node to one session (continuing
    /// conversation); default is a fresh ephemeral session per execution
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

#[async_trait]
impl WorkflowNode for AgentNode {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, runtime: Arc<AgentRuntime>, input: Value) -> Result<NodeOutcome> {
        let mut executor = AgentExecutor::new(runtime, &self.agent_name).with_input(input);
        if let Some(session_id) = &self.session_id {
            executor = executor.with_session(session_id.clone());
        }
        match executor.execute().await {
            RunOutcome::Completed(text) => Ok(NodeOutcome::Completed(json!(text))),
            RunOutcome::Interrupted(record) => Ok(NodeOutcome::Interrupted(record)),
            RunOutcome::Failed(e) => Err(e),
        }
    }
}

// ============================================================================
// SequentialWorkflow
// ============================================================================

/// Runs steps in order, threading each output into the next input.
/// Fails fast: the first failing step ends the workflow, and the error
/// names the step that failed.
pub struct SequentialWorkflow {
    name: String,
    steps: Vec<(Arc<dyn WorkflowNode>, Option<Transform>)>,
}

impl SequentialWorkflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, node: Arc<dyn WorkflowNode>) -> Self {
        self.steps.push((node, None));
        self
    }

    /// Add a step whose output is rewritten before feeding the next step
    pub fn step_with(mut self, node: Arc<dyn WorkflowNode>, transform: Transform) -> Self {
        self.steps.push((node, Some(transform)));
        self
    }
}

#[async_trait]
impl WorkflowNode for SequentialWorkflow {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, runtime: Arc<AgentRuntime>, input: Value) -> Result<NodeOutcome> {
        runtime
            .events()
            .emit(ExecutionEvent::workflow_started(&self.name, "sequential"))
            .await;

        let mut current = input;
        for (node, transform) in &self.steps {
            let result = node.run(runtime.clone(), current.clone()).await;
            let success = matches!(result, Ok(NodeOutcome::Completed(_) | NodeOutcome::Skipped));
            runtime
                .events()
                .emit(ExecutionEvent::workflow_step_completed(
                    &self.name,
                    node.name(),
                    success,
                ))
                .await;

            match result {
                Ok(NodeOutcome::Completed(output)) => {
                    current = match transform {
                        Some(transform) => transform(output),
                        None => output,
                    };
                }
                Ok(NodeOutcome::Skipped) => {}
                Ok(NodeOutcome::Interrupted(record)) => {
                    runtime
                        .events()
                        .emit(ExecutionEvent::workflow_finished(
                            &self.name,
                            false,
                            json!({"interrupted_at": node.name()}),
                        ))
                        .await;
                    return Ok(NodeOutcome::Interrupted(record));
                }
                Err(e) => {
                    runtime
                        .events()
                        .emit(ExecutionEvent::workflow_finished(
                            &self.name,
                            false,
                            json!({"failed_at": node.name()}),
                        ))
                        .await;
                    return Err(AgentError::tool(format!(
                        "workflow '{}' failed at step '{}': {}",
                        self.name,
                        node.name(),
                        e
                    )));
                }
            }
        }

        runtime
            .events()
            .emit(ExecutionEvent::workflow_finished(
                &self.name,
                true,
                current.clone(),
            ))
            .await;
        Ok(NodeOutcome::Completed(current))
    }
}

// ============================================================================
// ParallelWorkflow
// ============================================================================

/// Runs named branches concurrently on separate tasks and aggregates
/// per-branch results into one object. A failed branch is reported in the
/// aggregate, never silently dropped. An interrupted branch suspends the
/// whole workflow. The optional timeout bounds the join.
pub struct ParallelWorkflow {
    name: String,
    branches: Vec<(String, Arc<dyn WorkflowNode>)>,
    timeout: Option<Duration>,
}

impl ParallelWorkflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            branches: Vec::new(),
            timeout: None,
        }
    }

    pub fn branch(mut self, label: impl Into<String>, node: Arc<dyn WorkflowNode>) -> Self {
        self.branches.push((label.into(), node));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl WorkflowNode for ParallelWorkflow {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, runtime: Arc<AgentRuntime>, input: Value) -> Result<NodeOutcome> {
        runtime
            .events()
            .emit(ExecutionEvent::workflow_started(&self.name, "parallel"))
            .await;

        let tasks: Vec<_> = self
            .branches
            .iter()
            .map(|(label, node)| {
                let label = label.clone();
                let node = node.clone();
                let runtime = runtime.clone();
                let input = input.clone();
                tokio::spawn(async move {
                    let result = node.run(runtime, input).await;
                    (label, result)
                })
            })
            .collect();

        let aborts: Vec<_> = tasks.iter().map(|task| task.abort_handle()).collect();
        let joined = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, join_all(tasks)).await {
                Ok(joined) => joined,
                Err(_) => {
                    // Dropping the join handles would leave the branches
                    // running detached; cancel them before reporting
                    for abort in aborts {
                        abort.abort();
                    }
                    return Err(AgentError::bound(format!(
                        "parallel workflow '{}' timed out after {:?}",
                        self.name, limit
                    )));
                }
            },
            None => join_all(tasks).await,
        };

        let mut results = serde_json::Map::new();
        let mut all_ok = true;
        for join_result in joined {
            let (label, result) = join_result.map_err(|e| {
                AgentError::Internal(anyhow::anyhow!("parallel branch panicked: {}", e))
            })?;
            let entry = match result {
                Ok(NodeOutcome::Completed(output)) => {
                    json!({"status": "completed", "output": output})
                }
                Ok(NodeOutcome::Skipped) => json!({"status": "skipped"}),
                Ok(NodeOutcome::Interrupted(record)) => {
                    runtime
                        .events()
                        .emit(ExecutionEvent::workflow_finished(
                            &self.name,
                            false,
                            json!({"interrupted_at": label}),
                        ))
                        .await;
                    return Ok(NodeOutcome::Interrupted(record));
                }
                Err(e) => {
                    all_ok = false;
                    json!({"status": "failed", "error": e.to_string()})
                }
            };
            runtime
                .events()
                .emit(ExecutionEvent::workflow_step_completed(
                    &self.name,
                    &label,
                    entry["status"] != "failed",
                ))
                .await;
            results.insert(label, entry);
        }

        let output = Value::Object(results);
        runtime
            .events()
            .emit(ExecutionEvent::workflow_finished(
                &self.name,
                all_ok,
                output.clone(),
            ))
            .await;
        Ok(NodeOutcome::Completed(output))
    }
}

// ============================================================================
// ConditionalWorkflow
// ============================================================================

/// Runs the first arm whose predicate matches the input; falls back to the
/// `otherwise` node, or skips entirely when nothing applies.
pub struct ConditionalWorkflow {
    name: String,
    arms: Vec<(Predicate, Arc<dyn WorkflowNode>)>,
    otherwise: Option<Arc<dyn WorkflowNode>>,
}

impl ConditionalWorkflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arms: Vec::new(),
            otherwise: None,
        }
    }

    pub fn when(mut self, predicate: Predicate, node: Arc<dyn WorkflowNode>) -> Self {
        self.arms.push((predicate, node));
        self
    }

    pub fn otherwise(mut self, node: Arc<dyn WorkflowNode>) -> Self {
        self.otherwise = Some(node);
        self
    }
}

#[async_trait]
impl WorkflowNode for ConditionalWorkflow {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, runtime: Arc<AgentRuntime>, input: Value) -> Result<NodeOutcome> {
        runtime
            .events()
            .emit(ExecutionEvent::workflow_started(&self.name, "conditional"))
            .await;

        for (predicate, node) in &self.arms {
            if predicate(&input) {
                return node.run(runtime, input).await;
            }
        }
        if let Some(node) = &self.otherwise {
            return node.run(runtime, input).await;
        }
        runtime
            .events()
            .emit(ExecutionEvent::workflow_finished(&self.name, true, Value::Null))
            .await;
        Ok(NodeOutcome::Skipped)
    }
}

// ============================================================================
// LoopWorkflow
// ============================================================================

/// Loop termination mode
pub enum LoopMode {
    /// Run while the predicate holds for the current value (checked before
    /// each iteration)
    While(Predicate),
    /// Run until the predicate holds for the body's output (checked after
    /// each iteration)
    Until(Predicate),
    /// Run a fixed number of iterations
    Times(usize),
    /// Run the body once per element of the (array) input, collecting outputs
    ForEach,
}

/// Repeats a body node under a termination mode, always bounded by a hard
/// iteration ceiling.
pub struct LoopWorkflow {
    name: String,
    body: Arc<dyn WorkflowNode>,
    mode: LoopMode,
    ceiling: usize,
}

impl LoopWorkflow {
    pub fn new(name: impl Into<String>, body: Arc<dyn WorkflowNode>, mode: LoopMode) -> Self {
        Self {
            name: name.into(),
            body,
            mode,
            ceiling: DEFAULT_LOOP_CEILING,
        }
    }

    pub fn with_ceiling(mut self, ceiling: usize) -> Self {
        self.ceiling = ceiling;
        self
    }

    async fn run_body(
        &self,
        runtime: &Arc<AgentRuntime>,
        current: Value,
    ) -> Result<LoopStep> {
        match self.body.run(runtime.clone(), current.clone()).await? {
            NodeOutcome::Completed(output) => Ok(LoopStep::Next(output)),
            NodeOutcome::Skipped => Ok(LoopStep::Next(current)),
            NodeOutcome::Interrupted(record) => Ok(LoopStep::Suspended(record)),
        }
    }
}

enum LoopStep {
    Next(Value),
    Suspended(AgentInterrupt),
}

#[async_trait]
impl WorkflowNode for LoopWorkflow {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, runtime: Arc<AgentRuntime>, input: Value) -> Result<NodeOutcome> {
        runtime
            .events()
            .emit(ExecutionEvent::workflow_started(&self.name, "loop"))
            .await;

        let over_ceiling = |n: usize| {
            AgentError::bound(format!(
                "loop '{}' exceeds the iteration ceiling of {} ({} requested)",
                self.name, self.ceiling, n
            ))
        };

        let outcome = match &self.mode {
            LoopMode::Times(n) => {
                if *n > self.ceiling {
                    return Err(over_ceiling(*n));
                }
                let mut current = input;
                for _ in 0..*n {
                    match self.run_body(&runtime, current).await? {
                        LoopStep::Next(next) => current = next,
                        LoopStep::Suspended(record) => {
                            return Ok(NodeOutcome::Interrupted(record))
                        }
                    }
                }
                NodeOutcome::Completed(current)
            }
            LoopMode::While(predicate) => {
                let mut current = input;
                let mut iterations = 0;
                while predicate(&current) {
                    if iterations >= self.ceiling {
                        return Err(over_ceiling(iterations + 1));
                    }
                    iterations += 1;
                    match self.run_body(&runtime, current).await? {
                        LoopStep::Next(next) => current = next,
                        LoopStep::Suspended(record) => {
                            return Ok(NodeOutcome::Interrupted(record))
                        }
                    }
                }
                NodeOutcome::Completed(current)
            }
            LoopMode::Until(predicate) => {
                let mut current = input;
                let mut iterations = 0;
                loop {
                    if iterations >= self.ceiling {
                        return Err(over_ceiling(iterations + 1));
                    }
                    iterations += 1;
                    match self.run_body(&runtime, current).await? {
                        LoopStep::Next(next) => current = next,
                        LoopStep::Suspended(record) => {
                            return Ok(NodeOutcome::Interrupted(record))
                        }
                    }
                    if predicate(&current) {
                        break;
                    }
                }
                NodeOutcome::Completed(current)
            }
            LoopMode::ForEach => {
                let items = input.as_array().cloned().ok_or_else(|| {
                    AgentError::validation(format!(
                        "loop '{}' in for-each mode requires an array input",
                        self.name
                    ))
                })?;
                if items.len() > self.ceiling {
                    return Err(over_ceiling(items.len()));
                }
                let mut outputs = Vec::with_capacity(items.len());
                for item in items {
                    match self.run_body(&runtime, item).await? {
                        LoopStep::Next(output) => outputs.push(output),
                        LoopStep::Suspended(record) => {
                            return Ok(NodeOutcome::Interrupted(record))
                        }
                    }
                }
                NodeOutcome::Completed(Value::Array(outputs))
            }
        };

        runtime
            .events()
            .emit(ExecutionEvent::workflow_finished(
                &self.name,
                true,
                outcome.output().cloned().unwrap_or(Value::Null),
            ))
            .await;
        Ok(outcome)
    }
}

// ============================================================================
// Declarative descriptors
// ============================================================================

/// Serializable workflow description; `build` turns it into the same node
/// tree the builder API produces, so stored workflows and coded workflows
/// execute identically.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowSpec {
    Agent {
        agent: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    Sequential {
        name: String,
        steps: Vec<WorkflowSpec>,
    },
    Parallel {
        name: String,
        branches: BTreeMap<String, WorkflowSpec>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    Conditional {
        name: String,
        arms: Vec<ConditionalArm>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        otherwise: Option<Box<WorkflowSpec>>,
    },
    Loop {
        name: String,
        body: Box<WorkflowSpec>,
        mode: LoopSpec,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ceiling: Option<usize>,
    },
}

/// One arm of a declarative conditional
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionalArm {
    pub when: PredicateSpec,
    pub then: WorkflowSpec,
}

/// Declarative loop termination mode
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoopSpec {
    While { predicate: PredicateSpec },
    Until { predicate: PredicateSpec },
    Times { count: usize },
    ForEach,
}

/// Declarative predicate over the current JSON value
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PredicateSpec {
    Always,
    /// Value at the dotted path equals the given value
    Equals { path: String, value: Value },
    /// String at the dotted path contains the given substring
    Contains { path: String, value: String },
    /// The dotted path resolves to a non-null value
    Exists { path: String },
    Not { inner: Box<PredicateSpec> },
}

impl PredicateSpec {
    pub fn evaluate(&self, value: &Value) -> bool {
        match self {
            PredicateSpec::Always => true,
            PredicateSpec::Equals { path, value: expected } => {
                json_path(value, path).is_some_and(|found| found == expected)
            }
            PredicateSpec::Contains { path, value: needle } => json_path(value, path)
                .and_then(Value::as_str)
                .is_some_and(|s| s.contains(needle.as_str())),
            PredicateSpec::Exists { path } => {
                json_path(value, path).is_some_and(|found| !found.is_null())
            }
            PredicateSpec::Not { inner } => !inner.evaluate(value),
        }
    }

    fn build(&self) -> Predicate {
        let spec = self.clone();
        Arc::new(move |value| spec.evaluate(value))
    }
}

/// Resolve a dotted path ("result.status") against a JSON value.
/// The empty path resolves to the value itself.
fn json_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, key| match current {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

impl WorkflowSpec {
    /// Construct the executable node tree this descriptor describes
    pub fn build(&self) -> Arc<dyn WorkflowNode> {
        match self {
            WorkflowSpec::Agent { agent, session_id } => {
                let mut node = AgentNode::new(agent);
                if let Some(session_id) = session_id {
                    node = node.with_session(session_id);
                }
                Arc::new(node)
            }
            WorkflowSpec::Sequential { name, steps } => {
                let mut workflow = SequentialWorkflow::new(name);
                for step in steps {
                    workflow = workflow.step(step.build());
                }
                Arc::new(workflow)
            }
            WorkflowSpec::Parallel {
                name,
                branches,
                timeout_ms,
            } => {
                let mut workflow = ParallelWorkflow::new(name);
                for (label, branch) in branches {
                    workflow = workflow.branch(label, branch.build());
                }
                if let Some(ms) = timeout_ms {
                    workflow = workflow.with_timeout(Duration::from_millis(*ms));
                }
                Arc::new(workflow)
            }
            WorkflowSpec::Conditional {
                name,
                arms,
                otherwise,
            } => {
                let mut workflow = ConditionalWorkflow::new(name);
                for arm in arms {
                    workflow = workflow.when(arm.when.build(), arm.then.build());
                }
                if let Some(node) = otherwise {
                    workflow = workflow.otherwise(node.build());
                }
                Arc::new(workflow)
            }
            WorkflowSpec::Loop {
                name,
                body,
                mode,
                ceiling,
            } => {
                let mode = match mode {
                    LoopSpec::While { predicate } => LoopMode::While(predicate.build()),
                    LoopSpec::Until { predicate } => LoopMode::Until(predicate.build()),
                    LoopSpec::Times { count } => LoopMode::Times(*count),
                    LoopSpec::ForEach => LoopMode::ForEach,
                };
                let mut workflow = LoopWorkflow::new(name, body.build(), mode);
                if let Some(ceiling) = ceiling {
                    workflow = workflow.with_ceiling(*ceiling);
                }
                Arc::new(workflow)
            }
        }
    }
}
