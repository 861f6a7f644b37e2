// In-memory collaborator implementations
//
// Default store implementations backed by mutex-guarded maps, plus a
// scripted completion provider and a handful of concrete tools. These are
// the batteries for embedding the engine without a database and the
// fixtures the integration tests drive the real run loop with.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::context::{AgentContext, ContextStore};
use crate::error::{AgentError, Result};
use crate::events::{EventSink, ExecutionEvent};
use crate::interrupt::{AgentInterrupt, InterruptSignal, InterruptStatus, InterruptStore};
use crate::memory::{AgentMemory, MemoryStore};
use crate::provider::{CompletionProvider, CompletionRequest, CompletionResponse};
use crate::tool::{Tool, ToolDefinition};
use crate::vector::{
    cosine_similarity, VectorMemoryEntry, VectorMemoryStore, VectorSearchHit,
};

fn lock_err() -> AgentError {
    AgentError::store("in-memory store mutex poisoned")
}

// ============================================================================
// Stores
// ============================================================================

/// Context store backed by a map keyed on (session_id, agent_name)
#[derive(Default)]
pub struct InMemoryContextStore {
    contexts: Mutex<HashMap<(String, String), AgentContext>>,
}

impl InMemoryContextStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContextStore for InMemoryContextStore {
    async fn load(&self, session_id: &str, agent_name: &str) -> Result<Option<AgentContext>> {
        let contexts = self.contexts.lock().map_err(|_| lock_err())?;
        Ok(contexts
            .get(&(session_id.to_string(), agent_name.to_string()))
            .cloned())
    }

    async fn save(&self, agent_name: &str, context: &AgentContext) -> Result<()> {
        let mut contexts = self.contexts.lock().map_err(|_| lock_err())?;
        contexts.insert(
            (context.session_id().to_string(), agent_name.to_string()),
            context.clone(),
        );
        Ok(())
    }
}

/// Memory store backed by a map keyed on (agent_name, user_id)
#[derive(Default)]
pub struct InMemoryMemoryStore {
    memories: Mutex<HashMap<(String, Option<String>), AgentMemory>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn load(&self, agent_name: &str, user_id: Option<&str>) -> Result<Option<AgentMemory>> {
        let memories = self.memories.lock().map_err(|_| lock_err())?;
        Ok(memories
            .get(&(agent_name.to_string(), user_id.map(String::from)))
            .cloned())
    }

    async fn save(&self, memory: &AgentMemory) -> Result<()> {
        let mut memories = self.memories.lock().map_err(|_| lock_err())?;
        memories.insert(
            (memory.agent_name.clone(), memory.user_id.clone()),
            memory.clone(),
        );
        Ok(())
    }
}

/// Vector store with brute-force cosine search and (agent_name,
/// content_hash) dedup, mirroring the unique-index guarantee of the
/// database-backed store
#[derive(Default)]
pub struct InMemoryVectorStore {
    entries: Mutex<Vec<VectorMemoryEntry>>,
    seen: Mutex<HashSet<(String, String)>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VectorMemoryStore for InMemoryVectorStore {
    async fn insert_if_absent(&self, entry: VectorMemoryEntry) -> Result<bool> {
        let mut seen = self.seen.lock().map_err(|_| lock_err())?;
        if !seen.insert((entry.agent_name.clone(), entry.content_hash.clone())) {
            return Ok(false);
        }
        self.entries.lock().map_err(|_| lock_err())?.push(entry);
        Ok(true)
    }

    async fn search(
        &self,
        agent_name: &str,
        namespace: &str,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<VectorSearchHit>> {
        let query_norm = query.iter().map(|v| v * v).sum::<f32>().sqrt();
        let entries = self.entries.lock().map_err(|_| lock_err())?;
        let mut hits: Vec<VectorSearchHit> = entries
            .iter()
            .filter(|e| e.agent_name == agent_name && e.namespace == namespace)
            .map(|e| VectorSearchHit {
                score: cosine_similarity(query, query_norm, &e.vector, e.norm),
                entry: e.clone(),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }
}

/// Interrupt store backed by a map keyed on interrupt id
#[derive(Default)]
pub struct InMemoryInterruptStore {
    interrupts: Mutex<HashMap<String, AgentInterrupt>>,
}

impl InMemoryInterruptStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InterruptStore for InMemoryInterruptStore {
    async fn create(&self, interrupt: AgentInterrupt) -> Result<AgentInterrupt> {
        let mut interrupts = self.interrupts.lock().map_err(|_| lock_err())?;
        interrupts.insert(interrupt.id.clone(), interrupt.clone());
        Ok(interrupt)
    }

    async fn get(&self, id: &str) -> Result<Option<AgentInterrupt>> {
        let interrupts = self.interrupts.lock().map_err(|_| lock_err())?;
        Ok(interrupts.get(id).cloned())
    }

    async fn update(&self, interrupt: &AgentInterrupt) -> Result<()> {
        let mut interrupts = self.interrupts.lock().map_err(|_| lock_err())?;
        if !interrupts.contains_key(&interrupt.id) {
            return Err(AgentError::store(format!(
                "interrupt {} does not exist",
                interrupt.id
            )));
        }
        interrupts.insert(interrupt.id.clone(), interrupt.clone());
        Ok(())
    }

    async fn list_pending(&self, session_id: &str) -> Result<Vec<AgentInterrupt>> {
        let interrupts = self.interrupts.lock().map_err(|_| lock_err())?;
        let mut pending: Vec<AgentInterrupt> = interrupts
            .values()
            .filter(|i| i.session_id == session_id && i.status == InterruptStatus::Pending)
            .cloned()
            .collect();
        // ULIDs sort chronologically
        pending.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(pending)
    }

    async fn expire_due(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut interrupts = self.interrupts.lock().map_err(|_| lock_err())?;
        let mut expired = 0;
        for interrupt in interrupts.values_mut() {
            if interrupt.status == InterruptStatus::Pending && interrupt.expire(now)? {
                expired += 1;
            }
        }
        Ok(expired)
    }
}

// ============================================================================
// Event sink + provider fixtures
// ============================================================================

/// Sink that records every event for later assertions
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<ExecutionEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl EventSink for CollectingSink {
    async fn emit(&self, event: ExecutionEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Scripted completion provider: returns queued responses in order and
/// records every request it received
pub struct MockCompletionProvider {
    responses: Mutex<VecDeque<CompletionResponse>>,
    requests: Mutex<Vec<CompletionRequest>>,
    failure: Option<String>,
}

impl MockCompletionProvider {
    pub fn new(responses: Vec<CompletionResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            failure: None,
        }
    }

    /// Provider whose every call fails with the given message
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            failure: Some(message.into()),
        }
    }

    /// Every request received so far, in call order
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl CompletionProvider for MockCompletionProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        self.requests
            .lock()
            .map_err(|_| lock_err())?
            .push(request);
        if let Some(message) = &self.failure {
            return Err(AgentError::provider(message.clone()));
        }
        self.responses
            .lock()
            .map_err(|_| lock_err())?
            .pop_front()
            .ok_or_else(|| AgentError::provider("no scripted response left"))
    }
}

// ============================================================================
// Concrete tools
// ============================================================================

/// Four-function arithmetic over {"a": number, "b": number, "op": string}
pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "calculator".to_string(),
            description: "Perform basic arithmetic on two numbers".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "a": {"type": "number"},
                    "b": {"type": "number"},
                    "op": {"type": "string", "enum": ["+", "-", "*", "/"]}
                },
                "required": ["a", "b", "op"]
            }),
        }
    }

    async fn execute(&self, arguments: Value, _context: &mut AgentContext) -> Result<String> {
        let a = arguments
            .get("a")
            .and_then(Value::as_f64)
            .ok_or_else(|| AgentError::tool("calculator: 'a' must be a number"))?;
        let b = arguments
            .get("b")
            .and_then(Value::as_f64)
            .ok_or_else(|| AgentError::tool("calculator: 'b' must be a number"))?;
        let op = arguments
            .get("op")
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::tool("calculator: 'op' must be a string"))?;
        let result = match op {
            "+" => a + b,
            "-" => a - b,
            "*" => a * b,
            "/" => {
                if b == 0.0 {
                    return Err(AgentError::tool("calculator: division by zero"));
                }
                a / b
            }
            other => {
                return Err(AgentError::tool(format!(
                    "calculator: unsupported operator '{}'",
                    other
                )))
            }
        };
        if result.fract() == 0.0 && result.abs() < 1e15 {
            Ok(format!("{}", result as i64))
        } else {
            Ok(format!("{}", result))
        }
    }
}

/// Returns its arguments verbatim
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "echo".to_string(),
            description: "Echo the arguments back".to_string(),
            parameters: json!({"type": "object", "additionalProperties": true}),
        }
    }

    async fn execute(&self, arguments: Value, _context: &mut AgentContext) -> Result<String> {
        Ok(arguments.to_string())
    }
}

/// Always fails; exercises the contained-failure path of the run loop
pub struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "failing".to_string(),
            description: "A tool that always fails".to_string(),
            parameters: json!({"type": "object", "properties": {}}),
        }
    }

    async fn execute(&self, _arguments: Value, _context: &mut AgentContext) -> Result<String> {
        Err(AgentError::tool("this tool always fails"))
    }
}

/// Transfers below the threshold go through; anything at or above it raises
/// an approval interrupt carrying the full arguments
pub struct TransferFundsTool {
    pub approval_threshold: f64,
}

impl TransferFundsTool {
    pub fn new(approval_threshold: f64) -> Self {
        Self { approval_threshold }
    }
}

#[async_trait]
impl Tool for TransferFundsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "transfer_funds".to_string(),
            description: "Transfer an amount between accounts".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "amount": {"type": "number"},
                    "to": {"type": "string"}
                },
                "required": ["amount"]
            }),
        }
    }

    async fn execute(&self, arguments: Value, _context: &mut AgentContext) -> Result<String> {
        let amount = arguments
            .get("amount")
            .and_then(Value::as_f64)
            .ok_or_else(|| AgentError::tool("transfer_funds: 'amount' must be a number"))?;
        if amount >= self.approval_threshold {
            return Err(InterruptSignal::approval("requires approval", arguments).into_error());
        }
        Ok(json!({"transferred": amount}).to_string())
    }
}
