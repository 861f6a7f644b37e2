// Integration tests for the agent run loop
//
// These drive the real runtime end to end against the scripted completion
// provider: tool calling, contained tool failures, fatal provider failures,
// the iteration ceiling, interrupts, and sub-agent delegation.

use std::sync::Arc;

use ensemble_core::in_memory::{
    CalculatorTool, CollectingSink, EchoTool, FailingTool, InMemoryInterruptStore,
    MockCompletionProvider, TransferFundsTool,
};
use ensemble_core::{
    AgentDefinition, AgentError, AgentExecutor, AgentRegistry, AgentRuntime,
    AuthorizationContext, CompletionResponse, ExecutionEvent, InterruptResolver, InterruptStatus,
    MessageRole, NullSink, RunOutcome, Tool, ToolCall, ToolRegistry, Toolbox,
};
use serde_json::json;

fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
    }
}

fn runtime_with(
    responses: Vec<CompletionResponse>,
    agents: Vec<AgentDefinition>,
) -> (Arc<AgentRuntime>, Arc<MockCompletionProvider>) {
    let provider = Arc::new(MockCompletionProvider::new(responses));
    let mut registry = AgentRegistry::new();
    for agent in agents {
        registry.register(agent);
    }
    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(CalculatorTool));
    tools.register(Arc::new(FailingTool));
    tools.register(Arc::new(TransferFundsTool::new(100.0)));
    let runtime = Arc::new(
        AgentRuntime::builder(provider.clone())
            .agents(registry)
            .tools(tools)
            .build(),
    );
    (runtime, provider)
}

// =============================================================================
// Tool calling
// =============================================================================

#[tokio::test]
async fn test_calculator_end_to_end() {
    let (runtime, provider) = runtime_with(
        vec![
            CompletionResponse::with_tools(vec![tool_call(
                "call_1",
                "calculator",
                json!({"a": 2, "b": 2, "op": "+"}),
            )]),
            CompletionResponse::text("The answer is 4"),
        ],
        vec![AgentDefinition::new("helper", "You can do math.", "test-model")
            .with_tools(["calculator"])],
    );

    let outcome = AgentExecutor::new(runtime.clone(), "helper")
        .with_session("s1")
        .with_input(json!("What is 2+2?"))
        .execute()
        .await;

    assert_eq!(outcome.output(), Some("The answer is 4"));

    // Persisted history: user, assistant tool-call, tool result, final answer
    let context = runtime
        .context_store()
        .load("s1", "helper")
        .await
        .unwrap()
        .unwrap();
    let history = context.history();
    assert_eq!(history.len(), 4);
    assert_eq!(history[0].role, MessageRole::User);
    assert_eq!(history[0].content, "What is 2+2?");
    assert!(history[1].has_tool_calls());
    assert_eq!(history[2].role, MessageRole::ToolResult);
    assert_eq!(history[2].content, "4");
    assert_eq!(history[2].tool_call_id.as_deref(), Some("call_1"));
    assert_eq!(history[3].content, "The answer is 4");

    // Second call carried the tool result back to the model
    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].messages.last().unwrap().content, "4");
}

#[tokio::test]
async fn test_tool_failure_is_contained() {
    let (runtime, _) = runtime_with(
        vec![
            CompletionResponse::with_tools(vec![tool_call("call_1", "failing", json!({}))]),
            CompletionResponse::text("I could not use that tool"),
        ],
        vec![AgentDefinition::new("helper", "Try tools.", "test-model").with_tools(["failing"])],
    );

    let outcome = AgentExecutor::new(runtime.clone(), "helper")
        .with_session("s1")
        .with_input(json!("go"))
        .execute()
        .await;

    // The run recovers: the failure was fed back as an error result
    assert_eq!(outcome.output(), Some("I could not use that tool"));
    let context = runtime
        .context_store()
        .load("s1", "helper")
        .await
        .unwrap()
        .unwrap();
    let error_result = &context.history()[2];
    assert!(error_result.is_tool_error());
    assert!(error_result.content.contains("always fails"));
}

#[tokio::test]
async fn test_provider_failure_is_fatal() {
    let provider = Arc::new(MockCompletionProvider::failing("upstream 500"));
    let mut agents = AgentRegistry::new();
    agents.register(AgentDefinition::new("helper", "Help.", "test-model"));
    let runtime = Arc::new(AgentRuntime::builder(provider).agents(agents).build());

    let outcome = AgentExecutor::new(runtime, "helper")
        .with_input(json!("hello"))
        .execute()
        .await;

    match outcome {
        RunOutcome::Failed(AgentError::Provider(message)) => {
            assert!(message.contains("upstream 500"));
        }
        other => panic!("expected provider failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_iteration_ceiling() {
    // The model keeps calling tools forever; the loop must give up
    let responses = (0..5)
        .map(|i| {
            CompletionResponse::with_tools(vec![tool_call(
                &format!("call_{}", i),
                "calculator",
                json!({"a": 1, "b": 1, "op": "+"}),
            )])
        })
        .collect();
    let (runtime, provider) = runtime_with(
        responses,
        vec![AgentDefinition::new("looper", "Loop.", "test-model")
            .with_tools(["calculator"])
            .with_max_iterations(3)],
    );

    let outcome = AgentExecutor::new(runtime, "looper")
        .with_input(json!("go"))
        .execute()
        .await;

    assert!(matches!(
        outcome,
        RunOutcome::Failed(AgentError::BoundExceeded(_))
    ));
    assert_eq!(provider.call_count(), 3);
}

#[tokio::test]
async fn test_unknown_agent_is_configuration_error() {
    let (runtime, _) = runtime_with(vec![], vec![]);
    let outcome = AgentExecutor::new(runtime, "ghost")
        .with_input(json!("hi"))
        .execute()
        .await;
    assert!(matches!(
        outcome,
        RunOutcome::Failed(AgentError::Configuration(_))
    ));
}

// =============================================================================
// Toolbox authorization
// =============================================================================

/// Calculator is open; echo needs the `finance.echo` capability
struct FinanceToolbox;

impl Toolbox for FinanceToolbox {
    fn name(&self) -> &str {
        "finance"
    }

    fn tools(&self) -> Vec<Arc<dyn Tool>> {
        vec![Arc::new(CalculatorTool), Arc::new(EchoTool)]
    }

    fn tool_allowed(&self, tool_name: &str, auth: &AuthorizationContext) -> bool {
        tool_name != "echo" || auth.can("finance.echo")
    }
}

#[tokio::test]
async fn test_toolbox_gating_hides_and_refuses_denied_tools() {
    let provider = Arc::new(MockCompletionProvider::new(vec![
        // The model tries the denied tool anyway
        CompletionResponse::with_tools(vec![tool_call("call_1", "echo", json!({"note": "hi"}))]),
        CompletionResponse::text("done without echo"),
    ]));
    let mut agents = AgentRegistry::new();
    agents.register(
        AgentDefinition::new("clerk", "Use your tools.", "test-model")
            .with_tools(["calculator", "echo"]),
    );
    let runtime = Arc::new(
        AgentRuntime::builder(provider.clone())
            .agents(agents)
            .toolbox(Arc::new(FinanceToolbox))
            .authorization(AuthorizationContext::with_check(Some("u1".into()), |cap| {
                cap == "finance"
            }))
            .build(),
    );

    let outcome = AgentExecutor::new(runtime.clone(), "clerk")
        .with_session("s1")
        .with_input(json!("note this down"))
        .execute()
        .await;
    assert_eq!(outcome.output(), Some("done without echo"));

    // The denied tool was never offered to the model
    let requests = provider.requests();
    let offered: Vec<&str> = requests[0].tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(offered, vec!["calculator"]);

    // Calling it anyway is refused at dispatch and contained as a tool error
    let context = runtime
        .context_store()
        .load("s1", "clerk")
        .await
        .unwrap()
        .unwrap();
    let refusal = &context.history()[2];
    assert!(refusal.is_tool_error());
    assert!(refusal.content.contains("not authorized"));
}

// =============================================================================
// Interrupts
// =============================================================================

#[tokio::test]
async fn test_interrupt_suspends_and_persists() {
    let interrupt_store = Arc::new(InMemoryInterruptStore::new());
    let provider = Arc::new(MockCompletionProvider::new(vec![
        CompletionResponse::with_tools(vec![tool_call(
            "call_1",
            "transfer_funds",
            json!({"amount": 500, "to": "acct-9"}),
        )]),
    ]));
    let mut agents = AgentRegistry::new();
    agents.register(
        AgentDefinition::new("treasurer", "Move money.", "test-model")
            .with_tools(["transfer_funds"]),
    );
    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(TransferFundsTool::new(100.0)));
    let sink = Arc::new(CollectingSink::new());
    let runtime = Arc::new(
        AgentRuntime::builder(provider)
            .agents(agents)
            .tools(tools)
            .interrupt_store(interrupt_store.clone())
            .events(sink.clone())
            .build(),
    );

    let outcome = AgentExecutor::new(runtime.clone(), "treasurer")
        .with_session("s1")
        .with_input(json!("send 500 to acct-9"))
        .execute()
        .await;

    let record = match outcome {
        RunOutcome::Interrupted(record) => record,
        other => panic!("expected interrupted, got {:?}", other),
    };
    assert_eq!(record.reason, "requires approval");
    assert_eq!(record.data["amount"], 500);
    assert_eq!(record.status, InterruptStatus::Pending);

    // Persisted as pending in the store
    let pending = runtime.interrupt_store().list_pending("s1").await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, record.id);

    // The sink saw the request
    assert!(sink
        .events()
        .iter()
        .any(|e| matches!(e, ExecutionEvent::InterruptRequested { .. })));

    // Approve and verify the terminal state sticks
    let resolver = InterruptResolver::new(interrupt_store, Arc::new(NullSink));
    let approved = resolver
        .approve(&record.id, Some(json!({"amount": 400})), Some("alice".into()))
        .await
        .unwrap();
    assert_eq!(approved.status, InterruptStatus::Approved);
    assert!(runtime
        .interrupt_store()
        .list_pending("s1")
        .await
        .unwrap()
        .is_empty());

    // A second resolution attempt is an error
    let err = resolver.reject(&record.id, "late", None).await.unwrap_err();
    assert!(matches!(err, AgentError::InterruptResolution(_)));
}

// =============================================================================
// Delegation
// =============================================================================

#[tokio::test]
async fn test_delegation_to_sub_agent() {
    let (runtime, provider) = runtime_with(
        vec![
            // Parent asks for delegation
            CompletionResponse::with_tools(vec![tool_call(
                "call_1",
                "delegate_to_researcher",
                json!({"task": "find three facts about tides"}),
            )]),
            // Sub-agent answers directly
            CompletionResponse::text("facts: gravity, moon, sun"),
            // Parent wraps up with the sub-agent's answer in hand
            CompletionResponse::text("Summary: gravity, moon, sun"),
        ],
        vec![
            AgentDefinition::new("manager", "Coordinate.", "test-model")
                .with_sub_agents(["researcher"]),
            AgentDefinition::new("researcher", "Research.", "test-model")
                .with_description("Finds facts."),
        ],
    );

    let outcome = AgentExecutor::new(runtime.clone(), "manager")
        .with_session("s1")
        .with_input(json!("research tides"))
        .execute()
        .await;

    assert_eq!(outcome.output(), Some("Summary: gravity, moon, sun"));

    // The parent saw the delegation tool and its result
    let requests = provider.requests();
    assert_eq!(requests.len(), 3);
    assert!(requests[0]
        .tools
        .iter()
        .any(|t| t.name == "delegate_to_researcher"));
    assert_eq!(
        requests[2].messages.last().unwrap().content,
        "facts: gravity, moon, sun"
    );
    // The sub-agent got the task as its input, not the parent's history
    assert_eq!(
        requests[1].messages.last().unwrap().content,
        "find three facts about tides"
    );
}

#[tokio::test]
async fn test_delegation_depth_limit() {
    let (runtime, _) = runtime_with(
        vec![
            CompletionResponse::with_tools(vec![tool_call(
                "call_1",
                "delegate_to_recurse",
                json!({"task": "go deeper"}),
            )]),
            CompletionResponse::with_tools(vec![tool_call(
                "call_2",
                "delegate_to_recurse",
                json!({"task": "deeper still"}),
            )]),
        ],
        vec![AgentDefinition::new("recurse", "Recurse.", "test-model")
            .with_sub_agents(["recurse"])
            .with_max_delegation_depth(1)],
    );

    let outcome = AgentExecutor::new(runtime, "recurse")
        .with_input(json!("start"))
        .execute()
        .await;

    match outcome {
        RunOutcome::Failed(AgentError::Configuration(message)) => {
            assert!(message.contains("max depth 1"));
        }
        other => panic!("expected configuration failure, got {:?}", other),
    }
}
