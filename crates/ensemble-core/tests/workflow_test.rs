// Integration tests for the workflow engine
//
// Composition of agent nodes under sequential, parallel, conditional, and
// loop composites, plus the declarative descriptor form.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ensemble_core::in_memory::{MockCompletionProvider, TransferFundsTool};
use ensemble_core::{
    AgentDefinition, AgentError, AgentNode, AgentRegistry, AgentRuntime, CompletionResponse,
    ConditionalArm, ConditionalWorkflow, LoopMode, LoopSpec, LoopWorkflow, NodeOutcome,
    ParallelWorkflow, PredicateSpec, SequentialWorkflow, ToolCall, ToolRegistry, WorkflowNode,
    WorkflowSpec,
};
use serde_json::json;

fn runtime_with(
    responses: Vec<CompletionResponse>,
    agents: Vec<AgentDefinition>,
) -> Arc<AgentRuntime> {
    let provider = Arc::new(MockCompletionProvider::new(responses));
    let mut registry = AgentRegistry::new();
    for agent in agents {
        registry.register(agent);
    }
    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(TransferFundsTool::new(100.0)));
    Arc::new(
        AgentRuntime::builder(provider)
            .agents(registry)
            .tools(tools)
            .build(),
    )
}

fn echo_agent(name: &str) -> AgentDefinition {
    AgentDefinition::new(name, "Answer briefly.", "test-model")
}

#[tokio::test]
async fn test_sequential_threads_outputs() {
    let runtime = runtime_with(
        vec![
            CompletionResponse::text("draft"),
            CompletionResponse::text("polished"),
        ],
        vec![echo_agent("writer"), echo_agent("editor")],
    );

    let workflow = SequentialWorkflow::new("pipeline")
        .step(Arc::new(AgentNode::new("writer")))
        .step(Arc::new(AgentNode::new("editor")));

    let outcome = workflow
        .run(runtime, json!("write about tides"))
        .await
        .unwrap();
    assert_eq!(outcome.output(), Some(&json!("polished")));
}

#[tokio::test]
async fn test_sequential_fails_fast_naming_the_step() {
    let runtime = runtime_with(
        vec![CompletionResponse::text("draft")],
        vec![echo_agent("writer")],
    );

    // Second step references an unregistered agent
    let workflow = SequentialWorkflow::new("pipeline")
        .step(Arc::new(AgentNode::new("writer")))
        .step(Arc::new(AgentNode::new("ghost")));

    let err = workflow.run(runtime, json!("go")).await.unwrap_err();
    assert!(err.to_string().contains("'ghost'"));
    assert!(err.to_string().contains("'pipeline'"));
}

#[tokio::test]
async fn test_parallel_reports_partial_failure() {
    let runtime = runtime_with(
        vec![CompletionResponse::text("fine")],
        vec![echo_agent("steady")],
    );

    let workflow = ParallelWorkflow::new("fanout")
        .branch("good", Arc::new(AgentNode::new("steady")))
        .branch("bad", Arc::new(AgentNode::new("ghost")))
        .with_timeout(Duration::from_secs(5));

    let outcome = workflow.run(runtime, json!("go")).await.unwrap();
    let results = outcome.output().unwrap();

    // The failed branch is reported, never masked by the successful one
    assert_eq!(results["good"]["status"], "completed");
    assert_eq!(results["good"]["output"], "fine");
    assert_eq!(results["bad"]["status"], "failed");
    assert!(results["bad"]["error"]
        .as_str()
        .unwrap()
        .contains("Unknown agent"));
}

/// Sleeps, then marks completion; a cancelled run never sets the flag
struct SlowMarkerNode {
    done: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl WorkflowNode for SlowMarkerNode {
    fn name(&self) -> &str {
        "slow"
    }

    async fn run(
        &self,
        _runtime: Arc<AgentRuntime>,
        input: serde_json::Value,
    ) -> Result<NodeOutcome, AgentError> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.done.store(true, Ordering::SeqCst);
        Ok(NodeOutcome::Completed(input))
    }
}

#[tokio::test(start_paused = true)]
async fn test_parallel_timeout_cancels_running_branches() {
    let runtime = runtime_with(vec![], vec![]);
    let done = Arc::new(AtomicBool::new(false));

    let workflow = ParallelWorkflow::new("bounded")
        .branch("slow", Arc::new(SlowMarkerNode { done: done.clone() }))
        .with_timeout(Duration::from_millis(10));

    let err = workflow.run(runtime, json!("go")).await.unwrap_err();
    assert!(matches!(err, AgentError::BoundExceeded(_)));

    // The branch was aborted, not left running detached
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!done.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_conditional_skips_when_nothing_matches() {
    let runtime = runtime_with(vec![], vec![]);

    let workflow = ConditionalWorkflow::new("router").when(
        Arc::new(|v: &serde_json::Value| v["kind"] == "billing"),
        Arc::new(AgentNode::new("biller")),
    );

    let outcome = workflow
        .run(runtime, json!({"kind": "support"}))
        .await
        .unwrap();
    assert!(matches!(outcome, NodeOutcome::Skipped));
}

#[tokio::test]
async fn test_conditional_routes_first_match() {
    let runtime = runtime_with(
        vec![CompletionResponse::text("invoice sent")],
        vec![echo_agent("biller")],
    );

    let workflow = ConditionalWorkflow::new("router")
        .when(
            Arc::new(|v: &serde_json::Value| v["kind"] == "billing"),
            Arc::new(AgentNode::new("biller")),
        )
        .otherwise(Arc::new(AgentNode::new("fallback")));

    let outcome = workflow
        .run(runtime, json!({"kind": "billing"}))
        .await
        .unwrap();
    assert_eq!(outcome.output(), Some(&json!("invoice sent")));
}

#[tokio::test]
async fn test_loop_times_chains_iterations() {
    let runtime = runtime_with(
        vec![
            CompletionResponse::text("v1"),
            CompletionResponse::text("v2"),
            CompletionResponse::text("v3"),
        ],
        vec![echo_agent("refiner")],
    );

    let workflow = LoopWorkflow::new("refine", Arc::new(AgentNode::new("refiner")), LoopMode::Times(3));
    let outcome = workflow.run(runtime, json!("seed")).await.unwrap();
    assert_eq!(outcome.output(), Some(&json!("v3")));
}

#[tokio::test]
async fn test_loop_ceiling_is_enforced() {
    let runtime = runtime_with(vec![], vec![echo_agent("refiner")]);

    let workflow = LoopWorkflow::new("refine", Arc::new(AgentNode::new("refiner")), LoopMode::Times(50))
        .with_ceiling(10);
    let err = workflow.run(runtime.clone(), json!("seed")).await.unwrap_err();
    assert!(matches!(err, AgentError::BoundExceeded(_)));

    // A while-loop that never terminates hits the ceiling too
    let workflow = LoopWorkflow::new(
        "forever",
        Arc::new(AgentNode::new("refiner")),
        LoopMode::While(Arc::new(|_| true)),
    )
    .with_ceiling(2);
    let runtime = runtime_with(
        vec![
            CompletionResponse::text("a"),
            CompletionResponse::text("b"),
            CompletionResponse::text("c"),
        ],
        vec![echo_agent("refiner")],
    );
    let err = workflow.run(runtime, json!("seed")).await.unwrap_err();
    assert!(matches!(err, AgentError::BoundExceeded(_)));
}

#[tokio::test]
async fn test_loop_for_each_collects_outputs() {
    let runtime = runtime_with(
        vec![
            CompletionResponse::text("summary of a"),
            CompletionResponse::text("summary of b"),
        ],
        vec![echo_agent("summarizer")],
    );

    let workflow = LoopWorkflow::new(
        "summarize-all",
        Arc::new(AgentNode::new("summarizer")),
        LoopMode::ForEach,
    );
    let outcome = workflow
        .run(runtime, json!(["doc a", "doc b"]))
        .await
        .unwrap();
    assert_eq!(
        outcome.output(),
        Some(&json!(["summary of a", "summary of b"]))
    );

    // Non-array input is rejected up front
    let runtime = runtime_with(vec![], vec![echo_agent("summarizer")]);
    let workflow = LoopWorkflow::new(
        "summarize-all",
        Arc::new(AgentNode::new("summarizer")),
        LoopMode::ForEach,
    );
    let err = workflow.run(runtime, json!("not an array")).await.unwrap_err();
    assert!(matches!(err, AgentError::Validation(_)));
}

#[tokio::test]
async fn test_interrupt_propagates_through_nesting() {
    // A sequential workflow wrapping a loop wrapping an agent whose tool
    // raises an interrupt: the pending record surfaces at the top
    let provider_responses = vec![CompletionResponse::with_tools(vec![ToolCall {
        id: "call_1".to_string(),
        name: "transfer_funds".to_string(),
        arguments: json!({"amount": 900}),
    }])];
    let runtime = runtime_with(
        provider_responses,
        vec![AgentDefinition::new("treasurer", "Move money.", "test-model")
            .with_tools(["transfer_funds"])],
    );

    let inner = LoopWorkflow::new(
        "retry",
        Arc::new(AgentNode::new("treasurer")),
        LoopMode::Times(3),
    );
    let workflow = SequentialWorkflow::new("payments").step(Arc::new(inner));

    let outcome = workflow.run(runtime.clone(), json!("pay 900")).await.unwrap();
    match outcome {
        NodeOutcome::Interrupted(record) => {
            assert_eq!(record.reason, "requires approval");
            // And it is pending in the store, resumable later
            let found = runtime
                .interrupt_store()
                .get(&record.id)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(found.data["amount"], 900);
        }
        other => panic!("expected interrupted, got {:?}", other),
    }
}

#[tokio::test]
async fn test_spec_built_workflow_matches_builder_result() {
    let spec = WorkflowSpec::Sequential {
        name: "pipeline".into(),
        steps: vec![
            WorkflowSpec::Agent {
                agent: "writer".into(),
                session_id: None,
            },
            WorkflowSpec::Conditional {
                name: "gate".into(),
                arms: vec![ConditionalArm {
                    when: PredicateSpec::Contains {
                        path: "".into(),
                        value: "draft".into(),
                    },
                    then: WorkflowSpec::Agent {
                        agent: "editor".into(),
                        session_id: None,
                    },
                }],
                otherwise: None,
            },
            WorkflowSpec::Loop {
                name: "refine".into(),
                body: Box::new(WorkflowSpec::Agent {
                    agent: "editor".into(),
                    session_id: None,
                }),
                mode: LoopSpec::Times { count: 1 },
                ceiling: None,
            },
        ],
    };

    // Survives storage as JSON
    let spec: WorkflowSpec =
        serde_json::from_str(&serde_json::to_string(&spec).unwrap()).unwrap();

    let runtime = runtime_with(
        vec![
            CompletionResponse::text("draft text"),
            CompletionResponse::text("edited text"),
            CompletionResponse::text("final text"),
        ],
        vec![echo_agent("writer"), echo_agent("editor")],
    );

    let outcome = spec.build().run(runtime, json!("topic")).await.unwrap();
    assert_eq!(outcome.output(), Some(&json!("final text")));
}
