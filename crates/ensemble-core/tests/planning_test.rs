// Integration tests for the plan -> act -> reflect cycle
//
// The scripted provider plays all three roles in order: planner, step
// executor, and reviewer.

use std::sync::Arc;

use ensemble_core::in_memory::MockCompletionProvider;
use ensemble_core::{
    AgentDefinition, AgentRegistry, AgentRuntime, CompletionResponse, PlanningAgent,
};
use serde_json::json;

fn runtime_with(responses: Vec<CompletionResponse>) -> (Arc<AgentRuntime>, Arc<MockCompletionProvider>) {
    let provider = Arc::new(MockCompletionProvider::new(responses));
    let mut agents = AgentRegistry::new();
    agents.register(AgentDefinition::new(
        "analyst",
        "Execute plan steps.",
        "test-model",
    ));
    let runtime = Arc::new(AgentRuntime::builder(provider.clone()).agents(agents).build());
    (runtime, provider)
}

fn plan_json(steps: serde_json::Value) -> CompletionResponse {
    CompletionResponse::text(
        json!({
            "goal": "compare regions",
            "steps": steps,
            "success_criteria": ["both regions covered"]
        })
        .to_string(),
    )
}

fn reflection_json(satisfactory: bool, score: f64, suggestions: Vec<&str>) -> CompletionResponse {
    CompletionResponse::text(
        json!({
            "satisfactory": satisfactory,
            "score": score,
            "strengths": [],
            "weaknesses": if satisfactory { json!([]) } else { json!(["missing the south region"]) },
            "suggestions": suggestions
        })
        .to_string(),
    )
}

#[tokio::test]
async fn test_single_attempt_success() {
    let (runtime, provider) = runtime_with(vec![
        plan_json(json!([
            {"id": 1, "action": "gather north data", "dependencies": [], "tools": []},
            {"id": 2, "action": "compare with south", "dependencies": [1], "tools": []}
        ])),
        CompletionResponse::text("north: 42"),
        CompletionResponse::text("south is higher at 55"),
        reflection_json(true, 0.9, vec![]),
    ]);

    let response = PlanningAgent::new(runtime, "analyst")
        .run("compare regions")
        .await
        .unwrap();

    assert!(response.is_success());
    assert_eq!(response.attempts, 1);
    // Dependency order: step 2 ran only after step 1 completed
    let ids: Vec<u32> = response.step_results.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, vec![1, 2]);
    assert!(response.result.contains("north: 42"));
    assert!(response.result.contains("south is higher"));
    assert!(response.plan.unwrap().is_completed());
    assert_eq!(provider.call_count(), 4);
}

#[tokio::test]
async fn test_unsatisfactory_reflection_triggers_replan_with_feedback() {
    let (runtime, provider) = runtime_with(vec![
        // Attempt 1
        plan_json(json!([
            {"id": 1, "action": "gather data", "dependencies": [], "tools": []}
        ])),
        CompletionResponse::text("north only: 42"),
        reflection_json(false, 0.4, vec!["also gather the south region"]),
        // Attempt 2
        plan_json(json!([
            {"id": 1, "action": "gather both regions", "dependencies": [], "tools": []}
        ])),
        CompletionResponse::text("north 42, south 55"),
        reflection_json(true, 0.9, vec![]),
    ]);

    let response = PlanningAgent::new(runtime, "analyst")
        .run("compare regions")
        .await
        .unwrap();

    assert!(response.is_success());
    assert_eq!(response.attempts, 2);
    assert_eq!(response.result, "north 42, south 55");

    // The replan prompt carried the reviewer's feedback forward
    let replan_request = &provider.requests()[3];
    let prompt = &replan_request.messages.last().unwrap().content;
    assert!(prompt.contains("missing the south region"));
    assert!(prompt.contains("also gather the south region"));
}

#[tokio::test]
async fn test_invalid_plan_consumes_an_attempt() {
    let (runtime, _) = runtime_with(vec![CompletionResponse::text(
        "I would rather chat than produce JSON",
    )]);

    let response = PlanningAgent::new(runtime, "analyst")
        .with_max_attempts(1)
        .run("compare regions")
        .await
        .unwrap();

    assert!(response.is_failed());
    assert!(response.plan.is_none());
    assert!(response.reflection.is_none());
}

#[tokio::test]
async fn test_attempts_are_bounded() {
    // Every attempt produces a plan that executes but never satisfies
    let mut responses = Vec::new();
    for _ in 0..2 {
        responses.push(plan_json(json!([
            {"id": 1, "action": "try again", "dependencies": [], "tools": []}
        ])));
        responses.push(CompletionResponse::text("partial answer"));
        responses.push(reflection_json(false, 0.3, vec!["try harder"]));
    }
    let (runtime, provider) = runtime_with(responses);

    let response = PlanningAgent::new(runtime, "analyst")
        .with_max_attempts(2)
        .run("compare regions")
        .await
        .unwrap();

    assert!(response.is_failed());
    assert_eq!(response.attempts, 2);
    assert_eq!(response.result, "partial answer");
    assert!(response
        .weaknesses()
        .iter()
        .any(|w| w.contains("south region")));
    assert_eq!(provider.call_count(), 6);
}

#[tokio::test]
async fn test_step_failure_feeds_replan() {
    let (runtime, provider) = runtime_with(vec![
        // Attempt 1: the plan references a step that fails (provider has no
        // scripted response for it after the plan, simulating a dead step)
        plan_json(json!([
            {"id": 1, "action": "impossible step", "dependencies": [], "tools": []}
        ])),
        // Step run fails fatally at the provider
        // (no response scripted -> provider error)
    ]);

    let response = PlanningAgent::new(runtime, "analyst")
        .with_max_attempts(1)
        .run("compare regions")
        .await
        .unwrap();

    assert!(response.is_failed());
    // The failing plan is kept for inspection
    assert!(response.plan.is_some());
    assert!(!response.plan.unwrap().is_completed());
    assert_eq!(provider.call_count(), 2);
}
