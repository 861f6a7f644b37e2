// Plan -> act -> reflect pattern
//
// The planning agent decomposes a goal into a validated dependency graph,
// executes the frontier step by step through the runtime (so steps get the
// agent's tools), then has the model judge the combined result. An
// unsatisfactory reflection feeds its weaknesses and suggestions back into
// a fresh planning attempt, up to a bounded number of attempts. A step with
// unmet dependencies is deferred until they complete, never skipped.

use std::sync::Arc;

use serde_json::json;
use ulid::Ulid;

use crate::error::{AgentError, Result};
use crate::executor::AgentExecutor;
use crate::message::Message;
use crate::plan::{Plan, Reflection};
use crate::provider::{CompletionRequest, GenerationParams};
use crate::runtime::{AgentRuntime, RunOutcome};

/// Default cap on plan attempts (initial plan plus replans)
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

const PLAN_INSTRUCTIONS: &str = "You are a planning assistant. Decompose the goal into a JSON plan.\n\
Respond with exactly one JSON object of the shape:\n\
{\"goal\": string, \"steps\": [{\"id\": number, \"action\": string, \
\"dependencies\": [number], \"tools\": [string]}], \"success_criteria\": [string]}\n\
Step ids must be unique; dependencies may only reference listed step ids.";

const REFLECT_INSTRUCTIONS: &str = "You are a critical reviewer. Judge whether the result achieves the goal.\n\
Respond with exactly one JSON object of the shape:\n\
{\"satisfactory\": boolean, \"score\": number between 0 and 1, \
\"strengths\": [string], \"weaknesses\": [string], \"suggestions\": [string]}";

/// Drives the plan -> act -> reflect cycle for one agent
pub struct PlanningAgent {
    runtime: Arc<AgentRuntime>,
    agent_name: String,
    max_attempts: usize,
}

/// Terminal status of a planning run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanningStatus {
    /// A reflection judged the result satisfactory
    Success,
    /// Every attempt was exhausted without a satisfactory result
    Failed,
}

/// Everything a planning run produced, successful or not
#[derive(Debug)]
pub struct PlanningResponse {
    pub status: PlanningStatus,
    /// Combined result of the last executed plan
    pub result: String,
    /// The last plan that was executed (None when no plan ever parsed)
    pub plan: Option<Plan>,
    /// The last reflection (None when no reflection ever parsed)
    pub reflection: Option<Reflection>,
    /// Attempts consumed (1 = first plan sufficed)
    pub attempts: usize,
    /// Per-step results of the last executed plan, in completion order
    pub step_results: Vec<(u32, String)>,
}

impl PlanningResponse {
    pub fn is_success(&self) -> bool {
        self.status == PlanningStatus::Success
    }

    pub fn is_failed(&self) -> bool {
        self.status == PlanningStatus::Failed
    }

    pub fn strengths(&self) -> &[String] {
        self.reflection.as_ref().map_or(&[], |r| &r.strengths)
    }

    pub fn weaknesses(&self) -> &[String] {
        self.reflection.as_ref().map_or(&[], |r| &r.weaknesses)
    }

    pub fn suggestions(&self) -> &[String] {
        self.reflection.as_ref().map_or(&[], |r| &r.suggestions)
    }
}

impl PlanningAgent {
    pub fn new(runtime: Arc<AgentRuntime>, agent_name: impl Into<String>) -> Self {
        Self {
            runtime,
            agent_name: agent_name.into(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Run the full cycle for a goal
    pub async fn run(&self, goal: &str) -> Result<PlanningResponse> {
        let agent = self.runtime.agents().resolve(&self.agent_name)?;
        let mut feedback: Option<String> = None;
        let mut last_plan: Option<Plan> = None;
        let mut last_reflection: Option<Reflection> = None;
        let mut last_result = String::new();
        let mut last_steps: Vec<(u32, String)> = Vec::new();

        for attempt in 1..=self.max_attempts {
            let mut plan = match self.plan(&agent.model, goal, feedback.as_deref()).await {
                Ok(plan) => plan,
                Err(e) => {
                    tracing::debug!(attempt, error = %e, "plan generation failed, replanning");
                    feedback = Some(format!("The previous plan was invalid: {}", e));
                    continue;
                }
            };

            match self.act(goal, &mut plan).await {
                Ok(step_results) => {
                    let result = combine_results(&step_results);
                    last_steps = step_results;
                    last_result = result.clone();
                    last_plan = Some(plan);

                    match self.reflect(&agent.model, goal, &result).await {
                        Ok(reflection) => {
                            let satisfied = !reflection.requires_improvement();
                            feedback = Some(improvement_feedback(&reflection));
                            last_reflection = Some(reflection);
                            if satisfied {
                                return Ok(PlanningResponse {
                                    status: PlanningStatus::Success,
                                    result: last_result,
                                    plan: last_plan,
                                    reflection: last_reflection,
                                    attempts: attempt,
                                    step_results: last_steps,
                                });
                            }
                        }
                        Err(e) => {
                            tracing::debug!(attempt, error = %e, "reflection unparseable, replanning");
                            feedback = Some(format!("The result could not be assessed: {}", e));
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!(attempt, error = %e, "plan execution failed, replanning");
                    last_plan = Some(plan);
                    feedback = Some(format!("The previous plan failed during execution: {}", e));
                }
            }
        }

        Ok(PlanningResponse {
            status: PlanningStatus::Failed,
            result: last_result,
            plan: last_plan,
            reflection: last_reflection,
            attempts: self.max_attempts,
            step_results: last_steps,
        })
    }

    /// One planning call: goal (plus replan feedback) -> validated Plan
    async fn plan(&self, model: &str, goal: &str, feedback: Option<&str>) -> Result<Plan> {
        let mut prompt = format!("Goal: {}", goal);
        if let Some(feedback) = feedback {
            prompt.push_str("\n\nFeedback on the previous attempt:\n");
            prompt.push_str(feedback);
        }
        let response = self
            .runtime
            .provider()
            .complete(CompletionRequest {
                model: model.to_string(),
                messages: vec![Message::system(PLAN_INSTRUCTIONS), Message::user(prompt)],
                tools: Vec::new(),
                params: GenerationParams::default(),
            })
            .await?;
        let text = response
            .text
            .ok_or_else(|| AgentError::planning("planner returned no text"))?;
        let raw = extract_json_block(&text)
            .ok_or_else(|| AgentError::planning("planner output contains no JSON object"))?;
        Plan::from_json(&raw)
    }

    /// Execute the frontier until the plan completes. All steps of one plan
    /// share a session, so later steps see earlier results in history.
    async fn act(&self, goal: &str, plan: &mut Plan) -> Result<Vec<(u32, String)>> {
        let session_id = format!("plan:{}", Ulid::new());
        let mut results = Vec::new();

        while !plan.is_completed() {
            let frontier: Vec<u32> = plan.executable_steps().iter().map(|s| s.id).collect();
            if frontier.is_empty() {
                return Err(AgentError::planning(
                    "no executable step remains; the dependency graph is cyclic",
                ));
            }
            for id in frontier {
                let action = match plan.step_mut(id) {
                    Some(step) => step.action.clone(),
                    None => continue,
                };
                let input = json!({
                    "goal": goal,
                    "step": id,
                    "action": action,
                    "completed_steps": results
                        .iter()
                        .map(|(id, result)| json!({"step": id, "result": result}))
                        .collect::<Vec<_>>(),
                });
                let outcome = AgentExecutor::new(self.runtime.clone(), &self.agent_name)
                    .with_session(&session_id)
                    .with_input(input)
                    .execute()
                    .await;
                match outcome {
                    RunOutcome::Completed(text) => {
                        results.push((id, text.clone()));
                        if let Some(step) = plan.step_mut(id) {
                            step.complete(text);
                        }
                    }
                    RunOutcome::Interrupted(record) => {
                        return Err(AgentError::planning_step(
                            id,
                            format!("suspended on pending interrupt {}", record.id),
                        ));
                    }
                    RunOutcome::Failed(e) => {
                        return Err(AgentError::planning_step(id, e.to_string()));
                    }
                }
            }
        }
        Ok(results)
    }

    /// One reflection call: goal + result -> validated Reflection
    async fn reflect(&self, model: &str, goal: &str, result: &str) -> Result<Reflection> {
        let prompt = format!("Goal: {}\n\nResult:\n{}", goal, result);
        let response = self
            .runtime
            .provider()
            .complete(CompletionRequest {
                model: model.to_string(),
                messages: vec![Message::system(REFLECT_INSTRUCTIONS), Message::user(prompt)],
                tools: Vec::new(),
                params: GenerationParams::default(),
            })
            .await?;
        let text = response
            .text
            .ok_or_else(|| AgentError::planning("reviewer returned no text"))?;
        let raw = extract_json_block(&text)
            .ok_or_else(|| AgentError::planning("reviewer output contains no JSON object"))?;
        Reflection::from_json(&raw)
    }
}

fn combine_results(step_results: &[(u32, String)]) -> String {
    match step_results {
        [] => String::new(),
        [(_, only)] => only.clone(),
        many => many
            .iter()
            .map(|(id, result)| format!("[step {}] {}", id, result))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn improvement_feedback(reflection: &Reflection) -> String {
    let mut feedback = String::new();
    if !reflection.weaknesses.is_empty() {
        feedback.push_str("Weaknesses:\n");
        for w in &reflection.weaknesses {
            feedback.push_str(&format!("- {}\n", w));
        }
    }
    if !reflection.suggestions.is_empty() {
        feedback.push_str("Suggestions:\n");
        for s in &reflection.suggestions {
            feedback.push_str(&format!("- {}\n", s));
        }
    }
    feedback
}

/// Pull the first JSON object out of model output: a fenced ```json block
/// when present, otherwise the first balanced top-level object.
pub(crate) fn extract_json_block(output: &str) -> Option<String> {
    if let Some(start) = output.find("```json") {
        let rest = &output[start + 7..];
        if let Some(end) = rest.find("```") {
            return Some(rest[..end].trim().to_string());
        }
    }
    let start = output.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in output[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(output[start..start + offset + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_fenced_json() {
        let output = "Here you go:\n```json\n{\"goal\": \"g\", \"steps\": []}\n```\nDone.";
        assert_eq!(
            extract_json_block(output).unwrap(),
            "{\"goal\": \"g\", \"steps\": []}"
        );
    }

    #[test]
    fn test_extract_balanced_object() {
        let output = "The plan is {\"a\": {\"b\": \"}\"}} and nothing else";
        assert_eq!(
            extract_json_block(output).unwrap(),
            "{\"a\": {\"b\": \"}\"}}"
        );
    }

    #[test]
    fn test_extract_rejects_unbalanced_and_plain_text() {
        assert!(extract_json_block("no json here").is_none());
        assert!(extract_json_block("{\"unclosed\": ").is_none());
    }

    #[test]
    fn test_combine_results_single_vs_many() {
        assert_eq!(combine_results(&[(1, "only".into())]), "only");
        let combined = combine_results(&[(1, "a".into()), (2, "b".into())]);
        assert_eq!(combined, "[step 1] a\n[step 2] b");
    }
}
