// Plan and reflection data model for the plan -> act -> reflect pattern
//
// A plan is a dependency graph of numbered steps. Execution runs the
// frontier (steps whose dependencies are all completed); a step with unmet
// dependencies is deferred, never skipped. Validation happens on
// construction and on deserialization: duplicate ids or dangling
// dependency references are a planning error, caught before any step runs.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};

/// One step of a plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: u32,
    /// What the step should accomplish, phrased as an instruction
    pub action: String,
    /// Ids of steps that must complete first
    #[serde(default)]
    pub dependencies: BTreeSet<u32>,
    /// Tool names the step expects to use
    #[serde(default)]
    pub tools: BTreeSet<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl PlanStep {
    pub fn new(id: u32, action: impl Into<String>) -> Self {
        Self {
            id,
            action: action.into(),
            dependencies: BTreeSet::new(),
            tools: BTreeSet::new(),
            completed: false,
            result: None,
        }
    }

    pub fn depends_on(mut self, ids: impl IntoIterator<Item = u32>) -> Self {
        self.dependencies.extend(ids);
        self
    }

    pub fn with_tools(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tools.extend(names.into_iter().map(Into::into));
        self
    }

    /// Mark completed with the step's output
    pub fn complete(&mut self, result: impl Into<String>) {
        self.completed = true;
        self.result = Some(result.into());
    }
}

/// A validated dependency graph of steps toward a goal
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "PlanRaw")]
pub struct Plan {
    pub goal: String,
    pub steps: Vec<PlanStep>,
    #[serde(default)]
    pub success_criteria: Vec<String>,
}

/// Unvalidated wire shape; `Plan` is only constructed through validation
#[derive(Debug, Deserialize)]
struct PlanRaw {
    goal: String,
    steps: Vec<PlanStep>,
    #[serde(default)]
    success_criteria: Vec<String>,
}

impl TryFrom<PlanRaw> for Plan {
    type Error = AgentError;

    fn try_from(raw: PlanRaw) -> Result<Self> {
        Plan::new(raw.goal, raw.steps, raw.success_criteria)
    }
}

impl Plan {
    /// Construct a plan, validating step-id uniqueness and dependency
    /// referential integrity
    pub fn new(
        goal: impl Into<String>,
        steps: Vec<PlanStep>,
        success_criteria: Vec<String>,
    ) -> Result<Self> {
        let mut ids = HashSet::new();
        for step in &steps {
            if !ids.insert(step.id) {
                return Err(AgentError::planning(format!(
                    "duplicate step id {} in plan",
                    step.id
                )));
            }
        }
        for step in &steps {
            for dep in &step.dependencies {
                if !ids.contains(dep) {
                    return Err(AgentError::planning(format!(
                        "step {} depends on unknown step {}",
                        step.id, dep
                    )));
                }
            }
        }
        Ok(Self {
            goal: goal.into(),
            steps,
            success_criteria,
        })
    }

    /// Steps runnable now: not completed, all dependencies completed
    pub fn executable_steps(&self) -> Vec<&PlanStep> {
        let done: HashSet<u32> = self
            .steps
            .iter()
            .filter(|s| s.completed)
            .map(|s| s.id)
            .collect();
        self.steps
            .iter()
            .filter(|s| !s.completed && s.dependencies.iter().all(|d| done.contains(d)))
            .collect()
    }

    /// Whether every step has completed. An empty plan counts as completed.
    pub fn is_completed(&self) -> bool {
        self.steps.iter().all(|s| s.completed)
    }

    pub fn step_mut(&mut self, id: u32) -> Option<&mut PlanStep> {
        self.steps.iter_mut().find(|s| s.id == id)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| AgentError::planning(e.to_string()))
    }

    /// Parse and validate a plan from JSON
    pub fn from_json(raw: &str) -> Result<Plan> {
        serde_json::from_str(raw).map_err(|e| match e.classify() {
            serde_json::error::Category::Data => AgentError::planning(e.to_string()),
            _ => AgentError::planning(format!("plan is not valid JSON: {}", e)),
        })
    }
}

/// Model-produced assessment of a run's output against the plan's goal
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "ReflectionRaw")]
pub struct Reflection {
    pub satisfactory: bool,
    /// Quality score in [0, 1]
    pub score: f32,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub suggestions: Vec<String>,
}

/// Unvalidated wire shape; `Reflection` is only constructed through
/// validation
#[derive(Debug, Deserialize)]
struct ReflectionRaw {
    satisfactory: bool,
    score: f32,
    #[serde(default)]
    strengths: Vec<String>,
    #[serde(default)]
    weaknesses: Vec<String>,
    #[serde(default)]
    suggestions: Vec<String>,
}

impl TryFrom<ReflectionRaw> for Reflection {
    type Error = AgentError;

    fn try_from(raw: ReflectionRaw) -> Result<Self> {
        let mut reflection = Reflection::new(raw.satisfactory, raw.score)?;
        reflection.strengths = raw.strengths;
        reflection.weaknesses = raw.weaknesses;
        reflection.suggestions = raw.suggestions;
        Ok(reflection)
    }
}

impl Reflection {
    /// Construct a reflection, rejecting out-of-range scores
    pub fn new(satisfactory: bool, score: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&score) {
            return Err(AgentError::planning(format!(
                "reflection score {} outside [0, 1]",
                score
            )));
        }
        Ok(Self {
            satisfactory,
            score,
            strengths: Vec::new(),
            weaknesses: Vec::new(),
            suggestions: Vec::new(),
        })
    }

    /// Whether another planning attempt is warranted. This is the inverse
    /// of `satisfactory`, by definition.
    pub fn requires_improvement(&self) -> bool {
        !self.satisfactory
    }

    /// Parse and validate a reflection from JSON. Deserialization goes
    /// through the same score validation as `new`.
    pub fn from_json(raw: &str) -> Result<Reflection> {
        serde_json::from_str(raw).map_err(|e| AgentError::planning(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_step_plan() -> Plan {
        Plan::new(
            "ship the report",
            vec![
                PlanStep::new(1, "gather data"),
                PlanStep::new(2, "analyze data").depends_on([1]),
                PlanStep::new(3, "write summary").depends_on([1, 2]),
            ],
            vec!["report covers all regions".to_string()],
        )
        .unwrap()
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let err = Plan::new(
            "g",
            vec![PlanStep::new(1, "a"), PlanStep::new(1, "b")],
            vec![],
        )
        .unwrap_err();
        assert!(matches!(err, AgentError::Planning { .. }));
    }

    #[test]
    fn test_dangling_dependency_rejected() {
        let err = Plan::new("g", vec![PlanStep::new(1, "a").depends_on([9])], vec![]).unwrap_err();
        assert!(matches!(err, AgentError::Planning { .. }));
    }

    #[test]
    fn test_frontier_advances_as_steps_complete() {
        let mut plan = three_step_plan();
        let frontier: Vec<u32> = plan.executable_steps().iter().map(|s| s.id).collect();
        assert_eq!(frontier, vec![1]);

        plan.step_mut(1).unwrap().complete("done");
        let frontier: Vec<u32> = plan.executable_steps().iter().map(|s| s.id).collect();
        assert_eq!(frontier, vec![2]);

        plan.step_mut(2).unwrap().complete("done");
        plan.step_mut(3).unwrap().complete("done");
        assert!(plan.executable_steps().is_empty());
        assert!(plan.is_completed());
    }

    #[test]
    fn test_empty_plan_counts_as_completed() {
        let plan = Plan::new("noop", vec![], vec![]).unwrap();
        assert!(plan.is_completed());
    }

    #[test]
    fn test_json_round_trip_revalidates() {
        let plan = three_step_plan();
        let json = plan.to_json().unwrap();
        let back = Plan::from_json(&json).unwrap();
        assert_eq!(back.steps.len(), 3);

        // Deserialization goes through the same validation
        let bad = r#"{"goal":"g","steps":[{"id":1,"action":"a","dependencies":[7]}]}"#;
        assert!(matches!(
            Plan::from_json(bad),
            Err(AgentError::Planning { .. })
        ));
    }

    #[test]
    fn test_reflection_score_bounds() {
        assert!(Reflection::new(true, 0.0).is_ok());
        assert!(Reflection::new(true, 1.0).is_ok());
        assert!(Reflection::new(true, 1.01).is_err());
        assert!(Reflection::new(true, -0.1).is_err());
    }

    #[test]
    fn test_reflection_deserialization_revalidates() {
        let reflection: Reflection = serde_json::from_str(
            r#"{"satisfactory":false,"score":0.4,"weaknesses":["thin coverage"]}"#,
        )
        .unwrap();
        assert_eq!(reflection.weaknesses, vec!["thin coverage"]);
        assert!(reflection.strengths.is_empty());

        // Raw serde cannot bypass the score bounds
        assert!(serde_json::from_str::<Reflection>(r#"{"satisfactory":true,"score":1.5}"#).is_err());
    }

    #[test]
    fn test_requires_improvement_is_inverse_of_satisfactory() {
        assert!(!Reflection::new(true, 0.9).unwrap().requires_improvement());
        assert!(Reflection::new(false, 0.9).unwrap().requires_improvement());
    }
}
