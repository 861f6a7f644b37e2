// Interval scheduler - recurring agent runs
//
// Thin glue over tokio intervals: each schedule runs one agent with a fixed
// input on a fixed period, against a stable per-schedule session so the
// agent sees its own earlier runs. Outcomes are logged, never retried; a
// failing tick does not stop the schedule.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::executor::AgentExecutor;
use crate::runtime::{AgentRuntime, RunOutcome};

/// One recurring agent invocation
#[derive(Debug, Clone)]
pub struct Schedule {
    /// Schedule name; also keys the session the runs share
    pub name: String,
    pub every: Duration,
    pub agent: String,
    pub input: Value,
}

impl Schedule {
    pub fn new(
        name: impl Into<String>,
        every: Duration,
        agent: impl Into<String>,
        input: Value,
    ) -> Self {
        Self {
            name: name.into(),
            every,
            agent: agent.into(),
            input,
        }
    }

    fn session_id(&self) -> String {
        format!("schedule:{}", self.name)
    }
}

/// Spawns and tracks recurring runs
pub struct Scheduler {
    runtime: Arc<AgentRuntime>,
}

impl Scheduler {
    pub fn new(runtime: Arc<AgentRuntime>) -> Self {
        Self { runtime }
    }

    /// Start a schedule on a background task. The first run happens after
    /// one full period, then every period after that.
    pub fn spawn(&self, schedule: Schedule) -> ScheduledTask {
        let runtime = self.runtime.clone();
        let handle = tokio::spawn(async move {
            let session_id = schedule.session_id();
            let mut interval = tokio::time::interval(schedule.every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick of a tokio interval fires immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                let outcome = AgentExecutor::new(runtime.clone(), &schedule.agent)
                    .with_session(&session_id)
                    .with_input(schedule.input.clone())
                    .execute()
                    .await;
                match outcome {
                    RunOutcome::Completed(_) => {
                        tracing::debug!(schedule = %schedule.name, "scheduled run completed");
                    }
                    RunOutcome::Interrupted(record) => {
                        tracing::info!(
                            schedule = %schedule.name,
                            interrupt_id = %record.id,
                            "scheduled run suspended on interrupt"
                        );
                    }
                    RunOutcome::Failed(e) => {
                        tracing::warn!(schedule = %schedule.name, error = %e, "scheduled run failed");
                    }
                }
            }
        });
        ScheduledTask { handle }
    }
}

/// Handle to a running schedule
pub struct ScheduledTask {
    handle: tokio::task::JoinHandle<()>,
}

impl ScheduledTask {
    /// Stop the schedule
    pub fn stop(&self) {
        self.handle.abort();
    }

    pub fn is_stopped(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentDefinition, AgentRegistry};
    use crate::in_memory::MockCompletionProvider;
    use crate::provider::CompletionResponse;

    #[tokio::test(start_paused = true)]
    async fn test_schedule_runs_on_the_period() {
        let provider = Arc::new(MockCompletionProvider::new(vec![
            CompletionResponse::text("tick 1"),
            CompletionResponse::text("tick 2"),
        ]));
        let mut agents = AgentRegistry::new();
        agents.register(AgentDefinition::new("reporter", "Report status.", "test-model"));
        let runtime = Arc::new(
            AgentRuntime::builder(provider.clone())
                .agents(agents)
                .build(),
        );

        let task = Scheduler::new(runtime).spawn(Schedule::new(
            "status",
            Duration::from_secs(60),
            "reporter",
            Value::Null,
        ));

        // Nothing before the first period elapses
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(provider.call_count(), 0);

        tokio::time::sleep(Duration::from_secs(31)).await;
        tokio::task::yield_now().await;
        assert_eq!(provider.call_count(), 1);

        task.stop();
    }
}
