//! Human checkpoint executor.
//!
//! Pauses the workflow for a person's decision. The decision is read from task
//! metadata under `approval:<step name>`: `true`/`"approved"` passes,
//! `false`/`"rejected"` fails, anything else keeps the step awaiting approval.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use crate::domain::{StepDefinition, StepResult, StepStatus, StepType, Task};
use crate::error::Result;
use crate::executor::{ExecutionContext, Executor};

/// Metadata key holding the decision for `step_name`
pub fn approval_key(step_name: &str) -> String {
    format!("approval:{}", step_name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approved,
    Rejected,
    Pending,
}

impl Decision {
    fn from_value(value: Option<&Value>) -> Self {
        match value {
            Some(Value::Bool(true)) => Decision::Approved,
            Some(Value::Bool(false)) => Decision::Rejected,
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "approved" | "approve" | "yes" => Decision::Approved,
                "rejected" | "reject" | "no" => Decision::Rejected,
                _ => Decision::Pending,
            },
            _ => Decision::Pending,
        }
    }
}

#[derive(Debug, Default)]
pub struct HumanExecutor;

impl HumanExecutor {
    pub fn new() -> Self {
        Self
    }

    pub fn decision(task: &Task, step_name: &str) -> Decision {
        Decision::from_value(task.metadata.get(&approval_key(step_name)))
    }
}

#[async_trait]
impl Executor for HumanExecutor {
    fn step_type(&self) -> StepType {
        StepType::Human
    }

    async fn execute(&self, ctx: &ExecutionContext, task: &mut Task, step: &StepDefinition) -> Result<StepResult> {
        ctx.check_cancelled()?;
        let started_at = Utc::now();
        let prompt = step.config_str("prompt").unwrap_or("Approval required");

        let result = match Self::decision(task, &step.name) {
            Decision::Approved => StepResult::new(step, StepStatus::Success, started_at).with_output("Approved"),
            Decision::Rejected => StepResult::new(step, StepStatus::Failed, started_at)
                .with_output("Rejected")
                .with_error("rejected_by_human"),
            Decision::Pending => {
                log::info!("Task {} waiting for approval at step '{}'", task.id, step.name);
                StepResult::new(step, StepStatus::AwaitingApproval, started_at)
                    .with_output(prompt)
                    .with_metadata("approval_key", approval_key(&step.name))
            }
        };
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutorRegistry;
    use std::sync::Arc;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(Arc::new(ExecutorRegistry::new()))
    }

    #[tokio::test]
    async fn test_waits_without_decision() {
        let step = StepDefinition::new("review", StepType::Human).with_config("prompt", "Review the PR");
        let mut task = Task::new("t", "d");
        let result = HumanExecutor::new().execute(&ctx(), &mut task, &step).await.unwrap();
        assert_eq!(result.status, StepStatus::AwaitingApproval);
        assert_eq!(result.output, "Review the PR");
        assert_eq!(result.metadata_value("approval_key"), Some(&Value::from("approval:review")));
    }

    #[tokio::test]
    async fn test_decisions() {
        let step = StepDefinition::new("review", StepType::Human);
        let mut task = Task::new("t", "d");

        task.set_metadata(approval_key("review"), "Approved");
        let result = HumanExecutor::new().execute(&ctx(), &mut task, &step).await.unwrap();
        assert_eq!(result.status, StepStatus::Success);

        task.set_metadata(approval_key("review"), false);
        let result = HumanExecutor::new().execute(&ctx(), &mut task, &step).await.unwrap();
        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("rejected_by_human"));

        task.set_metadata(approval_key("review"), "maybe");
        assert_eq!(HumanExecutor::decision(&task, "review"), Decision::Pending);
    }
}
