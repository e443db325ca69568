//! Task driver: runs a workflow's steps in order against one task.
//!
//! The driver owns the step cursor. A step that allows continuation advances
//! it; a step awaiting approval leaves it in place so the next run retries that
//! step; a failed step stops the run.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::domain::{StepDefinition, StepResult, StepStatus, Task};
use crate::error::{Result, StepError};
use crate::executor::ExecutionContext;
use crate::loops::state::{key_component, write_atomic};

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Every step ran
    Completed,
    /// Stopped at a step waiting for a person
    AwaitingApproval { step: String },
    /// Stopped at a failed step
    Failed { step: String, error: Option<String> },
}

impl TaskOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, TaskOutcome::Completed)
    }
}

pub struct TaskDriver {
    ctx: ExecutionContext,
    steps: Vec<StepDefinition>,
    dry_run: bool,
}

impl TaskDriver {
    pub fn new(ctx: ExecutionContext, steps: Vec<StepDefinition>) -> Self {
        Self {
            ctx,
            steps,
            dry_run: false,
        }
    }

    /// Record `would_execute` results instead of running steps
    pub fn dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }

    pub fn steps(&self) -> &[StepDefinition] {
        &self.steps
    }

    /// Run from `task.current_step` to the end or the first step that stops the run.
    pub async fn run(&self, task: &mut Task) -> Result<TaskOutcome> {
        log::info!(
            "Running task {} from step {} of {}{}",
            task.id,
            task.current_step,
            self.steps.len(),
            if self.dry_run { " (dry run)" } else { "" }
        );

        while let Some(step) = self.steps.get(task.current_step) {
            self.ctx.check_cancelled()?;

            let result = if self.dry_run {
                // Surface unbound types even when nothing runs
                self.ctx.registry.get(step.step_type)?;
                StepResult::new(step, StepStatus::WouldExecute, Utc::now())
                    .with_output(format!("Would execute {} step '{}'", step.step_type, step.name))
            } else {
                self.ctx.dispatch(task, step).await?
            };

            let status = result.status;
            let error = result.error.clone();
            log::info!("Step '{}' finished: {}", step.name, status);
            task.record_result(result);

            if status.allows_continue() {
                task.current_step += 1;
            } else if status.is_terminal_failure() {
                return Ok(TaskOutcome::Failed {
                    step: step.name.clone(),
                    error,
                });
            } else {
                return Ok(TaskOutcome::AwaitingApproval {
                    step: step.name.clone(),
                });
            }
        }

        log::info!("Task {} completed", task.id);
        Ok(TaskOutcome::Completed)
    }
}

/// Path of a task's saved record under `dir`
pub fn task_path(dir: &Path, task_id: &str) -> PathBuf {
    dir.join(format!("{}.json", key_component(task_id)))
}

/// Persist a task record atomically.
pub fn save_task(dir: &Path, task: &Task) -> Result<PathBuf> {
    let path = task_path(dir, &task.id);
    let data = serde_json::to_vec_pretty(task)?;
    write_atomic(&path, &data).map_err(|e| StepError::Storage(format!("{}: {}", path.display(), e)))?;
    Ok(path)
}

/// Load a saved task record, `Ok(None)` if it was never saved.
pub fn load_task(dir: &Path, task_id: &str) -> Result<Option<Task>> {
    let path = task_path(dir, task_id);
    match fs::read_to_string(&path) {
        Ok(data) => serde_json::from_str(&data)
            .map(Some)
            .map_err(|e| StepError::Storage(format!("corrupt task record {}: {}", path.display(), e))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StepError::Storage(format!("{}: {}", path.display(), e))),
    }
}
