//! Executor contract and dispatch.
//!
//! Every step type is served by one `Executor` bound in the `ExecutorRegistry`.
//! Executors receive an `ExecutionContext` carrying the cancellation token and
//! the shared collaborators, including the registry itself so composite
//! executors (the loop executor) can dispatch inner steps.

mod registry;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::artifact::ArtifactSaver;
use crate::config::Config;
use crate::domain::{StepDefinition, StepResult, StepStatus, StepType, Task};
use crate::error::{Result, StepError};

pub use registry::{Builtins, ExecutorRegistry};

/// Runs one kind of step.
///
/// Implementations must check `ctx.check_cancelled()` before starting and at
/// every suspension point, returning `StepError::Cancelled` without a result.
#[async_trait]
pub trait Executor: Send + Sync {
    /// The step type this executor handles; used only as the registry key
    fn step_type(&self) -> StepType;

    /// Execute the step, producing exactly one result or failing
    async fn execute(&self, ctx: &ExecutionContext, task: &mut Task, step: &StepDefinition) -> Result<StepResult>;
}

/// Per-run context shared by all executors
#[derive(Clone)]
pub struct ExecutionContext {
    pub cancel: CancellationToken,
    pub workspace: String,
    pub registry: Arc<ExecutorRegistry>,
    pub artifacts: Option<Arc<dyn ArtifactSaver>>,
    pub config: Arc<Config>,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("workspace", &self.workspace)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("types", &self.registry.types())
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    pub fn new(registry: Arc<ExecutorRegistry>) -> Self {
        Self {
            cancel: CancellationToken::new(),
            workspace: "default".to_string(),
            registry,
            artifacts: None,
            config: Arc::new(Config::default()),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = workspace.into();
        self
    }

    pub fn with_artifacts(mut self, artifacts: Arc<dyn ArtifactSaver>) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    pub fn with_config(mut self, config: Arc<Config>) -> Self {
        self.config = config;
        self
    }

    /// Return `Err(Cancelled)` if the governing token has fired.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(StepError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Look up the executor for `step` and run it, applying the step-level timeout.
    ///
    /// A timed-out step becomes a `failed` result; cancellation and executor
    /// errors are returned unchanged.
    pub async fn dispatch(&self, task: &mut Task, step: &StepDefinition) -> Result<StepResult> {
        self.check_cancelled()?;
        let executor = self.registry.get(step.step_type)?;
        log::debug!("Dispatching step '{}' ({}) for task {}", step.name, step.step_type, task.id);

        let Some(limit) = step.timeout else {
            return executor.execute(self, task, step).await;
        };

        let started_at = Utc::now();
        match tokio::time::timeout(limit, executor.execute(self, task, step)).await {
            Ok(result) => result,
            Err(_) => {
                log::warn!("Step '{}' timed out after {:?}", step.name, limit);
                Ok(StepResult::new(step, StepStatus::Failed, started_at)
                    .with_output(format!(
                        "Step timed out after {}",
                        crate::duration::format_duration(limit)
                    ))
                    .with_error("step_timeout"))
            }
        }
    }

    /// Save an audit artifact, logging instead of failing.
    ///
    /// Returns `Ok(None)` when no saver is configured, the saved filename on
    /// success, or the error text when the save failed.
    pub fn save_artifact_versioned(
        &self,
        task_id: &str,
        base_name: &str,
        data: &[u8],
    ) -> std::result::Result<Option<String>, String> {
        let Some(saver) = &self.artifacts else {
            return Ok(None);
        };
        saver
            .save_versioned(&self.workspace, task_id, base_name, data)
            .map(Some)
            .map_err(|e| {
                log::warn!("Failed to save artifact {} for task {}: {}", base_name, task_id, e);
                e.to_string()
            })
    }
}
