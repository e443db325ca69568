//! Loop step executor.
//!
//! Runs a fixed list of inner steps repeatedly until the exit evaluator lets
//! the loop stop or the iteration budget is spent. Each completed iteration is
//! checkpointed before the next begins, so an interrupted loop resumes where
//! it left off.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use super::exit::{EvaluationResult, ExitEvaluator};
use super::scratchpad::{IterationSummary, Scratchpad};
use super::state::{IterationResult, LoopState, LoopStateStore};
use crate::domain::{StepDefinition, StepResult, StepStatus, StepType, Task};
use crate::error::{Result, StepError};
use crate::executor::{ExecutionContext, Executor};

/// Base filename of the saved loop summary
pub const LOOP_ARTIFACT: &str = "loop-summary.json";

const SUMMARY_LIMIT: usize = 500;

/// Why a loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    ExitSignal,
    MaxIterations,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::ExitSignal => "exit_signal",
            ExitReason::MaxIterations => "max_iterations",
        }
    }
}

/// Typed view of a loop step's config
#[derive(Debug, Clone, PartialEq)]
pub struct LoopStepConfig {
    pub max_iterations: u32,
    pub steps: Vec<StepDefinition>,
    pub exit_conditions: Vec<String>,
    /// Scratchpad file name override
    pub scratchpad: Option<String>,
}

impl LoopStepConfig {
    pub fn from_step(step: &StepDefinition, default_max_iterations: u32) -> Result<Self> {
        let max_iterations = match step.config.get("max_iterations") {
            None | Some(Value::Null) => default_max_iterations,
            Some(v) => v
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| StepError::InvalidConfig(format!("max_iterations: not a count: {}", v)))?,
        };
        if max_iterations == 0 {
            return Err(StepError::InvalidConfig("max_iterations must be > 0".into()));
        }

        let steps: Vec<StepDefinition> = match step.config.get("steps") {
            None | Some(Value::Null) => Vec::new(),
            Some(v) => serde_json::from_value(v.clone())
                .map_err(|e| StepError::InvalidConfig(format!("steps: {}", e)))?,
        };

        let exit_conditions = match step.config.get("exit_conditions") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::String(s)) => vec![s.clone()],
            Some(v) => serde_json::from_value::<Vec<String>>(v.clone())
                .map_err(|e| StepError::InvalidConfig(format!("exit_conditions: {}", e)))?,
        };

        let scratchpad = step.config_str("scratchpad").map(str::to_string);

        Ok(Self {
            max_iterations,
            steps,
            exit_conditions,
            scratchpad,
        })
    }

    /// Check what can be checked before any inner step runs.
    fn validate(&self, step: &StepDefinition, ctx: &ExecutionContext) -> Result<()> {
        if self.steps.is_empty() {
            return Err(StepError::InvalidConfig(format!("loop '{}' has no inner steps", step.name)));
        }
        for inner in &self.steps {
            if inner.step_type == StepType::Loop && inner.name == step.name {
                return Err(StepError::InvalidConfig(format!("loop '{}' contains itself", step.name)));
            }
            if !ctx.registry.has(inner.step_type) {
                return Err(StepError::ExecutorNotFound(inner.step_type));
            }
        }
        Ok(())
    }
}

/// What one pass over the inner steps produced
struct IterationOutcome {
    output: String,
    files_changed: Vec<String>,
    success: bool,
    error: Option<String>,
}

#[derive(Default)]
pub struct LoopExecutor {
    state_store: Option<Arc<dyn LoopStateStore>>,
    scratchpad_dir: Option<PathBuf>,
}

impl LoopExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state_store(mut self, store: Arc<dyn LoopStateStore>) -> Self {
        self.state_store = Some(store);
        self
    }

    /// Keep a scratchpad per loop under `dir`
    pub fn with_scratchpad_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.scratchpad_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    async fn run_iteration(
        &self,
        ctx: &ExecutionContext,
        task: &mut Task,
        config: &LoopStepConfig,
    ) -> Result<IterationOutcome> {
        let mut outcome = IterationOutcome {
            output: String::new(),
            files_changed: Vec::new(),
            success: true,
            error: None,
        };
        let mut outputs = Vec::new();

        for inner in &config.steps {
            match ctx.dispatch(task, inner).await {
                Ok(result) => {
                    if !result.output.is_empty() {
                        outputs.push(result.output.clone());
                    }
                    for file in &result.files_changed {
                        if !outcome.files_changed.contains(file) {
                            outcome.files_changed.push(file.clone());
                        }
                    }
                    let proceed = result.status.allows_continue();
                    if !proceed {
                        outcome.success = false;
                        outcome.error = Some(match &result.error {
                            Some(e) => format!("{}: {}", inner.name, e),
                            None => format!("{}: {}", inner.name, result.status),
                        });
                    }
                    task.record_result(result);
                    if !proceed {
                        break;
                    }
                }
                Err(StepError::Cancelled) => return Err(StepError::Cancelled),
                Err(e) => {
                    log::warn!("Inner step '{}' errored: {}", inner.name, e);
                    outcome.success = false;
                    outcome.error = Some(format!("{}: {}", inner.name, e));
                    break;
                }
            }
        }

        outcome.output = outputs.join("\n");
        Ok(outcome)
    }

    fn open_scratchpad(&self, task: &Task, step: &StepDefinition, config: &LoopStepConfig) -> Option<Scratchpad> {
        let dir = self.scratchpad_dir.as_ref()?;
        let pad = Scratchpad::for_loop(dir, &task.id, &step.name, config.scratchpad.as_deref());
        if let Err(e) = pad.initialize(&task.id, &step.name) {
            log::warn!("Scratchpad unavailable for loop '{}': {}", step.name, e);
        }
        Some(pad)
    }
}

fn summarize(output: &str, evaluation: &EvaluationResult) -> String {
    let text = output.trim();
    let mut summary: String = text.chars().take(SUMMARY_LIMIT).collect();
    if text.chars().count() > SUMMARY_LIMIT {
        summary.push_str("...");
    }
    if summary.is_empty() {
        evaluation.reason.clone()
    } else {
        summary
    }
}

#[async_trait]
impl Executor for LoopExecutor {
    fn step_type(&self) -> StepType {
        StepType::Loop
    }

    async fn execute(&self, ctx: &ExecutionContext, task: &mut Task, step: &StepDefinition) -> Result<StepResult> {
        ctx.check_cancelled()?;
        let started_at = Utc::now();

        let store = self
            .state_store
            .as_ref()
            .ok_or_else(|| StepError::MissingDependency("loop state store".to_string()))?;
        let config = LoopStepConfig::from_step(step, ctx.config.loops.max_iterations)?;
        config.validate(step, ctx)?;

        let mut state = store
            .load_loop_state(task, &step.name)?
            .unwrap_or_else(|| LoopState::new(task.id.clone(), step.name.clone(), config.max_iterations));
        if state.current_iteration > config.max_iterations {
            log::warn!(
                "Loop '{}' for task {} already ran {} iteration(s), above the configured max of {}",
                step.name,
                task.id,
                state.current_iteration,
                config.max_iterations
            );
        }
        state.max_iterations = config.max_iterations.max(state.current_iteration);
        let resumed_from = state.current_iteration;
        if resumed_from > 0 {
            log::info!(
                "Resuming loop '{}' for task {} after iteration {}",
                step.name,
                task.id,
                resumed_from
            );
        }

        let scratchpad = self.open_scratchpad(task, step, &config);
        let evaluator = ExitEvaluator::new(config.exit_conditions.clone());
        let mut last_reason: Option<String> = None;

        let mut exit_reason = match state.last_iteration() {
            Some(last) if last.exit_signal => Some(ExitReason::ExitSignal),
            _ => None,
        };

        while exit_reason.is_none() && !state.is_exhausted() {
            ctx.check_cancelled()?;
            let iteration = state.current_iteration + 1;
            log::debug!("Loop '{}' iteration {}/{}", step.name, iteration, state.max_iterations);

            let outcome = self.run_iteration(ctx, task, &config).await?;
            let evaluation = evaluator.evaluate(&outcome.output, task);
            log::debug!("Loop '{}' iteration {}: {}", step.name, iteration, evaluation.reason);

            let result = IterationResult {
                iteration,
                completed_at: Utc::now(),
                files_changed: outcome.files_changed,
                summary: summarize(&outcome.output, &evaluation),
                exit_signal: evaluation.should_exit,
                success: outcome.success,
                error: outcome.error,
            };
            let summary = IterationSummary {
                iteration,
                timestamp: result.completed_at,
                summary: result.summary.clone(),
                files_changed: result.files_changed.clone(),
                exit_signal: result.exit_signal,
                success: result.success,
                error: result.error.clone(),
            };
            state.record(result);

            store.save_loop_state(task, &state).map_err(|e| match e {
                StepError::Storage(_) => e,
                other => StepError::Storage(other.to_string()),
            })?;

            // nested loops start over on the next pass
            for inner in config.steps.iter().filter(|s| s.step_type == StepType::Loop) {
                store.clear_loop_state(&task.id, &inner.name)?;
            }

            if let Some(pad) = &scratchpad
                && let Err(e) = pad.append_iteration(summary)
            {
                log::warn!("Failed to append to scratchpad for loop '{}': {}", step.name, e);
            }

            if evaluation.should_exit {
                exit_reason = Some(ExitReason::ExitSignal);
            }
            last_reason = Some(evaluation.reason);
        }

        let exit_reason = exit_reason.unwrap_or(ExitReason::MaxIterations);
        let completed = state.current_iteration;
        log::info!(
            "Loop '{}' for task {} finished after {} iteration(s): {}",
            step.name,
            task.id,
            completed,
            exit_reason.as_str()
        );

        let mut files_changed: Vec<String> = Vec::new();
        for file in state.iterations.iter().flat_map(|it| it.files_changed.iter()) {
            if !files_changed.contains(file) {
                files_changed.push(file.clone());
            }
        }

        let output = match exit_reason {
            ExitReason::ExitSignal => format!("Loop exited after {} iteration(s)", completed),
            ExitReason::MaxIterations => format!("Loop reached max iterations ({})", state.max_iterations),
        };
        let mut result = StepResult::new(step, StepStatus::Success, started_at)
            .with_output(output)
            .with_files_changed(files_changed)
            .with_metadata("iterations_completed", completed)
            .with_metadata("exit_reason", exit_reason.as_str())
            .with_metadata("resumed_from", resumed_from)
            .with_metadata("max_iterations", state.max_iterations);
        if let Some(reason) = last_reason {
            result.insert_metadata("last_evaluation", reason);
        }
        if let Some(pad) = &scratchpad {
            result.insert_metadata("scratchpad", pad.path().display().to_string());
        }

        match serde_json::to_vec_pretty(&state) {
            Ok(data) => match ctx.save_artifact_versioned(&task.id, LOOP_ARTIFACT, &data) {
                Ok(Some(name)) => result = result.with_artifact(name),
                Ok(None) => {}
                Err(e) => result.insert_metadata("artifact_error", e),
            },
            Err(e) => result.insert_metadata("artifact_error", e.to_string()),
        }

        Ok(result)
    }
}
