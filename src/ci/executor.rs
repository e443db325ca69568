//! CI step executor: watches the task's pull request and maps the verdict to a step status.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::mpsc;

use super::config::CiWatchConfig;
use super::monitor::{CiWatcher, WatchSpec};
use super::types::{CiProgress, CiStatus, CiWatchResult};
use crate::domain::{StepDefinition, StepResult, StepStatus, StepType, Task};
use crate::duration::format_duration;
use crate::error::{Result, StepError};
use crate::executor::{ExecutionContext, Executor};
use crate::human::{Decision, HumanExecutor, approval_key};

/// Task metadata key holding the pull request number to watch
pub const PR_NUMBER_KEY: &str = "pr_number";

/// Base filename of the saved watch result
pub const CI_ARTIFACT: &str = "ci-result.json";

#[derive(Default)]
pub struct CiExecutor {
    watcher: Option<Arc<dyn CiWatcher>>,
    progress: Option<mpsc::UnboundedSender<CiProgress>>,
}

impl CiExecutor {
    pub fn new(watcher: Arc<dyn CiWatcher>) -> Self {
        Self {
            watcher: Some(watcher),
            progress: None,
        }
    }

    /// Forward progress events from every watch to `tx`
    pub fn with_progress(mut self, tx: mpsc::UnboundedSender<CiProgress>) -> Self {
        self.progress = Some(tx);
        self
    }

    fn pr_number(task: &Task) -> Result<u64> {
        if !task.metadata.contains_key(PR_NUMBER_KEY) {
            return Err(StepError::MissingMetadata(PR_NUMBER_KEY.to_string()));
        }
        task.metadata_u64(PR_NUMBER_KEY).ok_or_else(|| {
            StepError::InvalidConfig(format!(
                "{} is not a pull request number: {}",
                PR_NUMBER_KEY, task.metadata[PR_NUMBER_KEY]
            ))
        })
    }
}

impl CiExecutor {
    /// A step left awaiting approval by a timeout or fetch error is settled by
    /// the recorded human decision instead of another watch.
    fn resolve_deferral(task: &Task, step: &StepDefinition, started_at: DateTime<Utc>) -> Option<StepResult> {
        let previous = task.step_results.iter().rev().find(|r| r.step_name == step.name)?;
        if previous.status != StepStatus::AwaitingApproval {
            return None;
        }
        let ci_status = previous
            .metadata_value("ci_status")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        match HumanExecutor::decision(task, &step.name) {
            Decision::Approved => {
                log::info!("CI step '{}' approved after {}", step.name, ci_status);
                Some(
                    StepResult::new(step, StepStatus::Success, started_at)
                        .with_output(format!("Approved after CI {}", ci_status))
                        .with_metadata("ci_status", ci_status)
                        .with_metadata("approved", true),
                )
            }
            Decision::Rejected => {
                log::info!("CI step '{}' rejected after {}", step.name, ci_status);
                Some(
                    StepResult::new(step, StepStatus::Failed, started_at)
                        .with_output(format!("Rejected after CI {}", ci_status))
                        .with_error("rejected_by_human")
                        .with_metadata("ci_status", ci_status),
                )
            }
            Decision::Pending => None,
        }
    }
}

/// Map a watch verdict to (status, output, error)
fn classify(watch: &CiWatchResult, config: &CiWatchConfig) -> (StepStatus, String, Option<String>) {
    let elapsed = format_duration(watch.elapsed);
    match watch.status {
        CiStatus::Success => (
            StepStatus::Success,
            format!("All {} CI checks passed in {}", watch.checks.len(), elapsed),
            None,
        ),
        CiStatus::Failure => {
            let failed = watch.failed_checks().join(", ");
            (
                StepStatus::Failed,
                format!("{} CI check(s) failed: {}", watch.failed_checks().len(), failed),
                Some(format!("ci_failed: {}", failed)),
            )
        }
        CiStatus::Timeout => (
            StepStatus::AwaitingApproval,
            format!(
                "CI did not finish within {}; {} check(s) still pending",
                format_duration(config.timeout),
                watch.pending_checks().len()
            ),
            Some("ci_timeout".to_string()),
        ),
        CiStatus::FetchError => {
            let reason = watch.error.as_deref().unwrap_or("unknown error");
            (
                StepStatus::AwaitingApproval,
                format!("Could not fetch CI status after {}: {}", elapsed, reason),
                Some(format!("ci_fetch_error: {}", reason)),
            )
        }
        CiStatus::Pending => (
            StepStatus::Failed,
            "CI watch ended without a verdict".to_string(),
            Some(format!("unexpected CI status: {}", watch.status)),
        ),
    }
}

#[async_trait]
impl Executor for CiExecutor {
    fn step_type(&self) -> StepType {
        StepType::Ci
    }

    async fn execute(&self, ctx: &ExecutionContext, task: &mut Task, step: &StepDefinition) -> Result<StepResult> {
        ctx.check_cancelled()?;
        let started_at = Utc::now();

        let watcher = self
            .watcher
            .as_ref()
            .ok_or_else(|| StepError::MissingDependency("CI watcher".to_string()))?;
        let pr_number = Self::pr_number(task)?;
        let config = CiWatchConfig::resolve(step, &ctx.config.ci)?;

        if let Some(result) = Self::resolve_deferral(task, step, started_at) {
            return Ok(result);
        }

        let mut spec = WatchSpec::new(pr_number, config.clone());
        if let Some(tx) = &self.progress {
            spec = spec.with_progress(tx.clone());
        }

        let watch = watcher.watch(&spec, &ctx.cancel).await?;
        let (status, output, error) = classify(&watch, &config);
        log::info!("CI step '{}' for #{}: {} ({})", step.name, pr_number, watch.status, status);

        task.set_metadata("ci_status", watch.status.to_string());

        let mut result = StepResult::new(step, status, started_at)
            .with_output(output)
            .with_metadata("ci_status", watch.status.to_string())
            .with_metadata("pr_number", pr_number)
            .with_metadata("elapsed_ms", watch.elapsed.as_millis() as u64)
            .with_metadata("checks", serde_json::to_value(&watch.checks)?);
        if let Some(error) = error {
            result = result.with_error(error);
        }
        if status == StepStatus::AwaitingApproval {
            result.insert_metadata("approval_key", approval_key(&step.name));
        }

        match serde_json::to_vec_pretty(&json!({ "pr_number": pr_number, "result": watch })) {
            Ok(data) => match ctx.save_artifact_versioned(&task.id, CI_ARTIFACT, &data) {
                Ok(Some(name)) => result = result.with_artifact(name),
                Ok(None) => {}
                Err(e) => result.insert_metadata("artifact_error", e),
            },
            Err(e) => result.insert_metadata("artifact_error", e.to_string()),
        }

        Ok(result)
    }
}
