// Command executor
// Runs a shell command as a step; bound to `command` and `validation`

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::process::Command;

use crate::domain::{StepDefinition, StepResult, StepStatus, StepType, Task};
use crate::duration::{format_duration, parse_duration_value};
use crate::error::{Result, StepError};
use crate::executor::{ExecutionContext, Executor};

/// Configuration for one command step
#[derive(Debug, Clone, PartialEq)]
pub struct CommandConfig {
    /// The command to execute via `sh -c`
    pub command: String,
    /// Working directory (defaults to the current directory)
    pub cwd: Option<PathBuf>,
    /// Environment variables to set
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
    /// Exit code meaning "ran, nothing to do"
    pub no_changes_exit_code: Option<i32>,
}

impl CommandConfig {
    /// Create a new command config with the given command
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            cwd: None,
            env: Vec::new(),
            timeout,
            no_changes_exit_code: None,
        }
    }

    /// Add an environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Parse from step config, falling back to `default_timeout`
    pub fn from_step(step: &StepDefinition, default_timeout: Duration) -> Result<Self> {
        let command = step
            .config_str("command")
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| StepError::InvalidConfig(format!("step '{}' needs a command", step.name)))?;

        let mut config = Self::new(command, default_timeout);
        config.cwd = step.config_str("cwd").map(PathBuf::from);

        if let Some(value) = step.config.get("timeout").filter(|v| !v.is_null()) {
            config.timeout = parse_duration_value(value).map_err(|e| StepError::InvalidConfig(format!("timeout: {}", e)))?;
        }

        match step.config.get("env") {
            None | Some(Value::Null) => {}
            Some(v) => {
                let vars: HashMap<String, Value> = serde_json::from_value(v.clone())
                    .map_err(|e| StepError::InvalidConfig(format!("env: {}", e)))?;
                let mut vars: Vec<_> = vars.into_iter().collect();
                vars.sort_by(|a, b| a.0.cmp(&b.0));
                for (key, value) in vars {
                    let value = match value {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    config.env.push((key, value));
                }
            }
        }

        if let Some(v) = step.config.get("no_changes_exit_code").filter(|v| !v.is_null()) {
            let code = v
                .as_i64()
                .and_then(|n| i32::try_from(n).ok())
                .ok_or_else(|| StepError::InvalidConfig(format!("no_changes_exit_code: not an exit code: {}", v)))?;
            config.no_changes_exit_code = Some(code);
        }

        Ok(config)
    }
}

/// Executor that runs a shell command
pub struct CommandExecutor {
    step_type: StepType,
}

impl CommandExecutor {
    /// Create a command executor registered under `step_type`
    pub fn new(step_type: StepType) -> Self {
        Self { step_type }
    }

    /// Execute the command, returning its output, or `None` on timeout
    async fn run(&self, config: &CommandConfig, ctx: &ExecutionContext) -> Result<Option<std::process::Output>> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&config.command);
        if let Some(cwd) = &config.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &config.env {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn()?;

        tokio::select! {
            _ = ctx.cancel.cancelled() => Err(StepError::Cancelled),
            waited = tokio::time::timeout(config.timeout, child.wait_with_output()) => match waited {
                Ok(output) => Ok(Some(output?)),
                Err(_) => Ok(None),
            },
        }
    }
}

/// Keep at most `limit` bytes, cut on a character boundary
fn truncate_output(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n... (truncated, {} bytes total)", &text[..end], text.len())
}

#[async_trait]
impl Executor for CommandExecutor {
    fn step_type(&self) -> StepType {
        self.step_type
    }

    async fn execute(&self, ctx: &ExecutionContext, _task: &mut Task, step: &StepDefinition) -> Result<StepResult> {
        ctx.check_cancelled()?;
        let started_at = Utc::now();
        let config = CommandConfig::from_step(step, ctx.config.command.timeout)?;
        let limit = ctx.config.command.max_output_bytes;

        log::debug!("Running command for step '{}': {}", step.name, config.command);
        let Some(output) = self.run(&config, ctx).await? else {
            log::warn!("Command for step '{}' timed out after {:?}", step.name, config.timeout);
            return Ok(StepResult::new(step, StepStatus::Failed, started_at)
                .with_output(format!("Command timed out after {}", format_duration(config.timeout)))
                .with_error("command_timeout"));
        };

        let stdout = truncate_output(&String::from_utf8_lossy(&output.stdout), limit);
        let stderr = truncate_output(String::from_utf8_lossy(&output.stderr).trim(), limit);
        let code = output.status.code();

        let mut result = if output.status.success() {
            StepResult::new(step, StepStatus::Success, started_at).with_output(stdout)
        } else if code.is_some() && code == config.no_changes_exit_code {
            StepResult::new(step, StepStatus::NoChanges, started_at).with_output(stdout)
        } else {
            let mut text = stdout;
            if !stderr.is_empty() {
                if !text.is_empty() && !text.ends_with('\n') {
                    text.push('\n');
                }
                text.push_str(&format!("stderr: {}", stderr));
            }
            StepResult::new(step, StepStatus::Failed, started_at)
                .with_output(text)
                .with_error(format!("Command '{}' failed with exit code: {:?}", step.name, code))
        };
        if let Some(code) = code {
            result.insert_metadata("exit_code", code);
        }
        Ok(result)
    }
}
