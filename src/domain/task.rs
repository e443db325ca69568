//! Task, step definitions and step types.
//!
//! A Task is one unit of orchestrated work. It carries the ordered history of
//! step results and an open metadata bag that steps use to hand values to each
//! other (a PR number created by a git step and consumed by the CI step, say).

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::result::StepResult;

/// Open configuration map attached to a step definition.
pub type StepConfig = HashMap<String, serde_json::Value>;

/// The closed set of step types an executor can be registered for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Ai,
    Validation,
    Git,
    Human,
    Sdd,
    Ci,
    Verify,
    Loop,
    Command,
}

impl StepType {
    /// Every step type, in declaration order.
    pub const ALL: [StepType; 9] = [
        StepType::Ai,
        StepType::Validation,
        StepType::Git,
        StepType::Human,
        StepType::Sdd,
        StepType::Ci,
        StepType::Verify,
        StepType::Loop,
        StepType::Command,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Ai => "ai",
            StepType::Validation => "validation",
            StepType::Git => "git",
            StepType::Human => "human",
            StepType::Sdd => "sdd",
            StepType::Ci => "ci",
            StepType::Verify => "verify",
            StepType::Loop => "loop",
            StepType::Command => "command",
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        StepType::ALL
            .into_iter()
            .find(|t| t.as_str() == needle)
            .ok_or_else(|| format!("unknown step type: {}", s))
    }
}

/// Static description of one step in a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Name, unique within a workflow
    pub name: String,

    /// Declared type, used for executor dispatch
    #[serde(rename = "type")]
    pub step_type: StepType,

    /// Executor-specific configuration, normalized by the executor on entry
    #[serde(default)]
    pub config: StepConfig,

    /// Optional step-level timeout
    #[serde(
        default,
        with = "crate::duration::serde_opt_duration",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,
}

impl StepDefinition {
    pub fn new(name: impl Into<String>, step_type: StepType) -> Self {
        Self {
            name: name.into(),
            step_type,
            config: StepConfig::new(),
            timeout: None,
        }
    }

    /// Add a config entry
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// Set the step-level timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Read a string config value
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(|v| v.as_str())
    }
}

/// One unit of orchestrated work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,

    /// Index of the next step to run
    #[serde(default)]
    pub current_step: usize,

    /// Ordered history of step results, including inner loop steps
    #[serde(default)]
    pub step_results: Vec<StepResult>,

    /// Values passed between steps
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            description: description.into(),
            current_step: 0,
            step_results: Vec::new(),
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Generate a task ID of the form `task-20260101-120000-123`.
    pub fn generate_id() -> String {
        Utc::now().format("task-%Y%m%d-%H%M%S-%3f").to_string()
    }

    /// Append a result to the history.
    pub fn record_result(&mut self, result: StepResult) {
        self.step_results.push(result);
        self.updated_at = Utc::now();
    }

    /// Most recent result, if any
    pub fn last_result(&self) -> Option<&StepResult> {
        self.step_results.last()
    }

    /// Most recent result produced by a step of the given type
    pub fn last_result_of_type(&self, step_type: StepType) -> Option<&StepResult> {
        self.step_results.iter().rev().find(|r| r.step_type == step_type)
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.metadata.insert(key.into(), value.into());
        self.updated_at = Utc::now();
    }

    /// Read an integer metadata value, accepting numeric strings.
    pub fn metadata_u64(&self, key: &str) -> Option<u64> {
        match self.metadata.get(key)? {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}
