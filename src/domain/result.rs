//! Step result and status types.
//!
//! Every executor produces exactly one StepResult per attempt. The status is a
//! closed set of tags rather than a state machine.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::task::{StepDefinition, StepType};

/// Terminal status of one step attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failed,
    /// Outcome deferred to a human
    AwaitingApproval,
    /// Step ran but had nothing to do
    NoChanges,
    Skipped,
    /// Dry-run placeholder
    WouldExecute,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Success => "success",
            StepStatus::Failed => "failed",
            StepStatus::AwaitingApproval => "awaiting_approval",
            StepStatus::NoChanges => "no_changes",
            StepStatus::Skipped => "skipped",
            StepStatus::WouldExecute => "would_execute",
        }
    }

    /// Returns true if the driver may move on to the next step
    pub fn allows_continue(&self) -> bool {
        matches!(
            self,
            StepStatus::Success | StepStatus::NoChanges | StepStatus::Skipped | StepStatus::WouldExecute
        )
    }

    /// Returns true if this status counts as a successful business outcome
    pub fn is_success(&self) -> bool {
        matches!(self, StepStatus::Success | StepStatus::NoChanges)
    }

    /// Returns true if the workflow cannot proceed past this status without intervention
    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, StepStatus::Failed)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one step execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_name: String,
    pub step_type: StepType,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,

    /// Short human-readable narrative
    #[serde(default)]
    pub output: String,

    /// Machine-oriented error, separate from the narrative
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,

    #[serde(default)]
    pub files_changed: Vec<String>,
}

impl StepResult {
    /// Create a result completing now.
    pub fn new(step: &StepDefinition, status: StepStatus, started_at: DateTime<Utc>) -> Self {
        Self::completed_at(step, status, started_at, Utc::now())
    }

    /// Create a result with an explicit completion time. A completion time
    /// earlier than the start is clamped to the start.
    pub fn completed_at(
        step: &StepDefinition,
        status: StepStatus,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        let completed_at = completed_at.max(started_at);
        let duration_ms = (completed_at - started_at).num_milliseconds().max(0) as u64;
        Self {
            step_name: step.name.clone(),
            step_type: step.step_type,
            status,
            started_at,
            completed_at,
            duration_ms,
            output: String::new(),
            error: None,
            artifact_path: None,
            metadata: None,
            files_changed: Vec::new(),
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_artifact(mut self, path: impl Into<String>) -> Self {
        self.artifact_path = Some(path.into());
        self
    }

    pub fn with_files_changed(mut self, files: Vec<String>) -> Self {
        self.files_changed = files;
        self
    }

    /// Add one metadata entry, creating the map on first use
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.insert_metadata(key, value);
        self
    }

    pub fn insert_metadata(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
    }

    pub fn metadata_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.metadata.as_ref().and_then(|m| m.get(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    fn step() -> StepDefinition {
        StepDefinition::new("validate", StepType::Validation)
    }

    #[test]
    fn test_status_serializes_as_tag() {
        assert_eq!(serde_json::to_string(&StepStatus::AwaitingApproval).unwrap(), "\"awaiting_approval\"");
        assert_eq!(serde_json::to_string(&StepStatus::WouldExecute).unwrap(), "\"would_execute\"");
        let s: StepStatus = serde_json::from_str("\"no_changes\"").unwrap();
        assert_eq!(s, StepStatus::NoChanges);
    }

    #[test]
    fn test_status_display_matches_serde() {
        for status in [
            StepStatus::Success,
            StepStatus::Failed,
            StepStatus::AwaitingApproval,
            StepStatus::NoChanges,
            StepStatus::Skipped,
            StepStatus::WouldExecute,
        ] {
            let serialized = serde_json::to_string(&status).unwrap();
            assert_eq!(serialized, format!("\"{}\"", status));
        }
    }

    #[test]
    fn test_allows_continue() {
        assert!(StepStatus::Success.allows_continue());
        assert!(StepStatus::NoChanges.allows_continue());
        assert!(StepStatus::Skipped.allows_continue());
        assert!(!StepStatus::Failed.allows_continue());
        assert!(!StepStatus::AwaitingApproval.allows_continue());
        assert!(StepStatus::Failed.is_terminal_failure());
        assert!(!StepStatus::AwaitingApproval.is_terminal_failure());
    }

    #[test]
    fn test_duration_is_difference() {
        let start = Utc::now();
        let end = start + ChronoDuration::milliseconds(1250);
        let result = StepResult::completed_at(&step(), StepStatus::Success, start, end);
        assert_eq!(result.duration_ms, 1250);
        assert!(result.completed_at >= result.started_at);
    }

    #[test]
    fn test_completion_before_start_is_clamped() {
        let start = Utc::now();
        let end = start - ChronoDuration::seconds(5);
        let result = StepResult::completed_at(&step(), StepStatus::Success, start, end);
        assert_eq!(result.completed_at, start);
        assert_eq!(result.duration_ms, 0);
    }

    #[test]
    fn test_builder_and_metadata() {
        let result = StepResult::new(&step(), StepStatus::Failed, Utc::now())
            .with_output("2 checks failed")
            .with_error("ci_failed")
            .with_metadata("failed_checks", json!(["lint", "test"]))
            .with_files_changed(vec!["src/lib.rs".into()]);

        assert_eq!(result.step_name, "validate");
        assert_eq!(result.step_type, StepType::Validation);
        assert_eq!(result.error.as_deref(), Some("ci_failed"));
        assert_eq!(result.metadata_value("failed_checks"), Some(&json!(["lint", "test"])));
        assert_eq!(result.files_changed.len(), 1);
    }

    #[test]
    fn test_serialization_skips_empty_optionals() {
        let result = StepResult::new(&step(), StepStatus::Success, Utc::now());
        let value = serde_json::to_value(&result).unwrap();
        assert!(value.get("error").is_none());
        assert!(value.get("metadata").is_none());
        assert_eq!(value["status"], "success");
    }
}
