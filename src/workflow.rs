//! Workflow files: an ordered list of step definitions in YAML.
//!
//! ```yaml
//! name: feature
//! metadata:
//!   pr_number: 42
//! steps:
//!   - name: refine
//!     type: loop
//!     config:
//!       max_iterations: 5
//!       steps:
//!         - { name: test, type: validation, config: { command: "cargo test" } }
//!   - name: ci
//!     type: ci
//!     timeout: 45m
//! ```

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{StepDefinition, Task};
use crate::error::{Result, StepError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Seed values for task metadata
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub steps: Vec<StepDefinition>,
}

impl Workflow {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let workflow: Workflow = serde_yaml::from_str(content)?;
        workflow.validate()?;
        Ok(workflow)
    }

    fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(StepError::InvalidConfig(format!("workflow '{}' has no steps", self.name)));
        }
        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.name.as_str()) {
                return Err(StepError::InvalidConfig(format!("duplicate step name: {}", step.name)));
            }
        }
        Ok(())
    }

    /// Create a task for this workflow with the seed metadata applied
    pub fn new_task(&self, id: impl Into<String>) -> Task {
        let description = self.description.clone().unwrap_or_else(|| self.name.clone());
        let mut task = Task::new(id, description);
        for (key, value) in &self.metadata {
            task.set_metadata(key.clone(), value.clone());
        }
        task
    }
}

/// Parse a `key=value` override; the value is read as a YAML scalar so
/// `pr_number=42` yields a number and `draft=true` a bool.
pub fn parse_set(raw: &str) -> Result<(String, Value)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| StepError::InvalidConfig(format!("expected key=value, got: {}", raw)))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(StepError::InvalidConfig(format!("empty key in: {}", raw)));
    }
    let value = match serde_yaml::from_str::<Value>(value) {
        Ok(Value::Null) if !value.trim().is_empty() && value.trim() != "null" && value.trim() != "~" => {
            Value::String(value.to_string())
        }
        Ok(v @ (Value::Bool(_) | Value::Number(_) | Value::String(_) | Value::Null)) => v,
        _ => Value::String(value.to_string()),
    };
    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StepType;
    use std::time::Duration;

    const SAMPLE: &str = r#"
name: feature
description: Ship the feature
metadata:
  pr_number: 42
steps:
  - name: refine
    type: loop
    config:
      max_iterations: 5
      exit_conditions: ["validation passed"]
      steps:
        - { name: test, type: validation, config: { command: "cargo test" } }
  - name: ci
    type: ci
    timeout: 45m
    config:
      poll_interval: 1m
      workflows: [build, test]
  - name: review
    type: human
"#;

    #[test]
    fn test_parse_sample() {
        let workflow = Workflow::from_yaml(SAMPLE).unwrap();
        assert_eq!(workflow.steps.len(), 3);
        assert_eq!(workflow.steps[0].step_type, StepType::Loop);
        assert_eq!(workflow.steps[0].config["max_iterations"], 5);
        assert_eq!(workflow.steps[1].timeout, Some(Duration::from_secs(45 * 60)));
        assert_eq!(workflow.steps[1].config["poll_interval"], "1m");
        assert_eq!(workflow.steps[2].step_type, StepType::Human);

        let task = workflow.new_task("task-1");
        assert_eq!(task.description, "Ship the feature");
        assert_eq!(task.metadata_u64("pr_number"), Some(42));
    }

    #[test]
    fn test_rejects_bad_workflows() {
        assert!(Workflow::from_yaml("name: x\nsteps: []\n").is_err());
        let dup = "name: x\nsteps:\n  - {name: a, type: ai}\n  - {name: a, type: git}\n";
        assert!(Workflow::from_yaml(dup).unwrap_err().to_string().contains("duplicate"));
        let unknown = "name: x\nsteps:\n  - {name: a, type: teleport}\n";
        assert!(matches!(Workflow::from_yaml(unknown), Err(StepError::Yaml(_))));
    }

    #[test]
    fn test_parse_set() {
        assert_eq!(parse_set("pr_number=42").unwrap(), ("pr_number".into(), Value::from(42)));
        assert_eq!(parse_set("draft=true").unwrap(), ("draft".into(), Value::Bool(true)));
        assert_eq!(parse_set("title=fix: a=b").unwrap(), ("title".into(), Value::from("fix: a=b")));
        assert_eq!(parse_set("branch=feature/x").unwrap(), ("branch".into(), Value::from("feature/x")));
        assert!(parse_set("novalue").is_err());
        assert!(parse_set("=1").is_err());
    }
}
