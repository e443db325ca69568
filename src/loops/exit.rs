//! Exit evaluation for loop steps.
//!
//! A loop stops only when both gates pass: the iteration output carries an
//! explicit `{"exit": true}` signal, and every configured exit condition holds.

use std::sync::LazyLock;

use regex::Regex;

use crate::domain::{StepStatus, StepType, Task};

static EXIT_SIGNAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\{[^{}]*"exit"\s*:\s*true[^{}]*\}"#).expect("exit signal pattern is valid")
});

/// Conditions answered from task history instead of output text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuiltinCondition {
    /// The most recent validation step succeeded
    ValidationPassed,
    /// The most recent step changed nothing
    NoChanges,
}

impl BuiltinCondition {
    fn parse(phrase: &str) -> Option<Self> {
        let normalized: String = phrase
            .trim()
            .chars()
            .map(|c| match c {
                ' ' | '-' => '_',
                c => c.to_ascii_lowercase(),
            })
            .collect();
        match normalized.as_str() {
            "validation_passed" => Some(BuiltinCondition::ValidationPassed),
            "no_changes" => Some(BuiltinCondition::NoChanges),
            _ => None,
        }
    }

    fn holds(&self, task: &Task) -> bool {
        match self {
            BuiltinCondition::ValidationPassed => task
                .last_result_of_type(StepType::Validation)
                .is_some_and(|r| r.status.is_success()),
            BuiltinCondition::NoChanges => task
                .last_result()
                .is_some_and(|r| r.status == StepStatus::NoChanges || r.files_changed.is_empty()),
        }
    }
}

/// Outcome of one exit evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationResult {
    pub should_exit: bool,
    pub reason: String,
    pub signal_found: bool,
    pub conditions_met: Vec<String>,
    pub conditions_missing: Vec<String>,
}

/// Returns true if `output` contains an `{"exit": true}` fragment
pub fn has_exit_signal(output: &str) -> bool {
    EXIT_SIGNAL.is_match(output)
}

#[derive(Debug, Clone, Default)]
pub struct ExitEvaluator {
    conditions: Vec<String>,
}

impl ExitEvaluator {
    pub fn new(conditions: Vec<String>) -> Self {
        Self { conditions }
    }

    pub fn conditions(&self) -> &[String] {
        &self.conditions
    }

    /// Evaluate both gates against the iteration output and the task history.
    pub fn evaluate(&self, output: &str, task: &Task) -> EvaluationResult {
        let signal_found = has_exit_signal(output);
        let output_lower = output.to_lowercase();

        let (conditions_met, conditions_missing): (Vec<String>, Vec<String>) =
            self.conditions.iter().cloned().partition(|phrase| {
                match BuiltinCondition::parse(phrase) {
                    Some(builtin) => builtin.holds(task),
                    None => output_lower.contains(&phrase.to_lowercase()),
                }
            });

        let should_exit = signal_found && conditions_missing.is_empty();
        let reason = match (signal_found, conditions_missing.is_empty()) {
            (true, true) if self.conditions.is_empty() => "exit signal found".to_string(),
            (true, true) => "exit signal found and all conditions met".to_string(),
            (false, true) => "no exit signal".to_string(),
            (true, false) => format!("missing conditions: {}", conditions_missing.join(", ")),
            (false, false) => format!(
                "no exit signal; missing conditions: {}",
                conditions_missing.join(", ")
            ),
        };

        EvaluationResult {
            should_exit,
            reason,
            signal_found,
            conditions_met,
            conditions_missing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{StepDefinition, StepResult};
    use chrono::Utc;

    fn empty_task() -> Task {
        Task::new("t", "d")
    }

    #[test]
    fn test_signal_detection() {
        assert!(has_exit_signal(r#"{"exit": true}"#));
        assert!(has_exit_signal(r#"done! {"exit":true}"#));
        assert!(has_exit_signal("log line\n{ \"exit\" :\n true, \"why\": \"tests pass\" }\nmore"));
        assert!(has_exit_signal(r#"{"reason": "done", "exit": true}"#));

        assert!(!has_exit_signal(r#"{"exit": false}"#));
        assert!(!has_exit_signal("exit"));
        assert!(!has_exit_signal("please exit: true"));
        assert!(!has_exit_signal(""));
    }

    #[test]
    fn test_signal_without_conditions_exits() {
        let eval = ExitEvaluator::default().evaluate(r#"{"exit": true}"#, &empty_task());
        assert!(eval.should_exit);
        assert!(eval.signal_found);
        assert_eq!(eval.reason, "exit signal found");
    }

    #[test]
    fn test_signal_with_missing_condition_does_not_exit() {
        let evaluator = ExitEvaluator::new(vec!["all tests pass".into()]);
        let eval = evaluator.evaluate(r#"{"exit": true}"#, &empty_task());
        assert!(!eval.should_exit);
        assert_eq!(eval.conditions_missing, vec!["all tests pass"]);
        assert!(eval.reason.contains("all tests pass"));
    }

    #[test]
    fn test_conditions_without_signal_do_not_exit() {
        let evaluator = ExitEvaluator::new(vec!["all tests pass".into()]);
        let eval = evaluator.evaluate("All Tests PASS", &empty_task());
        assert!(!eval.should_exit);
        assert!(!eval.signal_found);
        assert_eq!(eval.conditions_met, vec!["all tests pass"]);
        assert_eq!(eval.reason, "no exit signal");
    }

    #[test]
    fn test_both_gates_pass() {
        let evaluator = ExitEvaluator::new(vec!["build ok".into(), "lint clean".into()]);
        let eval = evaluator.evaluate("BUILD OK\nLint Clean\n{\"exit\": true}", &empty_task());
        assert!(eval.should_exit);
        assert_eq!(eval.conditions_met.len(), 2);
        assert!(eval.conditions_missing.is_empty());
    }

    #[test]
    fn test_both_gates_fail_names_both() {
        let evaluator = ExitEvaluator::new(vec!["deployed".into()]);
        let eval = evaluator.evaluate("nothing yet", &empty_task());
        assert!(!eval.should_exit);
        assert_eq!(eval.reason, "no exit signal; missing conditions: deployed");
    }

    #[test]
    fn test_builtin_validation_passed() {
        let evaluator = ExitEvaluator::new(vec!["Validation Passed".into()]);
        let mut task = empty_task();
        let validate = StepDefinition::new("check", StepType::Validation);

        let eval = evaluator.evaluate(r#"{"exit": true}"#, &task);
        assert!(!eval.should_exit);

        task.record_result(StepResult::new(&validate, StepStatus::Failed, Utc::now()));
        assert!(!evaluator.evaluate(r#"{"exit": true}"#, &task).should_exit);

        task.record_result(StepResult::new(&validate, StepStatus::Success, Utc::now()));
        let eval = evaluator.evaluate(r#"{"exit": true}"#, &task);
        assert!(eval.should_exit);
        assert_eq!(eval.conditions_met, vec!["Validation Passed"]);
    }

    #[test]
    fn test_builtin_no_changes() {
        let evaluator = ExitEvaluator::new(vec!["no-changes".into()]);
        let mut task = empty_task();
        let gen_step = StepDefinition::new("gen", StepType::Ai);

        task.record_result(
            StepResult::new(&gen_step, StepStatus::Success, Utc::now()).with_files_changed(vec!["a.rs".into()]),
        );
        assert!(!evaluator.evaluate(r#"{"exit": true}"#, &task).should_exit);

        task.record_result(StepResult::new(&gen_step, StepStatus::Success, Utc::now()));
        assert!(evaluator.evaluate(r#"{"exit": true}"#, &task).should_exit);
    }
}
