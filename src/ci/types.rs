//! CI check and watch result types.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::{serde_duration, serde_opt_duration};

/// Normalized classification of one check's raw state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckBucket {
    Pending,
    Pass,
    Fail,
    Cancel,
    Skip,
}

/// Which side of the terminal decision a bucket falls on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketClass {
    Pending,
    Completed,
    Failed,
}

impl CheckBucket {
    /// Parse an explicit bucket name as reported by the provider.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(CheckBucket::Pending),
            "pass" => Some(CheckBucket::Pass),
            "fail" => Some(CheckBucket::Fail),
            "cancel" => Some(CheckBucket::Cancel),
            "skipping" | "skip" => Some(CheckBucket::Skip),
            _ => None,
        }
    }

    /// Derive a bucket from a raw check state. Unrecognized states are pending.
    pub fn from_state(state: &str) -> Self {
        match state.trim().to_ascii_uppercase().as_str() {
            "SUCCESS" | "NEUTRAL" | "PASS" | "PASSED" => CheckBucket::Pass,
            "FAILURE" | "ERROR" | "TIMED_OUT" | "ACTION_REQUIRED" | "STARTUP_FAILURE" | "FAIL" | "FAILED" => {
                CheckBucket::Fail
            }
            "CANCELLED" | "CANCELED" | "CANCEL" => CheckBucket::Cancel,
            "SKIPPED" | "SKIPPING" | "SKIP" => CheckBucket::Skip,
            _ => CheckBucket::Pending,
        }
    }

    /// Prefer an explicit bucket, fall back to the state.
    pub fn normalize(bucket: Option<&str>, state: &str) -> Self {
        bucket
            .and_then(CheckBucket::parse)
            .unwrap_or_else(|| CheckBucket::from_state(state))
    }

    pub fn class(&self) -> BucketClass {
        match self {
            CheckBucket::Pending => BucketClass::Pending,
            CheckBucket::Pass | CheckBucket::Skip => BucketClass::Completed,
            CheckBucket::Fail | CheckBucket::Cancel => BucketClass::Failed,
        }
    }
}

/// One external CI check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    /// Raw state string as reported by the provider
    pub state: String,
    pub bucket: CheckBucket,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, with = "serde_opt_duration", skip_serializing_if = "Option::is_none")]
    pub duration: Option<Duration>,
}

impl CheckResult {
    /// Build a check whose bucket is derived from its raw state
    pub fn new(name: impl Into<String>, state: impl Into<String>) -> Self {
        let state = state.into();
        let bucket = CheckBucket::from_state(&state);
        Self {
            name: name.into(),
            state,
            bucket,
            workflow: None,
            url: None,
            duration: None,
        }
    }

    pub fn with_workflow(mut self, workflow: impl Into<String>) -> Self {
        self.workflow = Some(workflow.into());
        self
    }

    /// True if this check matches an allow-list entry by check name or workflow name
    pub fn matches(&self, entry: &str) -> bool {
        self.name.eq_ignore_ascii_case(entry)
            || self
                .workflow
                .as_deref()
                .is_some_and(|w| w.eq_ignore_ascii_case(entry))
    }
}

/// Counts of checks per class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckSummary {
    pub pending: usize,
    pub completed: usize,
    pub failed: usize,
}

impl CheckSummary {
    pub fn from_checks(checks: &[CheckResult]) -> Self {
        let mut summary = Self::default();
        for check in checks {
            match check.bucket.class() {
                BucketClass::Pending => summary.pending += 1,
                BucketClass::Completed => summary.completed += 1,
                BucketClass::Failed => summary.failed += 1,
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.pending + self.completed + self.failed
    }
}

/// Verdict of a CI watch. `Pending` is intermediate only and never a valid final status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CiStatus {
    Pending,
    Success,
    Failure,
    Timeout,
    FetchError,
}

impl fmt::Display for CiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CiStatus::Pending => "pending",
            CiStatus::Success => "success",
            CiStatus::Failure => "failure",
            CiStatus::Timeout => "timeout",
            CiStatus::FetchError => "fetch_error",
        };
        f.write_str(s)
    }
}

/// Final answer of a CI watch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CiWatchResult {
    pub status: CiStatus,
    pub checks: Vec<CheckResult>,
    #[serde(with = "serde_duration")]
    pub elapsed: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CiWatchResult {
    /// Names of checks in the failed class
    pub fn failed_checks(&self) -> Vec<&str> {
        self.checks
            .iter()
            .filter(|c| c.bucket.class() == BucketClass::Failed)
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Names of checks still pending
    pub fn pending_checks(&self) -> Vec<&str> {
        self.checks
            .iter()
            .filter(|c| c.bucket.class() == BucketClass::Pending)
            .map(|c| c.name.as_str())
            .collect()
    }
}

/// Phase of the watch a progress event was emitted from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchPhase {
    Grace,
    Polling,
}

/// Progress event emitted on every poll
#[derive(Debug, Clone)]
pub struct CiProgress {
    pub target: u64,
    pub phase: WatchPhase,
    pub elapsed: Duration,
    /// Latest fetched checks; the last known ones when this poll failed
    pub checks: Vec<CheckResult>,
    /// Why this poll's fetch failed
    pub error: Option<String>,
}
