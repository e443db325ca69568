//! GitHub CLI check provider.
//!
//! Shells out to `gh pr checks <n> --json ...`. `gh` exits 8 while checks are
//! still pending, which is a normal answer here, not a failure.

use std::process::Stdio;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::process::Command;

use super::monitor::CheckProvider;
use super::types::{CheckBucket, CheckResult};
use crate::error::{Result, StepError};

const CHECK_FIELDS: &str = "name,state,bucket,link,workflow,startedAt,completedAt";

/// Exit code `gh pr checks` uses when some checks are still pending
const GH_EXIT_PENDING: i32 = 8;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhCheck {
    name: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    bucket: Option<String>,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    workflow: Option<String>,
    #[serde(default)]
    started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    completed_at: Option<DateTime<Utc>>,
}

impl From<GhCheck> for CheckResult {
    fn from(raw: GhCheck) -> Self {
        let bucket = CheckBucket::normalize(raw.bucket.as_deref(), &raw.state);
        let duration = match (raw.started_at, raw.completed_at) {
            (Some(start), Some(end)) if end >= start => (end - start).to_std().ok(),
            _ => None,
        };
        CheckResult {
            name: raw.name,
            state: raw.state,
            bucket,
            workflow: raw.workflow.filter(|w| !w.is_empty()),
            url: raw.link.filter(|l| !l.is_empty()),
            duration,
        }
    }
}

/// Parse the JSON emitted by `gh pr checks --json`
pub fn parse_checks(json: &str) -> Result<Vec<CheckResult>> {
    let trimmed = json.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let raw: Vec<GhCheck> =
        serde_json::from_str(trimmed).map_err(|e| StepError::CiFetch(format!("invalid gh output: {}", e)))?;
    Ok(raw.into_iter().map(CheckResult::from).collect())
}

/// `CheckProvider` backed by the `gh` binary
pub struct GhCheckProvider {
    binary: String,
    repo: Option<String>,
    available: Mutex<Option<bool>>,
}

impl Default for GhCheckProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl GhCheckProvider {
    pub fn new() -> Self {
        Self {
            binary: "gh".to_string(),
            repo: None,
            available: Mutex::new(None),
        }
    }

    /// Use a different binary (a wrapper script, an absolute path)
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Target `owner/name` instead of the repository of the working directory
    pub fn with_repo(mut self, repo: impl Into<String>) -> Self {
        self.repo = Some(repo.into());
        self
    }

    /// Whether the binary can be run. Probed once and remembered.
    pub async fn is_available(&self) -> bool {
        if let Some(known) = *self.available.lock().unwrap_or_else(PoisonError::into_inner) {
            return known;
        }
        let ok = Command::new(&self.binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false);
        if !ok {
            log::warn!("{} is not available; CI status cannot be fetched", self.binary);
        }
        *self.available.lock().unwrap_or_else(PoisonError::into_inner) = Some(ok);
        ok
    }

    #[cfg(test)]
    pub(crate) fn reset_availability(&self) {
        *self.available.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[async_trait]
impl CheckProvider for GhCheckProvider {
    async fn fetch_checks(&self, target: u64) -> Result<Vec<CheckResult>> {
        if !self.is_available().await {
            return Err(StepError::CiFetch(format!("{} is not available", self.binary)));
        }

        let mut cmd = Command::new(&self.binary);
        cmd.arg("pr")
            .arg("checks")
            .arg(target.to_string())
            .arg("--json")
            .arg(CHECK_FIELDS);
        if let Some(repo) = &self.repo {
            cmd.arg("--repo").arg(repo);
        }
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);

        log::debug!("Fetching checks for #{} via {}", target, self.binary);
        let output = cmd
            .output()
            .await
            .map_err(|e| StepError::CiFetch(format!("failed to run {}: {}", self.binary, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        match output.status.code() {
            Some(0) | Some(GH_EXIT_PENDING) => parse_checks(&stdout),
            _ if stderr.contains("no checks reported") => Ok(Vec::new()),
            code => Err(StepError::CiFetch(format!(
                "{} pr checks exited with {:?}: {}",
                self.binary,
                code,
                stderr.trim()
            ))),
        }
    }
}
