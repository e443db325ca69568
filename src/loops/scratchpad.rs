//! Scratchpad: an append-only, human-readable log of loop progress.
//!
//! Lives beside the state store, not inside it, so operators can follow a loop
//! even when structured state is unavailable. A missing file reads as empty;
//! a corrupt file is an error.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::{file_component, key_component, write_atomic};
use crate::error::{Result, StepError};

/// One line of loop history as shown to operators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationSummary {
    pub iteration: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub files_changed: Vec<String>,
    #[serde(default)]
    pub exit_signal: bool,
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScratchpadData {
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub loop_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub iterations: Vec<IterationSummary>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ScratchpadData {
    pub fn is_empty(&self) -> bool {
        self.task_id.is_empty() && self.loop_name.is_empty() && self.iterations.is_empty()
    }

    /// Plain-text rendering for terminals
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# {} / {}", self.task_id, self.loop_name);
        if let Some(started) = self.started_at {
            let _ = writeln!(out, "started: {}", started.to_rfc3339());
        }
        for it in &self.iterations {
            let mark = match (it.success, it.exit_signal) {
                (true, true) => "exit",
                (true, false) => "ok",
                (false, _) => "FAIL",
            };
            let _ = writeln!(out, "\n## iteration {} [{}] {}", it.iteration, mark, it.timestamp.to_rfc3339());
            if !it.summary.is_empty() {
                let _ = writeln!(out, "{}", it.summary);
            }
            if let Some(err) = &it.error {
                let _ = writeln!(out, "error: {}", err);
            }
            for file in &it.files_changed {
                let _ = writeln!(out, "  - {}", file);
            }
        }
        out
    }
}

/// Scratchpad file handle
#[derive(Debug)]
pub struct Scratchpad {
    path: PathBuf,
    lock: Mutex<()>,
}

impl Scratchpad {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    /// Conventional location: `<dir>/<task key>/<file_name or loop key.scratchpad.json>`
    pub fn for_loop(dir: impl AsRef<Path>, task_id: &str, loop_name: &str, file_name: Option<&str>) -> Self {
        let file = match file_name {
            Some(name) => file_component(name),
            None => format!("{}.scratchpad.json", key_component(loop_name)),
        };
        Self::new(dir.as_ref().join(key_component(task_id)).join(file))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> Result<ScratchpadData> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.read_unlocked()
    }

    pub fn write(&self, data: &ScratchpadData) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.write_unlocked(data)
    }

    /// Start a scratchpad for a loop. An existing scratchpad for the same loop is
    /// kept as is so a resumed loop continues its log.
    pub fn initialize(&self, task_id: &str, loop_name: &str) -> Result<ScratchpadData> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let existing = self.read_unlocked()?;
        if existing.task_id == task_id && existing.loop_name == loop_name {
            return Ok(existing);
        }
        let data = ScratchpadData {
            task_id: task_id.to_string(),
            loop_name: loop_name.to_string(),
            started_at: Some(Utc::now()),
            ..Default::default()
        };
        self.write_unlocked(&data)?;
        Ok(data)
    }

    pub fn append_iteration(&self, summary: IterationSummary) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut data = self.read_unlocked()?;
        data.iterations.push(summary);
        self.write_unlocked(&data)
    }

    fn read_unlocked(&self) -> Result<ScratchpadData> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ScratchpadData::default()),
            Err(e) => return Err(StepError::Scratchpad(format!("{}: {}", self.path.display(), e))),
        };
        if raw.trim().is_empty() {
            return Err(StepError::Scratchpad(format!("empty scratchpad {}", self.path.display())));
        }
        serde_json::from_str(&raw)
            .map_err(|e| StepError::Scratchpad(format!("corrupt scratchpad {}: {}", self.path.display(), e)))
    }

    fn write_unlocked(&self, data: &ScratchpadData) -> Result<()> {
        let json = serde_json::to_vec_pretty(data)?;
        write_atomic(&self.path, &json).map_err(|e| StepError::Scratchpad(format!("{}: {}", self.path.display(), e)))
    }
}
