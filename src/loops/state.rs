//! Loop checkpoint state and its stores.
//!
//! A `LoopState` is saved after every iteration so an interrupted loop resumes
//! from its last completed iteration. State is keyed by `(task id, step name)`.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::Task;
use crate::error::{Result, StepError};

/// Outcome of one loop iteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationResult {
    /// Iteration number (1-indexed)
    pub iteration: u32,
    pub completed_at: DateTime<Utc>,
    #[serde(default)]
    pub files_changed: Vec<String>,
    #[serde(default)]
    pub summary: String,
    /// Whether the exit evaluator allowed the loop to stop
    #[serde(default)]
    pub exit_signal: bool,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Durable progress record for one loop step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopState {
    pub task_id: String,
    pub step_name: String,
    /// Number of completed iterations
    pub current_iteration: u32,
    pub max_iterations: u32,
    #[serde(default)]
    pub iterations: Vec<IterationResult>,
    pub updated_at: DateTime<Utc>,
}

impl LoopState {
    pub fn new(task_id: impl Into<String>, step_name: impl Into<String>, max_iterations: u32) -> Self {
        Self {
            task_id: task_id.into(),
            step_name: step_name.into(),
            current_iteration: 0,
            max_iterations,
            iterations: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Record a finished iteration and advance the counter.
    pub fn record(&mut self, result: IterationResult) {
        self.current_iteration = result.iteration;
        self.iterations.push(result);
        self.updated_at = Utc::now();
    }

    pub fn is_exhausted(&self) -> bool {
        self.current_iteration >= self.max_iterations
    }

    pub fn last_iteration(&self) -> Option<&IterationResult> {
        self.iterations.last()
    }
}

/// Persistence for loop checkpoints.
///
/// Implementations must allow concurrent use under different keys without
/// lost writes; `load_loop_state` returns `Ok(None)` for a key never saved.
pub trait LoopStateStore: Send + Sync {
    fn save_loop_state(&self, task: &Task, state: &LoopState) -> Result<()>;

    fn load_loop_state(&self, task: &Task, step_name: &str) -> Result<Option<LoopState>>;

    /// Remove saved state; removing a missing key is not an error.
    fn clear_loop_state(&self, task_id: &str, step_name: &str) -> Result<()>;

    /// Total successful saves since creation
    fn write_count(&self) -> u64;
}

/// In-memory store. Values are cloned in and out, so callers never share state.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    states: RwLock<HashMap<(String, String), LoopState>>,
    writes: AtomicU64,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.states.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LoopStateStore for MemoryStateStore {
    fn save_loop_state(&self, task: &Task, state: &LoopState) -> Result<()> {
        let mut states = self.states.write().map_err(|e| StepError::Storage(e.to_string()))?;
        states.insert((task.id.clone(), state.step_name.clone()), state.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn load_loop_state(&self, task: &Task, step_name: &str) -> Result<Option<LoopState>> {
        let states = self.states.read().map_err(|e| StepError::Storage(e.to_string()))?;
        Ok(states.get(&(task.id.clone(), step_name.to_string())).cloned())
    }

    fn clear_loop_state(&self, task_id: &str, step_name: &str) -> Result<()> {
        let mut states = self.states.write().map_err(|e| StepError::Storage(e.to_string()))?;
        states.remove(&(task_id.to_string(), step_name.to_string()));
        Ok(())
    }

    fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }
}

/// File-backed store: one JSON document per key at `<dir>/<task key>/<step key>.loop.json`,
/// where each key is the sanitized name plus a short hash of the raw name
#[derive(Debug)]
pub struct FileStateStore {
    dir: PathBuf,
    writes: AtomicU64,
}

impl FileStateStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| StepError::Storage(format!("{}: {}", dir.display(), e)))?;
        Ok(Self {
            dir,
            writes: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the state file for a key
    pub fn state_path(&self, task_id: &str, step_name: &str) -> PathBuf {
        self.dir
            .join(key_component(task_id))
            .join(format!("{}.loop.json", key_component(step_name)))
    }

    /// Load by raw key, without a `Task` at hand
    pub fn load_by_id(&self, task_id: &str, step_name: &str) -> Result<Option<LoopState>> {
        let path = self.state_path(task_id, step_name);
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StepError::Storage(format!("{}: {}", path.display(), e))),
        };
        serde_json::from_str(&data)
            .map(Some)
            .map_err(|e| StepError::Storage(format!("corrupt loop state {}: {}", path.display(), e)))
    }
}

impl LoopStateStore for FileStateStore {
    fn save_loop_state(&self, task: &Task, state: &LoopState) -> Result<()> {
        let path = self.state_path(&task.id, &state.step_name);
        let data = serde_json::to_vec_pretty(state)?;
        write_atomic(&path, &data).map_err(|e| StepError::Storage(format!("{}: {}", path.display(), e)))?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        log::debug!(
            "Checkpointed loop '{}' for task {} at iteration {}",
            state.step_name,
            task.id,
            state.current_iteration
        );
        Ok(())
    }

    fn load_loop_state(&self, task: &Task, step_name: &str) -> Result<Option<LoopState>> {
        self.load_by_id(&task.id, step_name)
    }

    fn clear_loop_state(&self, task_id: &str, step_name: &str) -> Result<()> {
        let path = self.state_path(task_id, step_name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StepError::Storage(format!("{}: {}", path.display(), e))),
        }
    }

    fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }
}

/// Replace characters that cannot appear in a single path component.
fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

/// Path component for a raw key: the sanitized name plus a short hash of the
/// raw bytes. Distinct keys never share a component.
pub(crate) fn key_component(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    let digest = hasher.finalize();
    format!("{}-{}", sanitize_component(raw), hex::encode(&digest[..8]))
}

/// File name chosen by configuration; kept verbatim when it is already a
/// safe path component.
pub(crate) fn file_component(raw: &str) -> String {
    let cleaned = sanitize_component(raw);
    if cleaned == raw { cleaned } else { key_component(raw) }
}

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Write `data` to `path` via a sibling temp file and rename, so readers
/// never observe a partial file.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("state");
    let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let tmp = parent.join(format!(".{}.{}.{}.tmp", file_name, std::process::id(), seq));
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path).inspect_err(|_| {
        let _ = fs::remove_file(&tmp);
    })
}
