//! Executor registry: step type → executor lookup.
//!
//! Shared across tasks behind an `Arc`. Reads take a shared lock; registration
//! takes the write lock and is expected only during setup.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;

use super::Executor;
use crate::ci::{CiExecutor, CiProgress, CiWatcher};
use crate::command::CommandExecutor;
use crate::domain::StepType;
use crate::error::{Result, StepError};
use crate::human::HumanExecutor;
use crate::loops::{LoopExecutor, LoopStateStore};

/// Collaborators for the built-in executors
pub struct Builtins {
    pub state_store: Arc<dyn LoopStateStore>,
    /// Without a watcher the `ci` executor fails every step with a dependency error
    pub ci_watcher: Option<Arc<dyn CiWatcher>>,
    pub ci_progress: Option<mpsc::UnboundedSender<CiProgress>>,
    pub scratchpad_dir: Option<PathBuf>,
}

impl Builtins {
    pub fn new(state_store: Arc<dyn LoopStateStore>) -> Self {
        Self {
            state_store,
            ci_watcher: None,
            ci_progress: None,
            scratchpad_dir: None,
        }
    }

    pub fn with_ci_watcher(mut self, watcher: Arc<dyn CiWatcher>) -> Self {
        self.ci_watcher = Some(watcher);
        self
    }

    pub fn with_ci_progress(mut self, tx: mpsc::UnboundedSender<CiProgress>) -> Self {
        self.ci_progress = Some(tx);
        self
    }

    pub fn with_scratchpad_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratchpad_dir = Some(dir.into());
        self
    }
}

#[derive(Default)]
pub struct ExecutorRegistry {
    executors: RwLock<HashMap<StepType, Arc<dyn Executor>>>,
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("types", &self.types())
            .finish()
    }
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `ci`, `loop`, `command`, `validation` and `human` executors bound.
    pub fn with_builtins(builtins: Builtins) -> Self {
        let registry = Self::new();

        let mut ci = match builtins.ci_watcher {
            Some(watcher) => CiExecutor::new(watcher),
            None => CiExecutor::default(),
        };
        if let Some(tx) = builtins.ci_progress {
            ci = ci.with_progress(tx);
        }
        registry.register(Arc::new(ci));

        let mut looped = LoopExecutor::new().with_state_store(builtins.state_store);
        if let Some(dir) = builtins.scratchpad_dir {
            looped = looped.with_scratchpad_dir(dir);
        }
        registry.register(Arc::new(looped));

        registry.register(Arc::new(CommandExecutor::new(StepType::Command)));
        registry.register(Arc::new(CommandExecutor::new(StepType::Validation)));
        registry.register(Arc::new(HumanExecutor::new()));
        registry
    }

    /// Bind `executor` to its declared step type, replacing any previous binding.
    pub fn register(&self, executor: Arc<dyn Executor>) {
        let step_type = executor.step_type();
        let previous = self
            .executors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(step_type, executor);
        if previous.is_some() {
            log::debug!("Replaced executor for step type {}", step_type);
        } else {
            log::debug!("Registered executor for step type {}", step_type);
        }
    }

    /// Get the executor bound to `step_type`.
    pub fn get(&self, step_type: StepType) -> Result<Arc<dyn Executor>> {
        self.executors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&step_type)
            .cloned()
            .ok_or(StepError::ExecutorNotFound(step_type))
    }

    pub fn has(&self, step_type: StepType) -> bool {
        self.executors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&step_type)
    }

    /// Currently bound step types, in no particular order.
    pub fn types(&self) -> Vec<StepType> {
        self.executors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.executors.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
