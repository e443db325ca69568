//! Checkpointed loop steps.
//!
//! - `executor`: the `LoopExecutor` that repeats inner steps
//! - `exit`: the two-gate exit evaluator
//! - `state`: loop checkpoints and their stores
//! - `scratchpad`: the operator-facing progress log

pub mod executor;
pub mod exit;
pub mod scratchpad;
pub mod state;

pub use executor::{ExitReason, LoopExecutor, LoopStepConfig};
pub use exit::{EvaluationResult, ExitEvaluator, has_exit_signal};
pub use scratchpad::{IterationSummary, Scratchpad, ScratchpadData};
pub use state::{FileStateStore, IterationResult, LoopState, LoopStateStore, MemoryStateStore};
