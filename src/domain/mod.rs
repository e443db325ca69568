//! Domain types for Stepr
//!
//! This module contains the shared vocabulary every executor speaks:
//! - Task: one unit of orchestrated work with its history and metadata
//! - StepDefinition / StepType: static description of a step and its dispatch key
//! - StepResult / StepStatus: the outcome of one step attempt

pub mod result;
pub mod task;

pub use result::{StepResult, StepStatus};
pub use task::{StepConfig, StepDefinition, StepType, Task};
