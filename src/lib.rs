//! Stepr - a step executor framework for orchestrating AI-assisted development tasks
//!
//! Stepr runs a task through an ordered list of typed steps. Each step type is
//! bound to an executor in a registry; the built-in executors wait on CI
//! checks, iterate a sub-sequence of steps until an exit signal, run shell
//! commands and pause for human approval.

pub mod artifact;
pub mod ci;
pub mod command;
pub mod config;
pub mod domain;
pub mod driver;
pub mod duration;
pub mod error;
pub mod executor;
pub mod human;
pub mod loops;
pub mod workflow;

pub use error::{Result, StepError};
