//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - run: drive a workflow file for one task
//! - state: show a loop step's checkpoint
//! - scratchpad: show a loop step's progress log
//! - approve / reject: record a decision for a human step

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Stepr - step orchestration for automated development workflows
#[derive(Parser, Debug)]
#[command(name = "stepr")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run (or resume) a workflow for a task
    Run {
        /// Workflow file (YAML)
        workflow: PathBuf,

        /// Task ID; reusing an ID resumes that task
        #[arg(short, long)]
        task_id: Option<String>,

        /// Workspace name for artifacts
        #[arg(short, long, default_value = "default")]
        workspace: String,

        /// Record what would run without running it
        #[arg(long)]
        dry_run: bool,

        /// Set task metadata (key=value), repeatable
        #[arg(short, long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
    },

    /// Show the checkpoint of a loop step
    State {
        /// Task ID
        task_id: String,

        /// Loop step name
        step: String,
    },

    /// Show the scratchpad of a loop step
    Scratchpad {
        /// Task ID
        task_id: String,

        /// Loop step name
        step: String,

        /// Print raw JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Approve a human step so the next run passes it
    Approve {
        /// Task ID
        task_id: String,

        /// Human step name
        step: String,
    },

    /// Reject a human step so the next run fails it
    Reject {
        /// Task ID
        task_id: String,

        /// Human step name
        step: String,

        /// Reason for rejection
        #[arg(short, long)]
        reason: Option<String>,
    },
}
