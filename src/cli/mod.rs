//! CLI module for stepr - command-line interface and subcommands.
//!
//! Runs workflow files and inspects the state they leave behind.

pub mod commands;

pub use commands::Cli;
