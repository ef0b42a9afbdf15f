//! CLI module for the stratus reconciliation tool.
//!
//! This module provides the command-line interface for validating,
//! planning, applying, and emitting cluster configurations.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat};
pub use output::OutputFormatter;
