//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Stratus - dependency-ordered reconciliation of cloud compute groups.
#[derive(Parser, Debug)]
#[command(name = "stratus")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the cluster configuration file.
    #[arg(short, long, global = true, env = "STRATUS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Use a provider fixture file instead of the live provider API.
    #[arg(long, global = true, env = "STRATUS_FIXTURE")]
    pub fixture: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the cluster configuration.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Print the execution order of the declared tasks.
    Graph,

    /// Discover live state and show what a pass would change.
    Plan,

    /// Reconcile the cluster by mutating the provider directly.
    Apply {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Reconcile the cluster with the target named in the configuration.
    Reconcile {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Write the document to this directory instead of the configured sink.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Render the cluster as a declarative document.
    Emit {
        /// Write the document to this directory instead of the configured sink.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
