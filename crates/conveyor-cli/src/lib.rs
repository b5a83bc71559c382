//! Conveyor CLI Library
//!
//! Command-line interface for running and inspecting conveyor flows.
//!
//! # Overview
//!
//! The CLI drives definition-file flows end to end:
//!
//! - **Definition Checking**: Validate a flow definition (`conveyor check`)
//! - **Polling**: Run every stage's poller (`conveyor run`), or a single
//!   pass with `--once`
//! - **Snapshot Inspection**: Summarize a snapshot document
//!   (`conveyor inspect`)
//! - **Intake Ledger**: Show what a stage has already picked up
//!   (`conveyor intake`)

pub mod commands;
pub mod definition;
pub mod error;

// Re-export commonly used types
pub use definition::{FlowDefinition, StageDefinition};
pub use error::{CliError, Result};

use clap::{Parser, Subcommand};

/// Conveyor - file-driven batch pipelines
#[derive(Parser, Debug)]
#[command(name = "conveyor")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Flow definition file
    #[arg(
        short,
        long,
        env = "CONVEYOR_DEFINITION",
        default_value = "flows.toml",
        global = true
    )]
    pub definition: String,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the flow definition and list its stages
    Check,

    /// Run stage pollers from the definition
    Run {
        /// Poll each stage once and exit instead of running on the timer
        #[arg(long)]
        once: bool,

        /// Only run the named stage
        #[arg(short, long)]
        stage: Option<String>,
    },

    /// Summarize a snapshot document
    Inspect {
        /// Path to a snapshot JSON document
        path: String,

        /// List every failed record with its reason
        #[arg(short, long)]
        errors: bool,
    },

    /// Show the intake ledger for a stage
    Intake {
        /// Stage code from the definition
        stage: String,
    },
}
