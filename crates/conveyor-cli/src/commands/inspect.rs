//! `conveyor inspect` command implementation
//!
//! Summarizes a snapshot document without knowing its record type.

use colored::Colorize;
use serde_json::Value;

use conveyor_core::snapshot::Snapshot;

use crate::error::{CliError, Result};

/// Print a snapshot summary, optionally with every failed record
pub async fn run(path: &str, show_errors: bool) -> Result<()> {
    let contents = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => CliError::FileNotFound(path.to_string()),
        _ => CliError::Io(e),
    })?;
    let snapshot: Snapshot<Value, Value> = serde_json::from_str(&contents)?;

    println!("{}", "Snapshot:".cyan().bold());
    println!("  Flow:        {}", snapshot.flow_code.green());
    println!("  Batch:       {}", snapshot.batch_id);
    println!("  Correlation: {}", snapshot.correlation_id);
    if let Some(source) = &snapshot.source_address {
        println!("  Source:      {}", source);
    }
    println!("  Started:     {}", snapshot.started_at.to_rfc3339());
    println!("  Completed:   {}", snapshot.completed_at.to_rfc3339());
    println!("  Load time:   {:.3}s", snapshot.load_time_secs);
    println!();

    println!("{}", "Accounting:".cyan().bold());
    println!("  Processed:   {}", snapshot.processed_count);
    println!("  Valid:       {}", snapshot.valid_count());
    println!("  Errors:      {}", snapshot.error_count());
    println!(
        "  Committed:   {} added, {} updated, {} removed",
        snapshot.added, snapshot.updated, snapshot.removed
    );

    if !snapshot.warnings.is_empty() {
        println!();
        println!("{}", "Warnings:".yellow().bold());
        for warning in &snapshot.warnings {
            println!("  - {}", warning);
        }
    }

    if show_errors && !snapshot.errors.is_empty() {
        println!();
        println!("{}", "Failed records:".red().bold());
        for error in &snapshot.errors {
            println!(
                "  [{}] {}",
                error.error.kind.as_str().red(),
                error.error.message
            );
            for violation in &error.violations {
                println!("      {}", violation);
            }
            println!("      item: {}", error.item);
        }
    }

    Ok(())
}
