//! `conveyor intake` command implementation
//!
//! Shows what a stage has already picked up.

use std::path::Path;

use colored::Colorize;

use conveyor_core::flow::FlowEntity;
use conveyor_core::intake::IntakeLog;

use crate::definition::FlowDefinition;
use crate::error::{CliError, Result};

/// List the intake ledger entries for one stage
pub async fn run(definition_path: &str, stage_code: &str) -> Result<()> {
    let definition = FlowDefinition::load(Path::new(definition_path))?;
    let stage = definition
        .stage(stage_code)
        .ok_or_else(|| CliError::unknown_stage(stage_code))?;

    let entity = FlowEntity::new(&stage.entity)?;
    let log = IntakeLog::new(&stage.state_dir);
    let entries = log.entries(&entity, &stage.code)?;

    if entries.is_empty() {
        println!("No intake entries for stage '{}'.", stage.code);
        println!("The poller records one entry per picked-up source file.");
        return Ok(());
    }

    println!("{}", format!("Intake for '{}':", stage.code).cyan().bold());
    println!();

    for entry in &entries {
        println!("{}", entry.address_id.green());
        println!("  Batch:    {}", entry.batch_id);
        println!("  Modified: {}", entry.date_last_updated.to_rfc3339());
        println!("  Recorded: {}", entry.recorded_at.to_rfc3339());
        match &entry.target_address_id {
            Some(target) => println!("  Snapshot: {}", target),
            None => println!("  Snapshot: {}", "none (processing failed)".red()),
        }
        println!();
    }

    println!("{}", "Summary:".cyan().bold());
    println!("  Total entries: {}", entries.len());
    println!(
        "  Ledger:        {}",
        log.document_path(&entity, &stage.code)?.display()
    );

    Ok(())
}
