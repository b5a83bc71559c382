//! `conveyor check` command implementation
//!
//! Validates a flow definition and lists its stages.

use std::path::Path;

use colored::Colorize;

use crate::definition::{FlowDefinition, ReaderKind};
use crate::error::Result;

/// Validate the definition file and print a stage summary
pub async fn run(definition_path: &str) -> Result<()> {
    let definition = FlowDefinition::load(Path::new(definition_path))?;

    println!("{}", "Stages:".cyan().bold());
    println!();

    for stage in &definition.stages {
        let reader = match stage.reader {
            ReaderKind::Delimited => format!("delimited ('{}')", stage.delimiter),
            ReaderKind::Snapshot => "snapshot".to_string(),
        };

        println!("{}", stage.code.green());
        println!("  Entity:   {}", stage.entity);
        println!("  Input:    {}", stage.input_dir.display());
        println!("  Output:   {}", stage.output_dir.display());
        println!("  Interval: {}s", stage.interval_secs);
        println!("  Reader:   {}", reader);
        if !stage.required_fields.is_empty() {
            println!("  Required: {}", stage.required_fields.join(", "));
        }
        if let Some(field) = &stage.unique_by {
            println!("  Unique:   {}", field);
        }
        println!();
    }

    println!(
        "Definition OK: {} stage(s) in {}",
        definition.stages.len(),
        definition_path
    );

    Ok(())
}
