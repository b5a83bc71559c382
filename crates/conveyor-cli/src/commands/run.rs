//! `conveyor run` command implementation
//!
//! Builds and runs the pollers declared in a flow definition.

use std::path::Path;

use colored::Colorize;
use tracing::info;

use crate::definition::{FlowDefinition, StageDefinition};
use crate::error::{CliError, Result};

/// Run stage pollers until interrupted, or once with `once`
pub async fn run(definition_path: &str, stage: Option<&str>, once: bool) -> Result<()> {
    let definition = FlowDefinition::load(Path::new(definition_path))?;

    let stages: Vec<&StageDefinition> = match stage {
        Some(code) => vec![definition
            .stage(code)
            .ok_or_else(|| CliError::unknown_stage(code))?],
        None => definition.stages.iter().collect(),
    };

    let mut pollers = Vec::with_capacity(stages.len());
    for stage in &stages {
        pollers.push(stage.build_poller()?);
    }

    if once {
        let mut failures = 0;
        for poller in &pollers {
            let code = poller.flow().code.clone();
            if let Err(e) = poller.poll_once().await {
                failures += 1;
                eprintln!("{} stage '{}': {:#}", "failed".red(), code, e);
            } else {
                println!("{} stage '{}'", "polled".green(), code);
            }
        }
        if failures > 0 {
            return Err(CliError::Other(anyhow::anyhow!(
                "{failures} stage poll(s) failed"
            )));
        }
        return Ok(());
    }

    // print processing notifications while the pollers run
    for poller in &pollers {
        let mut events = poller.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                if event.succeeded {
                    println!(
                        "{} {} (batch {}, {} valid, {} errors)",
                        "processed".green(),
                        event.address,
                        event.batch_id,
                        event.valid_count,
                        event.error_count
                    );
                } else {
                    println!("{} {} (batch {})", "failed".red(), event.address, event.batch_id);
                }
            }
        });
    }

    for poller in &pollers {
        poller.start()?;
    }
    println!(
        "Polling {} stage(s) from {}. Press Ctrl+C to stop.",
        pollers.len(),
        definition_path
    );

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received, stopping pollers");
    println!("Stopping...");

    for poller in &pollers {
        poller.stop().await;
    }

    Ok(())
}
