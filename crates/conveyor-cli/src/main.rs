//! Conveyor CLI - Main entry point

use clap::Parser;
use conveyor_cli::{Cli, Commands};
use conveyor_common::logging::{init_logging, LogConfig, LogLevel};
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Parse command-line arguments
    let cli = Cli::parse();

    // Initialize logging based on verbose flag and environment
    let log_config = if cli.verbose {
        LogConfig::builder()
            .level(LogLevel::Debug)
            .log_file_prefix("conveyor".to_string())
            .build()
    } else {
        LogConfig::builder()
            .level(LogLevel::Warn)
            .log_file_prefix("conveyor".to_string())
            .build()
    };

    // Merge with environment variables (they take precedence)
    let log_config = LogConfig::from_env().unwrap_or(log_config);

    // Initialize logging (ignore errors as the CLI should work without logging)
    let _ = init_logging(&log_config);

    // Execute command
    let result = execute_command(&cli).await;

    // Handle result
    if let Err(e) = result {
        error!(error = %e, "Command failed");
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Execute the CLI command
async fn execute_command(cli: &Cli) -> conveyor_cli::Result<()> {
    match &cli.command {
        Commands::Check => conveyor_cli::commands::check::run(&cli.definition).await,

        Commands::Run { once, stage } => {
            conveyor_cli::commands::run::run(&cli.definition, stage.as_deref(), *once).await
        }

        Commands::Inspect { path, errors } => {
            conveyor_cli::commands::inspect::run(path, *errors).await
        }

        Commands::Intake { stage } => {
            conveyor_cli::commands::intake::run(&cli.definition, stage).await
        }
    }
}
