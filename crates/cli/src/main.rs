//! # Build Metrics CLI
//!
//! Measures a build command and ships its metrics.
//!
//! Provides:
//! - Configuration loading and validation
//! - Build measurement with log forwarding
//! - Delivery receipts and run summaries

mod cli;
mod commands;
mod environment;
mod error;
mod session;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use cli::{Cli, Commands};
use commands::{run_command, run_info, run_validate};
use observability::ObservabilityConfig;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    init_observability(&cli)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Build metrics CLI starting"
    );

    let result = match &cli.command {
        Commands::Run(args) => run_command(args).await,
        Commands::Validate(args) => run_validate(args).map(|()| 0),
        Commands::Info(args) => run_info(args).map(|()| 0),
    };

    match result {
        Ok(code) => Ok(exit_code(code)),
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            Err(e)
        }
    }
}

/// Exit codes outside 0..=255 collapse to 1
fn exit_code(code: i32) -> ExitCode {
    u8::try_from(code).map_or(ExitCode::FAILURE, ExitCode::from)
}

fn init_observability(cli: &Cli) -> Result<()> {
    let default_log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let metrics_port = match &cli.command {
        Commands::Run(args) if args.metrics_port != 0 => Some(args.metrics_port),
        _ => None,
    };

    observability::init_with_config(ObservabilityConfig {
        log_format: cli.log_format.into(),
        metrics_port,
        default_log_level: default_log_level.to_string(),
    })
}
