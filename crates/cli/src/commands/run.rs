//! `run` command implementation.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use contracts::{MetricsConfig, Project};
use dispatcher::DispatcherHandle;

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::session::{print_summary, Session, SessionConfig};

/// Execute the `run` command, returning the measured command's exit code
pub async fn run_command(args: &RunArgs) -> Result<i32> {
    let config = load_config(args)?;

    info!(
        dispatcher = %config.dispatcher,
        fail_on_error = config.fail_on_error,
        synchronous = config.synchronous,
        "Configuration loaded"
    );

    let handle = DispatcherHandle::new();
    if args.offline {
        info!("Offline mode - metrics will not be collected");
    } else {
        match dispatcher::create_dispatcher(&config) {
            Ok(dispatcher) => {
                handle
                    .configure(dispatcher)
                    .context("Failed to bind metrics dispatcher")?;
            }
            Err(e) => warn!(error = %e, "Failed to create metrics dispatcher, continuing without metrics"),
        }
    }

    let session = Session::new(
        handle,
        SessionConfig {
            command: args.command.clone(),
            project: Project::new(project_name(args), args.project_version.clone()),
            log_batch_size: args.log_batch_size,
            shutdown_timeout: Duration::from_secs(config.shutdown_timeout_secs),
        },
    );

    let outcome = session.run().await.context("Build command failed to run")?;

    if let Some(receipt) = &outcome.receipt {
        println!("{receipt}");
    }
    if args.summary {
        print_summary(&outcome);
    }

    info!(
        exit_code = outcome.exit_code,
        duration_secs = outcome.elapsed.as_secs_f64(),
        "Build finished"
    );
    Ok(outcome.exit_code)
}

/// Load the configured file, or defaults when no path is given
fn load_config(args: &RunArgs) -> Result<MetricsConfig> {
    let mut config = match &args.config {
        Some(path) => {
            if !path.exists() {
                return Err(CliError::config_not_found(path.display().to_string()).into());
            }
            info!(config = %path.display(), "Loading configuration");
            config_loader::ConfigLoader::load_from_path(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?
        }
        None => {
            info!("No configuration file given, using defaults");
            MetricsConfig::default()
        }
    };

    if let Some(kind) = args.dispatcher {
        let kind = kind.into();
        info!(dispatcher = %kind, "Overriding dispatcher from CLI");
        config.dispatcher = kind;
        config_loader::ConfigLoader::validate(&config)
            .context("Configuration invalid after CLI overrides")?;
    }

    Ok(config)
}

fn project_name(args: &RunArgs) -> String {
    args.project.clone().unwrap_or_else(|| {
        std::env::current_dir()
            .ok()
            .as_deref()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_string())
    })
}
