//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// build-metrics - measure a build and ship its metrics
#[derive(Parser, Debug)]
#[command(
    name = "build-metrics",
    author,
    version,
    about = "Measure a build command and ship its metrics",
    long_about = "Runs a build command, records its timing, output and outcome as a build\n\
                  record, and delivers the record to the configured telemetry backend\n\
                  (index store, REST endpoint or log forwarder)."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "BUILD_METRICS_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "compact",
        global = true,
        env = "BUILD_METRICS_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a command and record it as a build
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON); defaults apply when absent
    #[arg(short, long, env = "BUILD_METRICS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Project name recorded with the build (defaults to the working directory name)
    #[arg(long, env = "BUILD_METRICS_PROJECT")]
    pub project: Option<String>,

    /// Project version recorded with the build
    #[arg(long, default_value = "unspecified", env = "BUILD_METRICS_PROJECT_VERSION")]
    pub project_version: String,

    /// Run the command without collecting metrics
    #[arg(long, env = "BUILD_METRICS_OFFLINE")]
    pub offline: bool,

    /// Override the dispatcher selected in configuration
    #[arg(long, value_enum, env = "BUILD_METRICS_DISPATCHER")]
    pub dispatcher: Option<DispatcherArg>,

    /// Log lines collected before they are forwarded as one batch
    #[arg(long, default_value = "100", env = "BUILD_METRICS_LOG_BATCH")]
    pub log_batch_size: usize,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "BUILD_METRICS_METRICS_PORT")]
    pub metrics_port: u16,

    /// Print a run summary after the receipt
    #[arg(long)]
    pub summary: bool,

    /// Command to measure, after `--`
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub command: Vec<String>,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "build-metrics.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "build-metrics.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show sanitization rules
    #[arg(long)]
    pub sanitization: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    Pretty,
    /// Compact single-line format
    #[default]
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}

/// Dispatcher selectable from the command line
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatcherArg {
    Index,
    Rest,
    LogForwarder,
    Noop,
}

impl From<DispatcherArg> for contracts::DispatcherKind {
    fn from(arg: DispatcherArg) -> Self {
        match arg {
            DispatcherArg::Index => Self::Index,
            DispatcherArg::Rest => Self::Rest,
            DispatcherArg::LogForwarder => Self::LogForwarder,
            DispatcherArg::Noop => Self::Noop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_takes_trailing_command() {
        let cli = Cli::parse_from([
            "build-metrics",
            "run",
            "--offline",
            "--",
            "cargo",
            "build",
            "--release",
        ]);
        match cli.command {
            Commands::Run(args) => {
                assert!(args.offline);
                assert_eq!(args.command, ["cargo", "build", "--release"]);
                assert!(args.config.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_run_requires_command() {
        assert!(Cli::try_parse_from(["build-metrics", "run"]).is_err());
    }

    #[test]
    fn test_dispatcher_override() {
        let cli = Cli::parse_from(["build-metrics", "run", "--dispatcher", "log-forwarder", "--", "true"]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(
            contracts::DispatcherKind::from(args.dispatcher.unwrap()),
            contracts::DispatcherKind::LogForwarder
        );
    }
}
