//! Session - one measured build
//!
//! Drives the collector through a build: start the dispatcher, describe the
//! project and environment, run the command while forwarding its output,
//! record the outcome, then stop and wait for delivery.

mod runner;
mod summary;

pub use runner::{run_process, ProcessOutcome};
pub use summary::print_summary;

use std::time::Duration;

use chrono::Utc;
use tracing::{info, instrument, warn};

use contracts::{BuildResult, MetricsSink, Project, TaskExecution};
use dispatcher::{DispatcherHandle, MetricsCollector, MetricsSnapshot};

use crate::environment;
use crate::error::Result;

/// Category of the event recorded for the measured command
pub const EXECUTION_CATEGORY: &str = "execution";

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub command: Vec<String>,
    pub project: Project,
    pub log_batch_size: usize,
    /// Bound on waiting for the dispatcher to deliver and terminate
    pub shutdown_timeout: Duration,
}

/// What happened during a session
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub exit_code: i32,
    pub elapsed: Duration,
    pub log_lines: u64,
    /// Whether metrics were collected for this build
    pub collected: bool,
    pub receipt: Option<String>,
    pub dispatch: Option<MetricsSnapshot>,
}

/// One measured build
pub struct Session<S: MetricsSink + Sync + 'static> {
    handle: DispatcherHandle<S>,
    config: SessionConfig,
}

impl<S: MetricsSink + Sync + 'static> Session<S> {
    /// Without a configured dispatcher on `handle`, the command runs unmeasured
    pub fn new(handle: DispatcherHandle<S>, config: SessionConfig) -> Self {
        Self { handle, config }
    }

    /// Start collection; false when collection is unavailable
    async fn begin(&self) -> bool {
        if !self.handle.is_configured() {
            info!("Metrics collection disabled");
            return false;
        }
        if let Err(e) = self.handle.start().await {
            warn!(error = %e, "Metrics dispatcher failed to start, continuing without metrics");
            return false;
        }

        if let Err(e) = self.handle.started(self.config.project.clone()).await {
            warn!(error = %e, "Failed to record project");
        }
        if let Err(e) = self.handle.environment(environment::collect()).await {
            warn!(error = %e, "Failed to record environment");
        }
        true
    }

    async fn record(&self, outcome: &ProcessOutcome) {
        let elapsed_ms = outcome.elapsed.as_millis() as u64;
        let result = if outcome.status.success() {
            BuildResult::success()
        } else {
            BuildResult::failures([format!(
                "'{}' exited with code {}",
                self.config.command.join(" "),
                outcome.exit_code()
            )])
        };

        let task = TaskExecution::new(
            self.config.command.join(" "),
            result.clone(),
            outcome.start_time,
            elapsed_ms,
        );
        if let Err(e) = self.handle.task(task).await {
            warn!(error = %e, "Failed to record task");
        }
        if let Err(e) = self.handle.duration(outcome.start_time, elapsed_ms).await {
            warn!(error = %e, "Failed to record duration");
        }
        if let Err(e) = self.handle.result(result).await {
            warn!(error = %e, "Failed to record result");
        }
        let program = self.config.command.first().map(String::as_str).unwrap_or_default();
        if let Err(e) = self.handle.event(program, EXECUTION_CATEGORY, elapsed_ms).await {
            warn!(error = %e, "Failed to record execution event");
        }
    }

    async fn finish(&self) {
        if let Err(e) = self.handle.stop().await {
            warn!(error = %e, "Failed to stop metrics dispatcher");
            return;
        }
        if let Err(e) = self.handle.await_terminated(self.config.shutdown_timeout).await {
            warn!(error = %e, "Metrics dispatcher did not terminate cleanly");
        }
    }

    /// Run the build; errors only when the command itself cannot be run
    #[instrument(name = "session_run", skip(self), fields(project = %self.config.project.name))]
    pub async fn run(&self) -> Result<SessionOutcome> {
        let collected = self.begin().await;
        let collector = collected.then_some(&self.handle);

        let outcome = run_process(&self.config.command, collector, self.config.log_batch_size).await;

        if collected {
            match &outcome {
                Ok(outcome) => self.record(outcome).await,
                Err(e) => {
                    let failed = BuildResult::failure(e);
                    if let Err(e) = self.handle.duration(Utc::now().timestamp_millis(), 0).await {
                        warn!(error = %e, "Failed to record duration");
                    }
                    if let Err(e) = self.handle.result(failed).await {
                        warn!(error = %e, "Failed to record result");
                    }
                }
            }
            self.finish().await;
        }

        let outcome = outcome?;
        let dispatcher = self.handle.dispatcher().filter(|_| collected);
        Ok(SessionOutcome {
            exit_code: outcome.exit_code(),
            elapsed: outcome.elapsed,
            log_lines: outcome.log_lines,
            collected,
            receipt: dispatcher.as_ref().and_then(|d| d.receipt()),
            dispatch: dispatcher.as_ref().map(|d| d.metrics()),
        })
    }
}
