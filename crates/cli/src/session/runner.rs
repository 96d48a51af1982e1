//! Runs the measured command and turns its output into log events

use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use contracts::{LogEvent, LogLevel};
use dispatcher::MetricsCollector;

use crate::error::{CliError, Result};

/// Outcome of the measured command
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub status: ExitStatus,
    /// Wall-clock start, epoch milliseconds
    pub start_time: i64,
    pub elapsed: Duration,
    pub log_lines: u64,
}

impl ProcessOutcome {
    /// Exit code, with signal terminations mapped to 1
    pub fn exit_code(&self) -> i32 {
        self.status.code().unwrap_or(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    fn level(self) -> LogLevel {
        match self {
            Self::Stdout => LogLevel::Info,
            Self::Stderr => LogLevel::Warn,
        }
    }
}

/// Echo every line of `reader` and hand it to the collector loop
async fn pump<R>(reader: R, stream: Stream, tx: mpsc::Sender<(Stream, String)>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                match stream {
                    Stream::Stdout => println!("{line}"),
                    Stream::Stderr => eprintln!("{line}"),
                }
                if tx.send((stream, line)).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(?stream, error = %e, "Failed to read command output");
                break;
            }
        }
    }
}

async fn forward<C: MetricsCollector>(collector: &C, batch: &mut Vec<LogEvent>) {
    if batch.is_empty() {
        return;
    }
    if let Err(e) = collector.log_events(std::mem::take(batch)).await {
        warn!(error = %e, "Failed to forward log events");
    }
}

/// Run `command`, echoing its output
///
/// With `collector` present, output lines are forwarded in batches of
/// `batch_size` as log events.
#[instrument(name = "session_run_process", skip(collector), fields(program = %command.first().map(String::as_str).unwrap_or_default()))]
pub async fn run_process<C: MetricsCollector>(
    command: &[String],
    collector: Option<&C>,
    batch_size: usize,
) -> Result<ProcessOutcome> {
    let (program, args) = command.split_first().ok_or(CliError::EmptyCommand)?;
    let command_line = command.join(" ");

    let start_time = Utc::now().timestamp_millis();
    let started = Instant::now();

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| CliError::command_spawn(&command_line, e))?;
    debug!(pid = ?child.id(), "Command started");

    let (tx, mut rx) = mpsc::channel(1024);
    let mut pumps = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        pumps.push(tokio::spawn(pump(stdout, Stream::Stdout, tx.clone())));
    }
    if let Some(stderr) = child.stderr.take() {
        pumps.push(tokio::spawn(pump(stderr, Stream::Stderr, tx.clone())));
    }
    drop(tx);

    let batch_size = batch_size.max(1);
    let mut batch = Vec::with_capacity(batch_size);
    let mut log_lines = 0;
    while let Some((stream, line)) = rx.recv().await {
        log_lines += 1;
        if let Some(collector) = collector {
            batch.push(LogEvent::new(Utc::now().timestamp_millis(), stream.level(), line));
            if batch.len() >= batch_size {
                forward(collector, &mut batch).await;
            }
        }
    }
    if let Some(collector) = collector {
        forward(collector, &mut batch).await;
    }

    for pump in pumps {
        if let Err(e) = pump.await {
            warn!(error = %e, "Output reader task failed");
        }
    }

    let status = child
        .wait()
        .await
        .map_err(|e| CliError::command_wait(&command_line, e))?;
    let elapsed = started.elapsed();
    debug!(%status, elapsed_ms = elapsed.as_millis() as u64, log_lines, "Command finished");

    Ok(ProcessOutcome {
        status,
        start_time,
        elapsed,
        log_lines,
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use dispatcher::UnconfiguredDispatcher;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn test_counts_lines_and_exit_code() {
        let outcome = run_process::<UnconfiguredDispatcher>(&sh("echo one; echo two >&2; exit 3"), None, 10)
            .await
            .unwrap();
        assert_eq!(outcome.exit_code(), 3);
        assert_eq!(outcome.log_lines, 2);
    }

    #[tokio::test]
    async fn test_missing_program() {
        let result = run_process::<UnconfiguredDispatcher>(
            &["definitely-not-a-real-program-3f9a".to_string()],
            None,
            10,
        )
        .await;
        assert!(matches!(result, Err(CliError::CommandSpawn { .. })));
    }

    #[tokio::test]
    async fn test_empty_command() {
        let result = run_process::<UnconfiguredDispatcher>(&[], None, 10).await;
        assert!(matches!(result, Err(CliError::EmptyCommand)));
    }
}
