//! MetricsDispatcher - owns one Build and ships its snapshots to a sink

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use contracts::{
    Build, BuildResult, DispatcherKind, Event, Info, LogEvent, MetricsConfig, MetricsSink,
    Project, TaskExecution, TestExecution, BUILD_TYPE, LOG_TYPE,
};

use crate::error::DispatcherError;
use crate::metrics::MetricsSnapshot;
use crate::sanitize::Sanitizer;
use crate::service::{
    ExecutionMode, FailurePolicy, QueuedExecutionService, ServiceHooks, ServiceState,
};
use crate::sinks::{AnySink, IndexSink, LogForwarderSink, MemorySink, NoopSink, RestSink};

/// Work items executed by the dispatcher's worker
pub enum DispatchAction {
    /// Index the newest snapshot of the build
    IndexBuild,
    /// Bulk-index captured log lines
    IndexLogs(Vec<LogEvent>),
}

impl fmt::Debug for DispatchAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IndexBuild => f.write_str("IndexBuild"),
            Self::IndexLogs(events) => write!(f, "IndexLogs({} events)", events.len()),
        }
    }
}

/// Log line as written to the log collection
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LogRecord<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    build_id: Option<&'a str>,
    #[serde(flatten)]
    event: &'a LogEvent,
}

/// Build state and sink shared by the caller and the worker
pub struct DispatchCore<S> {
    sink: S,
    build: Mutex<Build>,
    sanitizer: Sanitizer,
    /// An `IndexBuild` is queued and has not started yet
    index_pending: AtomicBool,
}

impl<S: MetricsSink + Sync + 'static> DispatchCore<S> {
    fn new(sink: S, sanitizer: Sanitizer) -> Self {
        Self {
            sink,
            build: Mutex::new(Build::new()),
            sanitizer,
            index_pending: AtomicBool::new(false),
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    fn build(&self) -> MutexGuard<'_, Build> {
        self.build.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sanitize and serialize the build; `None` when it cannot be rendered
    fn render_build(&self) -> Option<(String, Option<String>)> {
        let mut build = self.build();
        let redacted = self.sanitizer.sanitize(&mut build);
        if redacted > 0 {
            debug!(sink = %self.sink.name(), redacted, "Sanitized build properties");
        }
        match serde_json::to_string(&build.snapshot()) {
            Ok(payload) => Some((payload, build.build_id().map(str::to_owned))),
            Err(e) => {
                error!(sink = %self.sink.name(), error = %e, "Unable to serialize build");
                None
            }
        }
    }

    #[instrument(name = "dispatch_index_build", skip(self), fields(sink = %self.sink.name()))]
    async fn index_build(&self) -> Result<(), DispatcherError> {
        self.index_pending.store(false, Ordering::SeqCst);

        let Some((payload, build_id)) = self.render_build() else {
            return Ok(());
        };

        let result = self
            .sink
            .index(self.sink.collection(), BUILD_TYPE, &payload, build_id.as_deref())
            .await;
        observability::record_build_indexed(self.sink.name(), result.is_ok());
        let id = result?;

        if self.build().assign_build_id(&id) {
            info!(sink = %self.sink.name(), build_id = %id, "Build id is {id}");
        }
        Ok(())
    }

    #[instrument(
        name = "dispatch_index_logs",
        skip(self, events),
        fields(sink = %self.sink.name(), count = events.len())
    )]
    async fn index_logs(&self, events: Vec<LogEvent>) -> Result<(), DispatcherError> {
        let build_id = self.build().build_id().map(str::to_owned);

        let mut payloads = Vec::with_capacity(events.len());
        for event in &events {
            let record = LogRecord {
                build_id: build_id.as_deref(),
                event,
            };
            match serde_json::to_string(&record) {
                Ok(payload) => payloads.push(payload),
                Err(e) => warn!(sink = %self.sink.name(), error = %e, "Unable to serialize log event"),
            }
        }
        if payloads.is_empty() {
            return Ok(());
        }

        self.sink
            .bulk_index(&self.sink.log_collection(), LOG_TYPE, &payloads)
            .await?;
        observability::record_log_events_forwarded(self.sink.name(), payloads.len());
        Ok(())
    }
}

impl<S: MetricsSink + Sync + 'static> ServiceHooks for DispatchCore<S> {
    type Action = DispatchAction;

    fn service_name(&self) -> &str {
        self.sink.name()
    }

    async fn execute(&self, action: DispatchAction) -> Result<(), DispatcherError> {
        match action {
            DispatchAction::IndexBuild => self.index_build().await,
            DispatchAction::IndexLogs(events) => self.index_logs(events).await,
        }
    }

    fn on_discard(&self, action: DispatchAction) {
        if let DispatchAction::IndexBuild = action {
            self.index_pending.store(false, Ordering::SeqCst);
        }
    }

    /// Record the snapshot taken before any work runs
    async fn start_up(&self, service: &QueuedExecutionService<Self>) -> Result<(), DispatcherError> {
        self.build().set_start_time(Utc::now().timestamp_millis());
        self.sink.start_up_client().await?;
        self.sink
            .ensure_collection_exists(self.sink.collection())
            .await?;
        service.execute_synchronously(DispatchAction::IndexBuild).await?;
        Ok(())
    }

    /// Deliver the final snapshot before the client goes away
    async fn before_shut_down(&self, service: &QueuedExecutionService<Self>) -> Result<(), DispatcherError> {
        service.execute_synchronously(DispatchAction::IndexBuild).await?;
        Ok(())
    }

    async fn post_shut_down(&self) -> Result<(), DispatcherError> {
        self.sink.shut_down_client().await?;
        Ok(())
    }
}

/// Dispatcher for a single build
///
/// Every mutator updates the build and requests an index of the newest
/// snapshot. Queued requests coalesce: while one is waiting to run, further
/// mutations are covered by it.
pub struct MetricsDispatcher<S: MetricsSink + Sync + 'static> {
    service: QueuedExecutionService<DispatchCore<S>>,
    mode: ExecutionMode,
    shutdown_timeout: Duration,
}

impl<S: MetricsSink + Sync + 'static> MetricsDispatcher<S> {
    /// Dispatcher using the policy, mode and sanitization rules of `config`
    pub fn new(sink: S, config: &MetricsConfig) -> Result<Self, DispatcherError> {
        Ok(Self::with_options(
            sink,
            Sanitizer::from_config(config)?,
            FailurePolicy::from_config(config),
            ExecutionMode::from_config(config),
            Duration::from_secs(config.shutdown_timeout_secs),
        ))
    }

    pub fn with_options(
        sink: S,
        sanitizer: Sanitizer,
        policy: FailurePolicy,
        mode: ExecutionMode,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            service: QueuedExecutionService::new(DispatchCore::new(sink, sanitizer), policy),
            mode,
            shutdown_timeout,
        }
    }

    pub fn service(&self) -> &QueuedExecutionService<DispatchCore<S>> {
        &self.service
    }

    fn core(&self) -> &DispatchCore<S> {
        self.service.hooks()
    }

    pub fn sink(&self) -> &S {
        self.core().sink()
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    pub async fn start(&self) -> Result<(), DispatcherError> {
        self.service.start().await
    }

    pub async fn await_running(&self, timeout: Duration) -> Result<(), DispatcherError> {
        self.service.await_running(timeout).await
    }

    pub async fn stop(&self) -> Result<(), DispatcherError> {
        self.service.stop().await
    }

    pub async fn await_terminated(&self, timeout: Duration) -> Result<(), DispatcherError> {
        self.service.await_terminated(timeout).await
    }

    /// Stop, then wait up to the shutdown timeout for termination
    ///
    /// A timeout is logged and returned; the caller is free to move on.
    pub async fn shutdown(&self) -> Result<(), DispatcherError> {
        self.stop().await?;
        match self.await_terminated(self.shutdown_timeout).await {
            Err(e @ DispatcherError::Timeout { .. }) => {
                warn!(
                    service = %self.service.name(),
                    timeout = ?self.shutdown_timeout,
                    "Dispatcher did not terminate in time"
                );
                Err(e)
            }
            other => other,
        }
    }

    pub fn state(&self) -> ServiceState {
        self.service.state()
    }

    pub fn is_running(&self) -> bool {
        self.service.is_running()
    }

    pub fn has_failed(&self) -> bool {
        self.service.has_failed()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.service.metrics()
    }

    pub fn build_id(&self) -> Option<String> {
        self.core().build().build_id().map(str::to_owned)
    }

    /// Read access to the build
    pub fn with_build<R>(&self, f: impl FnOnce(&Build) -> R) -> R {
        f(&*self.core().build())
    }

    /// Where the delivered build can be found; `None` until an id is assigned
    pub fn receipt(&self) -> Option<String> {
        self.build_id().and_then(|id| self.sink().receipt(&id))
    }

    fn update<R>(&self, f: impl FnOnce(&mut Build) -> R) -> R {
        f(&mut *self.core().build())
    }

    async fn request_index(&self) -> Result<(), DispatcherError> {
        match self.mode {
            ExecutionMode::Synchronous => {
                self.service
                    .execute_synchronously(DispatchAction::IndexBuild)
                    .await?;
            }
            ExecutionMode::Queued => {
                let pending = &self.core().index_pending;
                if pending.swap(true, Ordering::SeqCst) {
                    return Ok(());
                }
                if !self.service.queue(DispatchAction::IndexBuild) {
                    pending.store(false, Ordering::SeqCst);
                }
            }
        }
        Ok(())
    }

    pub async fn started(&self, project: Project) -> Result<(), DispatcherError> {
        self.update(|build| build.set_project(project));
        self.request_index().await
    }

    pub async fn duration(&self, start_time: i64, elapsed_time: u64) -> Result<(), DispatcherError> {
        self.update(|build| {
            build.set_start_time(start_time);
            build.set_elapsed_time(elapsed_time);
        });
        self.request_index().await
    }

    pub async fn environment(&self, info: Info) -> Result<(), DispatcherError> {
        self.update(|build| build.set_info(info));
        self.request_index().await
    }

    /// Record the outcome; the first definitive result wins
    pub async fn result(&self, result: BuildResult) -> Result<(), DispatcherError> {
        self.update(|build| {
            if !build.set_result(result) {
                debug!("Build result already recorded, ignoring");
            }
        });
        self.request_index().await
    }

    pub async fn event(
        &self,
        description: &str,
        category: &str,
        elapsed_time: u64,
    ) -> Result<(), DispatcherError> {
        self.update(|build| build.add_event(Event::new(description, category, elapsed_time)));
        self.request_index().await
    }

    pub async fn task(&self, task: TaskExecution) -> Result<(), DispatcherError> {
        self.update(|build| build.add_task(task));
        self.request_index().await
    }

    pub async fn test(&self, test: TestExecution) -> Result<(), DispatcherError> {
        self.update(|build| build.add_test(test));
        self.request_index().await
    }

    /// Attach a named report; names of top-level build fields are ignored
    pub async fn report(&self, name: &str, report: Value) -> Result<(), DispatcherError> {
        if !self.update(|build| build.add_report(name, report)) {
            warn!(report = %name, "Report name clashes with a build field, ignoring");
            return Ok(());
        }
        self.request_index().await
    }

    /// Forward captured log lines; discarded once the service has failed
    pub async fn log_events(&self, events: Vec<LogEvent>) -> Result<(), DispatcherError> {
        if events.is_empty() {
            return Ok(());
        }
        if self.has_failed() {
            debug!(count = events.len(), "Dispatcher has failed, discarding log events");
            return Ok(());
        }
        self.service
            .submit(DispatchAction::IndexLogs(events), self.mode)
            .await?;
        Ok(())
    }
}

impl<S: MetricsSink + Sync + 'static> fmt::Debug for MetricsDispatcher<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsDispatcher")
            .field("service", &self.service)
            .field("mode", &self.mode)
            .field("build_id", &self.build_id())
            .finish()
    }
}

/// Create the sink selected by `config.dispatcher`
#[instrument(name = "dispatcher_create_sink", skip(config), fields(kind = %config.dispatcher))]
pub fn create_sink(config: &MetricsConfig) -> Result<AnySink, DispatcherError> {
    let timeout = Duration::from_secs(config.request_timeout_secs);
    let sink = match config.dispatcher {
        DispatcherKind::Index => AnySink::Index(IndexSink::new(&config.index, timeout)),
        DispatcherKind::Rest => AnySink::Rest(RestSink::new(&config.rest, timeout)),
        DispatcherKind::LogForwarder => AnySink::LogForwarder(
            LogForwarderSink::new(&config.log_forwarder, timeout)
                .map_err(|e| DispatcherError::sink_creation("log_forwarder", e.to_string()))?,
        ),
        DispatcherKind::Noop => AnySink::Noop(NoopSink::new()),
        DispatcherKind::Memory => AnySink::Memory(MemorySink::new()),
    };
    Ok(sink)
}

/// Convenience function to create a dispatcher from configuration
pub fn create_dispatcher(config: &MetricsConfig) -> Result<MetricsDispatcher<AnySink>, DispatcherError> {
    MetricsDispatcher::new(create_sink(config)?, config)
}
