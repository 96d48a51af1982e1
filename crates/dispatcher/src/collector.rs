//! MetricsCollector - the surface host glue talks to
//!
//! Implemented by [`MetricsDispatcher`], by the [`UnconfiguredDispatcher`]
//! placeholder used before configuration is known, and by
//! [`DispatcherHandle`](crate::DispatcherHandle) which switches from the
//! placeholder to a real dispatcher once.

use std::time::Duration;

use serde_json::Value;

use contracts::{
    BuildResult, Info, LogEvent, MetricsSink, Project, TaskExecution, TestExecution,
};

use crate::dispatcher::MetricsDispatcher;
use crate::error::DispatcherError;
use crate::service::ServiceState;

#[trait_variant::make(MetricsCollector: Send)]
pub trait LocalMetricsCollector {
    async fn start(&self) -> Result<(), DispatcherError>;

    async fn await_running(&self, timeout: Duration) -> Result<(), DispatcherError>;

    async fn stop(&self) -> Result<(), DispatcherError>;

    async fn await_terminated(&self, timeout: Duration) -> Result<(), DispatcherError>;

    fn state(&self) -> ServiceState;

    fn is_running(&self) -> bool;

    fn has_failed(&self) -> bool;

    async fn started(&self, project: Project) -> Result<(), DispatcherError>;

    async fn duration(&self, start_time: i64, elapsed_time: u64) -> Result<(), DispatcherError>;

    async fn environment(&self, info: Info) -> Result<(), DispatcherError>;

    async fn result(&self, result: BuildResult) -> Result<(), DispatcherError>;

    async fn event(
        &self,
        description: &str,
        category: &str,
        elapsed_time: u64,
    ) -> Result<(), DispatcherError>;

    async fn task(&self, task: TaskExecution) -> Result<(), DispatcherError>;

    async fn test(&self, test: TestExecution) -> Result<(), DispatcherError>;

    async fn report(&self, name: &str, report: Value) -> Result<(), DispatcherError>;

    async fn log_events(&self, events: Vec<LogEvent>) -> Result<(), DispatcherError>;

    fn receipt(&self) -> Option<String>;
}

impl<S: MetricsSink + Sync + 'static> MetricsCollector for MetricsDispatcher<S> {
    async fn start(&self) -> Result<(), DispatcherError> {
        MetricsDispatcher::start(self).await
    }

    async fn await_running(&self, timeout: Duration) -> Result<(), DispatcherError> {
        MetricsDispatcher::await_running(self, timeout).await
    }

    async fn stop(&self) -> Result<(), DispatcherError> {
        MetricsDispatcher::stop(self).await
    }

    async fn await_terminated(&self, timeout: Duration) -> Result<(), DispatcherError> {
        MetricsDispatcher::await_terminated(self, timeout).await
    }

    fn state(&self) -> ServiceState {
        MetricsDispatcher::state(self)
    }

    fn is_running(&self) -> bool {
        MetricsDispatcher::is_running(self)
    }

    fn has_failed(&self) -> bool {
        MetricsDispatcher::has_failed(self)
    }

    async fn started(&self, project: Project) -> Result<(), DispatcherError> {
        MetricsDispatcher::started(self, project).await
    }

    async fn duration(&self, start_time: i64, elapsed_time: u64) -> Result<(), DispatcherError> {
        MetricsDispatcher::duration(self, start_time, elapsed_time).await
    }

    async fn environment(&self, info: Info) -> Result<(), DispatcherError> {
        MetricsDispatcher::environment(self, info).await
    }

    async fn result(&self, result: BuildResult) -> Result<(), DispatcherError> {
        MetricsDispatcher::result(self, result).await
    }

    async fn event(
        &self,
        description: &str,
        category: &str,
        elapsed_time: u64,
    ) -> Result<(), DispatcherError> {
        MetricsDispatcher::event(self, description, category, elapsed_time).await
    }

    async fn task(&self, task: TaskExecution) -> Result<(), DispatcherError> {
        MetricsDispatcher::task(self, task).await
    }

    async fn test(&self, test: TestExecution) -> Result<(), DispatcherError> {
        MetricsDispatcher::test(self, test).await
    }

    async fn report(&self, name: &str, report: Value) -> Result<(), DispatcherError> {
        MetricsDispatcher::report(self, name, report).await
    }

    async fn log_events(&self, events: Vec<LogEvent>) -> Result<(), DispatcherError> {
        MetricsDispatcher::log_events(self, events).await
    }

    fn receipt(&self) -> Option<String> {
        MetricsDispatcher::receipt(self)
    }
}

/// Placeholder that rejects every operation
///
/// Stands in for the dispatcher until configuration has been read, so that
/// calls made too early fail loudly instead of being lost.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredDispatcher;

impl MetricsCollector for UnconfiguredDispatcher {
    async fn start(&self) -> Result<(), DispatcherError> {
        Err(DispatcherError::NotConfigured)
    }

    async fn await_running(&self, _timeout: Duration) -> Result<(), DispatcherError> {
        Err(DispatcherError::NotConfigured)
    }

    async fn stop(&self) -> Result<(), DispatcherError> {
        Err(DispatcherError::NotConfigured)
    }

    async fn await_terminated(&self, _timeout: Duration) -> Result<(), DispatcherError> {
        Err(DispatcherError::NotConfigured)
    }

    fn state(&self) -> ServiceState {
        ServiceState::New
    }

    fn is_running(&self) -> bool {
        false
    }

    fn has_failed(&self) -> bool {
        false
    }

    async fn started(&self, _project: Project) -> Result<(), DispatcherError> {
        Err(DispatcherError::NotConfigured)
    }

    async fn duration(&self, _start_time: i64, _elapsed_time: u64) -> Result<(), DispatcherError> {
        Err(DispatcherError::NotConfigured)
    }

    async fn environment(&self, _info: Info) -> Result<(), DispatcherError> {
        Err(DispatcherError::NotConfigured)
    }

    async fn result(&self, _result: BuildResult) -> Result<(), DispatcherError> {
        Err(DispatcherError::NotConfigured)
    }

    async fn event(
        &self,
        _description: &str,
        _category: &str,
        _elapsed_time: u64,
    ) -> Result<(), DispatcherError> {
        Err(DispatcherError::NotConfigured)
    }

    async fn task(&self, _task: TaskExecution) -> Result<(), DispatcherError> {
        Err(DispatcherError::NotConfigured)
    }

    async fn test(&self, _test: TestExecution) -> Result<(), DispatcherError> {
        Err(DispatcherError::NotConfigured)
    }

    async fn report(&self, _name: &str, _report: Value) -> Result<(), DispatcherError> {
        Err(DispatcherError::NotConfigured)
    }

    async fn log_events(&self, _events: Vec<LogEvent>) -> Result<(), DispatcherError> {
        Err(DispatcherError::NotConfigured)
    }

    fn receipt(&self) -> Option<String> {
        None
    }
}
