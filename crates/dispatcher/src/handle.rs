//! DispatcherHandle - late-binding collector
//!
//! Host glue gets a handle before configuration has been read. Until
//! [`DispatcherHandle::configure`] binds a real dispatcher, every call goes to
//! [`UnconfiguredDispatcher`] and fails with `NotConfigured`.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde_json::Value;
use tracing::info;

use contracts::{
    BuildResult, Info, LogEvent, MetricsSink, Project, TaskExecution, TestExecution,
};

use crate::collector::{MetricsCollector, UnconfiguredDispatcher};
use crate::dispatcher::MetricsDispatcher;
use crate::error::DispatcherError;
use crate::service::ServiceState;
use crate::sinks::AnySink;

/// Shared handle; clones observe the same binding
pub struct DispatcherHandle<S: MetricsSink + Sync + 'static = AnySink> {
    binding: Arc<RwLock<Option<Arc<MetricsDispatcher<S>>>>>,
}

impl<S: MetricsSink + Sync + 'static> Clone for DispatcherHandle<S> {
    fn clone(&self) -> Self {
        Self {
            binding: Arc::clone(&self.binding),
        }
    }
}

impl<S: MetricsSink + Sync + 'static> Default for DispatcherHandle<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: MetricsSink + Sync + 'static> DispatcherHandle<S> {
    pub fn new() -> Self {
        Self {
            binding: Arc::new(RwLock::new(None)),
        }
    }

    /// Bind the real dispatcher; allowed once
    pub fn configure(
        &self,
        dispatcher: MetricsDispatcher<S>,
    ) -> Result<Arc<MetricsDispatcher<S>>, DispatcherError> {
        let mut binding = self.binding.write().unwrap_or_else(PoisonError::into_inner);
        if binding.is_some() {
            return Err(DispatcherError::AlreadyConfigured);
        }
        let dispatcher = Arc::new(dispatcher);
        info!(sink = %dispatcher.sink().name(), "Metrics dispatcher configured");
        *binding = Some(Arc::clone(&dispatcher));
        Ok(dispatcher)
    }

    pub fn is_configured(&self) -> bool {
        self.binding
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// The bound dispatcher, if any
    pub fn dispatcher(&self) -> Option<Arc<MetricsDispatcher<S>>> {
        self.binding
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

macro_rules! delegate {
    ($self:ident, $collector:ident => $call:expr) => {
        match $self.dispatcher() {
            Some($collector) => $call,
            None => {
                let $collector = UnconfiguredDispatcher;
                $call
            }
        }
    };
}

impl<S: MetricsSink + Sync + 'static> MetricsCollector for DispatcherHandle<S> {
    async fn start(&self) -> Result<(), DispatcherError> {
        delegate!(self, c => c.start().await)
    }

    async fn await_running(&self, timeout: Duration) -> Result<(), DispatcherError> {
        delegate!(self, c => c.await_running(timeout).await)
    }

    async fn stop(&self) -> Result<(), DispatcherError> {
        delegate!(self, c => c.stop().await)
    }

    async fn await_terminated(&self, timeout: Duration) -> Result<(), DispatcherError> {
        delegate!(self, c => c.await_terminated(timeout).await)
    }

    fn state(&self) -> ServiceState {
        delegate!(self, c => c.state())
    }

    fn is_running(&self) -> bool {
        delegate!(self, c => c.is_running())
    }

    fn has_failed(&self) -> bool {
        delegate!(self, c => c.has_failed())
    }

    async fn started(&self, project: Project) -> Result<(), DispatcherError> {
        delegate!(self, c => c.started(project).await)
    }

    async fn duration(&self, start_time: i64, elapsed_time: u64) -> Result<(), DispatcherError> {
        delegate!(self, c => c.duration(start_time, elapsed_time).await)
    }

    async fn environment(&self, info: Info) -> Result<(), DispatcherError> {
        delegate!(self, c => c.environment(info).await)
    }

    async fn result(&self, result: BuildResult) -> Result<(), DispatcherError> {
        delegate!(self, c => c.result(result).await)
    }

    async fn event(
        &self,
        description: &str,
        category: &str,
        elapsed_time: u64,
    ) -> Result<(), DispatcherError> {
        delegate!(self, c => c.event(description, category, elapsed_time).await)
    }

    async fn task(&self, task: TaskExecution) -> Result<(), DispatcherError> {
        delegate!(self, c => c.task(task).await)
    }

    async fn test(&self, test: TestExecution) -> Result<(), DispatcherError> {
        delegate!(self, c => c.test(test).await)
    }

    async fn report(&self, name: &str, report: Value) -> Result<(), DispatcherError> {
        delegate!(self, c => c.report(name, report).await)
    }

    async fn log_events(&self, events: Vec<LogEvent>) -> Result<(), DispatcherError> {
        delegate!(self, c => c.log_events(events).await)
    }

    fn receipt(&self) -> Option<String> {
        delegate!(self, c => c.receipt())
    }
}

impl<S: MetricsSink + Sync + 'static> fmt::Debug for DispatcherHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatcherHandle")
            .field("dispatcher", &self.dispatcher())
            .finish()
    }
}
