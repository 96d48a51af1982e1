//! # Dispatcher
//!
//! Build metrics dispatch.
//!
//! Responsibilities:
//! - Own one `Build` and apply collector calls to it
//! - Index snapshots through a single background worker, in order
//! - Redact sensitive properties before anything reaches a sink
//! - Deliver through one of the built-in sinks

pub mod collector;
pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod metrics;
pub mod sanitize;
pub mod service;
pub mod sinks;

pub use contracts::{MetricsConfig, MetricsSink};
pub use collector::{MetricsCollector, UnconfiguredDispatcher};
pub use dispatcher::{create_dispatcher, create_sink, DispatchAction, DispatchCore, MetricsDispatcher};
pub use error::DispatcherError;
pub use handle::DispatcherHandle;
pub use metrics::{MetricsSnapshot, ServiceMetrics};
pub use sanitize::Sanitizer;
pub use service::{
    ExecutionMode, FailurePolicy, QueuedExecutionService, ServiceHooks, ServiceState,
    POLL_INTERVAL,
};
pub use sinks::{
    AnySink, IndexSink, LogForwarderSink, MemorySink, NoopSink, RestSink, StoredDocument,
};
