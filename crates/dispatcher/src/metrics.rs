//! Service metrics for observability

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use observability::{RunningStats, StatsSummary};

/// Metrics of a single queued execution service
#[derive(Debug, Default)]
pub struct ServiceMetrics {
    /// Current queue length
    queue_len: AtomicUsize,
    /// Actions accepted into the queue
    queued_count: AtomicU64,
    /// Actions executed without error
    executed_count: AtomicU64,
    /// Actions that returned an error
    failure_count: AtomicU64,
    /// Actions never executed (state gate or cleared queue)
    dropped_count: AtomicU64,
    /// Execution time of successful actions, milliseconds
    latency_ms: Mutex<RunningStats>,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_len(&self) -> usize {
        self.queue_len.load(Ordering::Relaxed)
    }

    pub fn set_queue_len(&self, len: usize) {
        self.queue_len.store(len, Ordering::Relaxed);
    }

    pub fn queued_count(&self) -> u64 {
        self.queued_count.load(Ordering::Relaxed)
    }

    pub fn inc_queued_count(&self) {
        self.queued_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn executed_count(&self) -> u64 {
        self.executed_count.load(Ordering::Relaxed)
    }

    /// Count a successful execution and its duration
    pub fn record_executed(&self, elapsed_ms: f64) {
        self.executed_count.fetch_add(1, Ordering::Relaxed);
        self.latency_ms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(elapsed_ms);
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }

    pub fn inc_failure_count(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }

    pub fn add_dropped_count(&self, count: usize) {
        self.dropped_count.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queue_len: self.queue_len(),
            queued_count: self.queued_count(),
            executed_count: self.executed_count(),
            failure_count: self.failure_count(),
            dropped_count: self.dropped_count(),
            latency_ms: self
                .latency_ms
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .summary(),
        }
    }
}

/// Snapshot of service metrics (for reporting)
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub queue_len: usize,
    pub queued_count: u64,
    pub executed_count: u64,
    pub failure_count: u64,
    pub dropped_count: u64,
    pub latency_ms: StatsSummary,
}
