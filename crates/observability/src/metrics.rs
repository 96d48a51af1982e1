//! Dispatch pipeline metrics
//!
//! Counters and gauges for the queued execution service and the sinks behind
//! it, plus an in-memory latency aggregator for run summaries.

use metrics::{counter, gauge, histogram};

/// Record an action accepted into the queue
pub fn record_action_queued(service: &str) {
    counter!(
        "build_metrics_actions_queued_total",
        "service" => service.to_string()
    )
    .increment(1);
}

/// Record an executed action and its duration
///
/// `queued` is false for actions run inline on the caller.
pub fn record_action_executed(service: &str, queued: bool, elapsed_ms: f64) {
    let mode = if queued { "queued" } else { "synchronous" };
    counter!(
        "build_metrics_actions_executed_total",
        "service" => service.to_string(),
        "mode" => mode
    )
    .increment(1);
    histogram!(
        "build_metrics_action_duration_ms",
        "service" => service.to_string()
    )
    .record(elapsed_ms);
}

/// Record an action that returned an error
pub fn record_action_failed(service: &str) {
    counter!(
        "build_metrics_actions_failed_total",
        "service" => service.to_string()
    )
    .increment(1);
}

/// Record actions that were never executed
///
/// `reason` is `"state"` for state-gate drops and `"cleared"` for actions
/// discarded when the queue is cleared after a failure.
pub fn record_actions_dropped(service: &str, reason: &'static str, count: usize) {
    counter!(
        "build_metrics_actions_dropped_total",
        "service" => service.to_string(),
        "reason" => reason
    )
    .increment(count as u64);
}

/// Record the current queue depth
pub fn record_queue_depth(service: &str, depth: usize) {
    gauge!(
        "build_metrics_queue_depth",
        "service" => service.to_string()
    )
    .set(depth as f64);
}

/// Record a build record delivery attempt
pub fn record_build_indexed(sink_name: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "build_metrics_builds_indexed_total",
        "sink" => sink_name.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Record forwarded log lines
pub fn record_log_events_forwarded(sink_name: &str, count: usize) {
    counter!(
        "build_metrics_log_events_forwarded_total",
        "sink" => sink_name.to_string()
    )
    .increment(count as u64);
}

/// Latency summary
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// Online statistics (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// Sample variance
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn summary(&self) -> StatsSummary {
        StatsSummary::from(self)
    }
}
