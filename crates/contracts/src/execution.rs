//! Value types recorded into a build: project identity, events, task and
//! test executions, outcomes and forwarded log lines.

use serde::{Deserialize, Serialize};

/// Identity of the project being built
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub version: String,
}

impl Project {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Timed build phase (configuration, dependency resolution, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub description: String,
    /// Category of the event, serialized as `type`
    #[serde(rename = "type")]
    pub category: String,
    pub elapsed_time: u64,
}

impl Event {
    pub fn new(description: impl Into<String>, category: impl Into<String>, elapsed_time: u64) -> Self {
        Self {
            description: description.into(),
            category: category.into(),
            elapsed_time,
        }
    }
}

/// Outcome status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    #[default]
    Unknown,
    Success,
    Failure,
    Skipped,
}

/// Outcome of a build, task or test
///
/// Only failures carry rendered error chains.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BuildResult {
    pub status: ResultStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failures: Option<Vec<String>>,
}

impl BuildResult {
    pub fn unknown() -> Self {
        Self::with_status(ResultStatus::Unknown)
    }

    pub fn success() -> Self {
        Self::with_status(ResultStatus::Success)
    }

    pub fn skipped() -> Self {
        Self::with_status(ResultStatus::Skipped)
    }

    /// Failure caused by a single error, rendered with its source chain
    pub fn failure(error: &(dyn std::error::Error + 'static)) -> Self {
        Self::failures([render_error_chain(error)])
    }

    /// Failure from already rendered traces
    pub fn failures<I, S>(rendered: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            status: ResultStatus::Failure,
            failures: Some(rendered.into_iter().map(Into::into).collect()),
        }
    }

    fn with_status(status: ResultStatus) -> Self {
        Self {
            status,
            failures: None,
        }
    }
}

/// Render an error and every `source()` below it, one cause per line
pub fn render_error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        rendered.push_str("\nCaused by: ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

/// Execution of a single task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskExecution {
    pub description: String,
    pub result: BuildResult,
    #[serde(with = "crate::build::rfc3339_millis")]
    pub start_time: i64,
    pub elapsed_time: u64,
}

impl TaskExecution {
    pub fn new(
        description: impl Into<String>,
        result: BuildResult,
        start_time: i64,
        elapsed_time: u64,
    ) -> Self {
        Self {
            description: description.into(),
            result,
            start_time,
            elapsed_time,
        }
    }
}

/// Execution of a single test case
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestExecution {
    pub name: String,
    pub class_name: String,
    pub suite: String,
    pub result: BuildResult,
    #[serde(with = "crate::build::rfc3339_millis")]
    pub start_time: i64,
    pub elapsed_time: u64,
}

/// Severity of a forwarded log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

/// Log line captured from the measured process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    #[serde(rename = "@timestamp", with = "crate::build::rfc3339_millis")]
    pub timestamp: i64,
    pub level: LogLevel,
    pub message: String,
}

impl LogEvent {
    pub fn new(timestamp: i64, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp,
            level,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug)]
    struct Outer(Inner);

    #[derive(Debug)]
    struct Inner;

    impl fmt::Display for Outer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "compilation failed")
        }
    }

    impl fmt::Display for Inner {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "missing symbol")
        }
    }

    impl std::error::Error for Outer {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(&self.0)
        }
    }

    impl std::error::Error for Inner {}

    #[test]
    fn test_failure_renders_source_chain() {
        let result = BuildResult::failure(&Outer(Inner));
        assert_eq!(result.status, ResultStatus::Failure);
        assert_eq!(
            result.failures.unwrap(),
            vec!["compilation failed\nCaused by: missing symbol".to_string()]
        );
    }

    #[test]
    fn test_success_has_no_failures() {
        let json = serde_json::to_value(BuildResult::success()).unwrap();
        assert_eq!(json, serde_json::json!({ "status": "success" }));
    }

    #[test]
    fn test_event_serializes_category_as_type() {
        let json = serde_json::to_value(Event::new("compile", "configure", 120)).unwrap();
        assert_eq!(json["type"], "configure");
        assert_eq!(json["elapsedTime"], 120);
    }

    #[test]
    fn test_task_start_time_is_rfc3339() {
        let task = TaskExecution::new(":compile", BuildResult::success(), 0, 5);
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["startTime"], "1970-01-01T00:00:00.000Z");
    }
}
