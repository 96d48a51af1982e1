//! Build - the aggregate of one build's metrics
//!
//! Pure data container: collections are append-only, the build id and a
//! final result are set once. It performs no I/O and knows nothing about
//! any backend format beyond its serde shape.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::{BuildResult, Event, Info, Project, ResultStatus, TaskExecution, TestExecution};

/// Top-level keys of the serialized build; reports cannot use these names
pub const RESERVED_REPORT_NAMES: &[&str] = &[
    "buildId",
    "project",
    "startTime",
    "finishedTime",
    "elapsedTime",
    "result",
    "events",
    "eventsCount",
    "eventsElapsedTime",
    "tasks",
    "taskCount",
    "tasksElapsedTime",
    "tests",
    "testCount",
    "testElapsedTime",
    "info",
];

/// Metrics of a single build
#[derive(Debug, Clone, Default)]
pub struct Build {
    build_id: Option<String>,
    project: Option<Project>,
    start_time: i64,
    elapsed_time: u64,
    result: BuildResult,
    events: Vec<Event>,
    tasks: Vec<TaskExecution>,
    tests: Vec<TestExecution>,
    info: Option<Info>,
    reports: BTreeMap<String, Value>,
}

impl Build {
    /// Create an empty build with an unknown result
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build_id(&self) -> Option<&str> {
        self.build_id.as_deref()
    }

    /// Assign the build id if none has been assigned yet
    ///
    /// Returns `true` when `id` became the build id.
    pub fn assign_build_id(&mut self, id: impl Into<String>) -> bool {
        if self.build_id.is_some() {
            return false;
        }
        self.build_id = Some(id.into());
        true
    }

    pub fn project(&self) -> Option<&Project> {
        self.project.as_ref()
    }

    pub fn set_project(&mut self, project: Project) {
        self.project = Some(project);
    }

    /// Build start, epoch milliseconds
    pub fn start_time(&self) -> i64 {
        self.start_time
    }

    pub fn set_start_time(&mut self, start_time: i64) {
        self.start_time = start_time;
    }

    pub fn elapsed_time(&self) -> u64 {
        self.elapsed_time
    }

    pub fn set_elapsed_time(&mut self, elapsed_time: u64) {
        self.elapsed_time = elapsed_time;
    }

    pub fn finished_time(&self) -> i64 {
        self.start_time
            .saturating_add(i64::try_from(self.elapsed_time).unwrap_or(i64::MAX))
    }

    pub fn result(&self) -> &BuildResult {
        &self.result
    }

    /// Record the build outcome
    ///
    /// Once a status other than `Unknown` is recorded it is final and later
    /// calls are ignored. Returns `true` if the result was applied.
    pub fn set_result(&mut self, result: BuildResult) -> bool {
        if self.result.status != ResultStatus::Unknown {
            return false;
        }
        self.result = result;
        true
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn add_event(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn events_elapsed_time(&self) -> u64 {
        self.events.iter().map(|e| e.elapsed_time).sum()
    }

    pub fn tasks(&self) -> &[TaskExecution] {
        &self.tasks
    }

    pub fn add_task(&mut self, task: TaskExecution) {
        self.tasks.push(task);
    }

    pub fn tasks_elapsed_time(&self) -> u64 {
        self.tasks.iter().map(|t| t.elapsed_time).sum()
    }

    pub fn tests(&self) -> &[TestExecution] {
        &self.tests
    }

    pub fn add_test(&mut self, test: TestExecution) {
        self.tests.push(test);
    }

    pub fn tests_elapsed_time(&self) -> u64 {
        self.tests.iter().map(|t| t.elapsed_time).sum()
    }

    pub fn info(&self) -> Option<&Info> {
        self.info.as_ref()
    }

    pub fn set_info(&mut self, info: Info) {
        self.info = Some(info);
    }

    /// Redact sensitive keys of the environment snapshot in place
    pub fn redact_info(&mut self, is_sensitive: impl Fn(&str) -> bool) -> usize {
        self.info
            .as_mut()
            .map_or(0, |info| info.redact(is_sensitive))
    }

    pub fn reports(&self) -> &BTreeMap<String, Value> {
        &self.reports
    }

    /// Attach a named report; a report with the same name is replaced
    ///
    /// Reports are flattened into the top level of the snapshot, so names in
    /// [`RESERVED_REPORT_NAMES`] are refused and `false` is returned.
    pub fn add_report(&mut self, name: impl Into<String>, report: Value) -> bool {
        let name = name.into();
        if RESERVED_REPORT_NAMES.contains(&name.as_str()) {
            return false;
        }
        self.reports.insert(name, report);
        true
    }

    /// Borrowed, serializable view including derived totals
    pub fn snapshot(&self) -> BuildSnapshot<'_> {
        BuildSnapshot {
            build_id: self.build_id(),
            project: self.project(),
            start_time: self.start_time,
            finished_time: self.finished_time(),
            elapsed_time: self.elapsed_time,
            result: &self.result,
            events: &self.events,
            events_count: self.events.len(),
            events_elapsed_time: self.events_elapsed_time(),
            tasks: &self.tasks,
            task_count: self.tasks.len(),
            tasks_elapsed_time: self.tasks_elapsed_time(),
            tests: &self.tests,
            test_count: self.tests.len(),
            test_elapsed_time: self.tests_elapsed_time(),
            info: self.info(),
            reports: &self.reports,
        }
    }
}

/// Wire shape of a [`Build`]
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildSnapshot<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    build_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    project: Option<&'a Project>,
    #[serde(with = "rfc3339_millis")]
    start_time: i64,
    #[serde(with = "rfc3339_millis")]
    finished_time: i64,
    elapsed_time: u64,
    result: &'a BuildResult,
    events: &'a [Event],
    events_count: usize,
    events_elapsed_time: u64,
    tasks: &'a [TaskExecution],
    task_count: usize,
    tasks_elapsed_time: u64,
    tests: &'a [TestExecution],
    test_count: usize,
    test_elapsed_time: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    info: Option<&'a Info>,
    #[serde(flatten)]
    reports: &'a BTreeMap<String, Value>,
}

/// Epoch milliseconds <-> RFC 3339 strings
pub(crate) mod rfc3339_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{de, ser, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(millis: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        let instant = DateTime::<Utc>::from_timestamp_millis(*millis)
            .ok_or_else(|| ser::Error::custom(format!("timestamp out of range: {millis}")))?;
        serializer.serialize_str(&instant.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|instant| instant.timestamp_millis())
            .map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KeyValue;

    #[test]
    fn test_build_id_is_set_once() {
        let mut build = Build::new();
        assert!(build.assign_build_id("first"));
        assert!(!build.assign_build_id("second"));
        assert_eq!(build.build_id(), Some("first"));
    }

    #[test]
    fn test_final_result_is_not_overwritten() {
        let mut build = Build::new();
        assert!(build.set_result(BuildResult::success()));
        assert!(!build.set_result(BuildResult::skipped()));
        assert_eq!(build.result().status, ResultStatus::Success);
    }

    #[test]
    fn test_snapshot_includes_derived_totals() {
        let mut build = Build::new();
        build.set_project(Project::new("demo", "1.0"));
        build.set_start_time(1_000);
        build.set_elapsed_time(500);
        build.add_event(Event::new("compile", "configure", 120));
        build.add_event(Event::new("resolve", "dependencies", 30));
        build.add_task(TaskExecution::new(":build", BuildResult::success(), 1_000, 400));

        let json = serde_json::to_value(build.snapshot()).unwrap();

        assert_eq!(json["project"]["name"], "demo");
        assert_eq!(json["eventsCount"], 2);
        assert_eq!(json["eventsElapsedTime"], 150);
        assert_eq!(json["taskCount"], 1);
        assert_eq!(json["tasksElapsedTime"], 400);
        assert_eq!(json["testCount"], 0);
        assert_eq!(json["startTime"], "1970-01-01T00:00:01.000Z");
        assert_eq!(json["finishedTime"], "1970-01-01T00:00:01.500Z");
        assert_eq!(json["result"]["status"], "unknown");
        assert!(json.get("buildId").is_none());
    }

    #[test]
    fn test_reports_are_flattened() {
        let mut build = Build::new();
        build.add_report("coverage", serde_json::json!({ "lines": 0.82 }));

        let json = serde_json::to_value(build.snapshot()).unwrap();
        assert_eq!(json["coverage"]["lines"], 0.82);
    }

    #[test]
    fn test_reports_cannot_shadow_build_fields() {
        let mut build = Build::new();
        build.add_event(Event::new("compile", "configure", 3));

        assert!(!build.add_report("events", serde_json::json!({ "bogus": true })));
        assert!(!build.add_report("buildId", serde_json::json!("other")));
        assert!(build.add_report("Events", serde_json::json!([])));
        assert_eq!(build.reports().len(), 1);

        let payload = serde_json::to_string(&build.snapshot()).unwrap();
        assert_eq!(payload.matches("\"events\":").count(), 1);
        let json: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(json["events"][0]["description"], "compile");
        assert!(json.get("buildId").is_none());
    }

    #[test]
    fn test_redact_info_without_info_is_noop() {
        let mut build = Build::new();
        assert_eq!(build.redact_info(|_| true), 0);

        build.set_info(Info {
            environment_variables: vec![KeyValue::new("SECRET", "x")],
            ..Info::default()
        });
        assert_eq!(build.redact_info(|k| k == "SECRET"), 1);
    }
}
