//! # Integration Tests
//!
//! End-to-end scenarios across crates.
//!
//! Covers:
//! - Contract snapshot checks
//! - Configuration to dispatcher to sink, without a network backend
//! - Failure policy and redaction as seen from a loaded configuration

#[cfg(test)]
mod contract_tests {
    use contracts::{Build, BuildResult, Event, Project};

    #[test]
    fn test_contracts_compile() {
        let _ = contracts::ConfigVersion::V1;
    }

    #[test]
    fn test_build_wire_shape() {
        let mut build = Build::new();
        build.set_project(Project::new("demo", "1.0"));
        build.add_event(Event::new("compile", "configure", 40));
        build.add_event(Event::new("link", "configure", 2));
        build.set_result(BuildResult::success());

        let json = serde_json::to_value(build.snapshot()).unwrap();
        assert_eq!(json["project"]["name"], "demo");
        assert_eq!(json["eventsCount"], 2);
        assert_eq!(json["eventsElapsedTime"], 42);
        assert_eq!(json["result"]["status"], "success");
        assert!(json.get("buildId").is_none());
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::time::Duration;

    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{
        BuildResult, Info, KeyValue, LogEvent, LogLevel, MetricsConfig, Project, TaskExecution,
        Tool, REDACTION_MARKER,
    };
    use dispatcher::{
        create_dispatcher, AnySink, DispatcherError, DispatcherHandle, MemorySink, MetricsCollector,
        MetricsDispatcher, ServiceState,
    };

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn load(toml: &str) -> MetricsConfig {
        ConfigLoader::load_from_str(toml, ConfigFormat::Toml).unwrap()
    }

    fn memory_sink(dispatcher: &MetricsDispatcher<AnySink>) -> MemorySink {
        match dispatcher.sink() {
            AnySink::Memory(sink) => sink.clone(),
            other => panic!("expected memory sink, got {other:?}"),
        }
    }

    fn info_with_secrets() -> Info {
        Info {
            build: Tool::new("cargo"),
            scm: Tool::unknown(),
            ci: Tool::unknown(),
            environment_variables: vec![
                KeyValue::new("PATH", "/usr/bin"),
                KeyValue::new("AWS_SECRET_ACCESS_KEY", "hunter2"),
                KeyValue::new("NPM_TOKEN", "npm_abc"),
            ],
            system_properties: vec![KeyValue::new("os.name", "linux")],
        }
    }

    /// Configuration -> dispatcher -> memory sink, through the collector surface
    #[tokio::test]
    async fn test_e2e_config_to_memory_sink() {
        let config = load(
            r#"
            dispatcher = "memory"
            shutdown_timeout_secs = 5
            "#,
        );
        let dispatcher = create_dispatcher(&config).unwrap();
        let sink = memory_sink(&dispatcher);

        dispatcher.start().await.unwrap();
        dispatcher.await_running(TIMEOUT).await.unwrap();
        dispatcher.started(Project::new("demo", "2.1.0")).await.unwrap();
        dispatcher
            .task(TaskExecution::new("compileJava", BuildResult::success(), 1_000, 350))
            .await
            .unwrap();
        dispatcher
            .log_events(vec![LogEvent::new(1_100, LogLevel::Info, "BUILD SUCCESSFUL")])
            .await
            .unwrap();
        dispatcher.duration(1_000, 900).await.unwrap();
        dispatcher.result(BuildResult::success()).await.unwrap();
        dispatcher.shutdown().await.unwrap();

        assert_eq!(dispatcher.state(), ServiceState::Terminated);
        assert_eq!(sink.record_count(), 1);

        let record = &sink.records()[0];
        let doc = record.json();
        assert_eq!(Some(record.id.clone()), dispatcher.build_id());
        assert_eq!(doc["project"]["version"], "2.1.0");
        assert_eq!(doc["taskCount"], 1);
        assert_eq!(doc["elapsedTime"], 900);
        assert_eq!(doc["result"]["status"], "success");

        let logs = sink.log_records();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].json()["buildId"], record.id.as_str());
        assert!(dispatcher.receipt().unwrap().contains(&record.id));
    }

    #[tokio::test]
    async fn test_e2e_redaction_from_config() {
        let config = load(
            r#"
            dispatcher = "memory"
            synchronous = true
            sanitized_properties = ["AWS_SECRET_ACCESS_KEY"]
            sanitized_properties_regex = ".*_TOKEN"
            "#,
        );
        let dispatcher = create_dispatcher(&config).unwrap();
        let sink = memory_sink(&dispatcher);

        dispatcher.start().await.unwrap();
        dispatcher.environment(info_with_secrets()).await.unwrap();

        // synchronous mode: already delivered before shutdown
        let doc = sink.records()[0].json();
        let vars = doc["info"]["environmentVariables"].as_array().unwrap().clone();
        dispatcher.shutdown().await.unwrap();

        let value_of = |key: &str| {
            vars.iter()
                .find(|kv| kv["key"] == key)
                .map(|kv| kv["value"].clone())
                .unwrap()
        };
        assert_eq!(value_of("PATH"), "/usr/bin");
        assert_eq!(value_of("AWS_SECRET_ACCESS_KEY"), REDACTION_MARKER);
        assert_eq!(value_of("NPM_TOKEN"), REDACTION_MARKER);
        assert!(!doc.to_string().contains("hunter2"));
    }

    #[tokio::test]
    async fn test_e2e_strict_failure_stops_delivery() {
        let config = load("verbose_error_output = true\nsynchronous = true\n");
        // start-up write succeeds, the next one fails
        let sink = MemorySink::failing_on([2]);
        let dispatcher = MetricsDispatcher::new(sink.clone(), &config).unwrap();

        dispatcher.start().await.unwrap();
        let result = dispatcher.event("compile", "configure", 10).await;
        assert!(result.is_err());
        assert!(dispatcher.has_failed());

        dispatcher.event("test", "configure", 10).await.ok();
        assert_eq!(sink.index_calls(), 2);
        assert_eq!(dispatcher.state(), ServiceState::Failed);
    }

    #[tokio::test]
    async fn test_e2e_lenient_failure_keeps_going() {
        let config = load("fail_on_error = false\nsynchronous = true\n");
        let sink = MemorySink::failing_on([2]);
        let dispatcher = MetricsDispatcher::new(sink.clone(), &config).unwrap();

        dispatcher.start().await.unwrap();
        dispatcher.event("compile", "configure", 10).await.unwrap();
        dispatcher.event("test", "configure", 20).await.unwrap();
        dispatcher.shutdown().await.unwrap();

        assert!(!dispatcher.has_failed());
        assert_eq!(dispatcher.metrics().failure_count, 1);
        let doc = sink.records()[0].json();
        assert_eq!(doc["events"].as_array().unwrap().len(), 2);
        assert_eq!(doc["eventsElapsedTime"], 30);
    }

    /// Handle handed out before configuration, bound afterwards
    #[tokio::test]
    async fn test_e2e_two_phase_handle() {
        let handle: DispatcherHandle = DispatcherHandle::new();
        let early = handle.clone();
        assert!(matches!(
            early.started(Project::new("demo", "1.0")).await,
            Err(DispatcherError::NotConfigured)
        ));

        let config = load("dispatcher = \"memory\"\n");
        let bound = handle.configure(create_dispatcher(&config).unwrap()).unwrap();
        let sink = memory_sink(&bound);

        early.start().await.unwrap();
        early.started(Project::new("demo", "1.0")).await.unwrap();
        early.result(BuildResult::skipped()).await.unwrap();
        early.stop().await.unwrap();
        early.await_terminated(TIMEOUT).await.unwrap();

        assert_eq!(handle.state(), ServiceState::Terminated);
        assert_eq!(sink.records()[0].json()["result"]["status"], "skipped");
        assert!(handle.configure(create_dispatcher(&config).unwrap()).is_err());
    }

    #[tokio::test]
    async fn test_e2e_noop_dispatcher_has_no_receipt() {
        let config = load("dispatcher = \"noop\"\n");
        let dispatcher = create_dispatcher(&config).unwrap();
        dispatcher.start().await.unwrap();
        dispatcher.started(Project::new("demo", "1.0")).await.unwrap();
        dispatcher.shutdown().await.unwrap();

        assert_eq!(dispatcher.state(), ServiceState::Terminated);
        assert!(dispatcher.receipt().is_none());
    }

    #[test]
    fn test_log_forwarder_without_uri_cannot_be_created() {
        let config = MetricsConfig {
            dispatcher: contracts::DispatcherKind::LogForwarder,
            ..MetricsConfig::default()
        };
        assert!(create_dispatcher(&config).is_err());
    }
}

#[cfg(test)]
mod observability_tests {
    use observability::RunningStats;

    #[test]
    fn test_latency_summary_baseline() {
        let mut stats = RunningStats::default();
        for value in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            stats.push(value);
        }
        let summary = stats.summary();
        assert_eq!(summary.count, 8);
        assert!((summary.mean - 5.0).abs() < 1e-9);
        assert_eq!(summary.min, 2.0);
        assert_eq!(summary.max, 9.0);
    }
}
