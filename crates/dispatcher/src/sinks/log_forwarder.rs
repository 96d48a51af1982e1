//! LogForwarderSink - ships completed builds to a log aggregator
//!
//! Only build records that carry at least one event are submitted. Delivery
//! errors are kept for the receipt instead of failing the dispatcher, so a
//! flaky aggregator never disturbs the measured build.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use contracts::{ContractError, LogForwarderConfig, LogForwarderInput, MetricsSink, BUILD_TYPE};

use super::http::{self, ClientSlot};

#[derive(Debug)]
pub struct LogForwarderSink {
    name: String,
    uri: String,
    build_id: String,
    config: LogForwarderConfig,
    client: ClientSlot,
    last_error: Mutex<Option<String>>,
}

impl LogForwarderSink {
    pub fn new(config: &LogForwarderConfig, request_timeout: Duration) -> Result<Self, ContractError> {
        let uri = config.uri.clone().ok_or_else(|| {
            ContractError::config_validation("log_forwarder.uri", "required for the log forwarder")
        })?;
        let name = "log_forwarder".to_string();
        Ok(Self {
            client: ClientSlot::new(&name, request_timeout),
            name,
            uri,
            build_id: Uuid::new_v4().to_string(),
            config: config.clone(),
            last_error: Mutex::new(None),
        })
    }

    pub fn build_id(&self) -> &str {
        &self.build_id
    }

    /// Last delivery error, cleared by the next successful post
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_last_error(&self, error: Option<String>) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = error;
    }

    fn envelope(&self, build: Value) -> Value {
        let body = json!({ "buildId": self.build_id, "buildInfo": build });
        match self.config.input_type {
            LogForwarderInput::HttpCollector => json!({ "event": body }),
            LogForwarderInput::Forwarder => body,
        }
    }

    async fn post(&self, body: &Value) -> Result<(), ContractError> {
        let client = self.client.get()?;
        let request = http::with_headers(client.post(&self.uri), &self.config.headers)
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_string());
        http::send(&self.name, request).await?;
        Ok(())
    }
}

fn has_events(build: &Value) -> bool {
    build
        .get("events")
        .and_then(Value::as_array)
        .is_some_and(|events| !events.is_empty())
}

impl MetricsSink for LogForwarderSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn collection(&self) -> &str {
        &self.config.event_name
    }

    fn log_collection(&self) -> String {
        self.config.event_name.clone()
    }

    async fn start_up_client(&self) -> Result<(), ContractError> {
        self.client.start()?;
        debug!(sink = %self.name, uri = %self.uri, "Log forwarder client started");
        Ok(())
    }

    async fn shut_down_client(&self) -> Result<(), ContractError> {
        self.client.shut_down();
        Ok(())
    }

    async fn ensure_collection_exists(&self, _name: &str) -> Result<(), ContractError> {
        Ok(())
    }

    #[instrument(name = "log_forwarder_index", skip(self, payload), fields(sink = %self.name))]
    async fn index(
        &self,
        _collection: &str,
        doc_type: &str,
        payload: &str,
        _id: Option<&str>,
    ) -> Result<String, ContractError> {
        if doc_type != BUILD_TYPE {
            return Ok(self.build_id.clone());
        }
        let build: Value = serde_json::from_str(payload)?;
        if !has_events(&build) {
            debug!(sink = %self.name, "Build has no events yet, not forwarding");
            return Ok(self.build_id.clone());
        }

        match self.post(&self.envelope(build)).await {
            Ok(()) => self.set_last_error(None),
            Err(e) => {
                warn!(sink = %self.name, error = %e, "Could not forward build metrics");
                self.set_last_error(Some(e.to_string()));
            }
        }
        Ok(self.build_id.clone())
    }

    async fn bulk_index(
        &self,
        _collection: &str,
        _doc_type: &str,
        payloads: &[String],
    ) -> Result<(), ContractError> {
        debug!(sink = %self.name, count = payloads.len(), "Log forwarder accepts build records only");
        Ok(())
    }

    fn receipt(&self, build_id: &str) -> Option<String> {
        Some(match self.last_error() {
            Some(error) => format!("Could not post metrics: {error}"),
            None => format!("Metrics have been posted to {} (buildId: {})", self.uri, build_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::http::test_server::TestServer;

    fn sink_for(server: &TestServer, input_type: LogForwarderInput) -> LogForwarderSink {
        let config = LogForwarderConfig {
            uri: Some(format!("{}/services/collector", server.base_uri)),
            input_type,
            ..LogForwarderConfig::default()
        };
        LogForwarderSink::new(&config, Duration::from_secs(5)).unwrap()
    }

    const WITH_EVENTS: &str = r#"{"result":{"status":"success"},"events":[{"description":"compile"}]}"#;

    #[tokio::test]
    async fn test_http_collector_envelope() {
        let server = TestServer::spawn(|_| (200, String::new())).await;
        let sink = sink_for(&server, LogForwarderInput::HttpCollector);
        sink.start_up_client().await.unwrap();

        let id = sink.index("build_metrics", BUILD_TYPE, WITH_EVENTS, None).await.unwrap();

        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        let body = requests[0].json();
        assert_eq!(body["event"]["buildId"], id.as_str());
        assert_eq!(body["event"]["buildInfo"]["events"][0]["description"], "compile");
    }

    #[tokio::test]
    async fn test_forwarder_envelope() {
        let server = TestServer::spawn(|_| (200, String::new())).await;
        let sink = sink_for(&server, LogForwarderInput::Forwarder);
        sink.start_up_client().await.unwrap();

        sink.index("build_metrics", BUILD_TYPE, WITH_EVENTS, None).await.unwrap();

        let body = server.requests()[0].json();
        assert!(body.get("event").is_none());
        assert_eq!(body["buildId"], sink.build_id());
    }

    #[tokio::test]
    async fn test_builds_without_events_are_skipped() {
        let server = TestServer::spawn(|_| (200, String::new())).await;
        let sink = sink_for(&server, LogForwarderInput::HttpCollector);
        sink.start_up_client().await.unwrap();

        sink.index("build_metrics", BUILD_TYPE, r#"{"events":[]}"#, None).await.unwrap();
        sink.index("build_metrics", "log", WITH_EVENTS, None).await.unwrap();
        sink.bulk_index("build_metrics", "log", &["{}".to_string()]).await.unwrap();

        assert!(server.requests().is_empty());
    }

    #[tokio::test]
    async fn test_delivery_error_lands_in_receipt() {
        let server = TestServer::spawn(|_| (403, "invalid token".to_string())).await;
        let sink = sink_for(&server, LogForwarderInput::HttpCollector);
        sink.start_up_client().await.unwrap();

        let id = sink.index("build_metrics", BUILD_TYPE, WITH_EVENTS, None).await.unwrap();

        let receipt = sink.receipt(&id).unwrap();
        assert!(receipt.starts_with("Could not post metrics:"), "{receipt}");
        assert!(receipt.contains("403"));
    }

    #[test]
    fn test_missing_uri_is_rejected() {
        let result = LogForwarderSink::new(&LogForwarderConfig::default(), Duration::from_secs(1));
        assert!(matches!(result, Err(ContractError::ConfigValidation { .. })));
    }
}
