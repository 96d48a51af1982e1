//! RestSink - posts build records to a generic JSON endpoint

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use tracing::{debug, instrument};
use uuid::Uuid;

use contracts::{ContractError, MetricsSink, RestConfig};

use super::http::{self, ClientSlot};

/// Body posted for every document
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestPayload<'a> {
    pub event_name: &'a str,
    /// `buildId` plus the document keyed by its type
    pub payload: BTreeMap<&'a str, &'a str>,
}

impl<'a> RestPayload<'a> {
    fn new(event_name: &'a str, doc_type: &'a str, source: &'a str, build_id: &'a str) -> Self {
        Self {
            event_name,
            payload: BTreeMap::from([("buildId", build_id), (doc_type, source)]),
        }
    }
}

/// Sink posting to a REST endpoint
///
/// The endpoint assigns no ids, so the build id is generated once at
/// construction and reported for every document.
#[derive(Debug)]
pub struct RestSink {
    name: String,
    build_id: String,
    config: RestConfig,
    client: ClientSlot,
}

impl RestSink {
    pub fn new(config: &RestConfig, request_timeout: Duration) -> Self {
        let name = "rest".to_string();
        Self {
            client: ClientSlot::new(&name, request_timeout),
            name,
            build_id: Uuid::new_v4().to_string(),
            config: config.clone(),
        }
    }

    pub fn build_id(&self) -> &str {
        &self.build_id
    }

    async fn post(&self, body: String) -> Result<(), ContractError> {
        let client = self.client.get()?;
        let request = http::with_headers(client.post(&self.config.uri), &self.config.headers)
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        http::send(&self.name, request).await?;
        Ok(())
    }
}

impl MetricsSink for RestSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn collection(&self) -> &str {
        &self.config.build_event_name
    }

    fn log_collection(&self) -> String {
        self.config.log_event_name.clone()
    }

    async fn start_up_client(&self) -> Result<(), ContractError> {
        self.client.start()?;
        debug!(sink = %self.name, uri = %self.config.uri, "REST client started");
        Ok(())
    }

    async fn shut_down_client(&self) -> Result<(), ContractError> {
        self.client.shut_down();
        Ok(())
    }

    async fn ensure_collection_exists(&self, _name: &str) -> Result<(), ContractError> {
        Ok(())
    }

    #[instrument(name = "rest_sink_index", skip(self, payload), fields(sink = %self.name))]
    async fn index(
        &self,
        collection: &str,
        doc_type: &str,
        payload: &str,
        _id: Option<&str>,
    ) -> Result<String, ContractError> {
        let body = serde_json::to_string(&RestPayload::new(collection, doc_type, payload, &self.build_id))?;
        self.post(body).await?;
        Ok(self.build_id.clone())
    }

    #[instrument(
        name = "rest_sink_bulk_index",
        skip(self, payloads),
        fields(sink = %self.name, count = payloads.len())
    )]
    async fn bulk_index(
        &self,
        collection: &str,
        doc_type: &str,
        payloads: &[String],
    ) -> Result<(), ContractError> {
        if payloads.is_empty() {
            return Ok(());
        }
        let bodies: Vec<RestPayload<'_>> = payloads
            .iter()
            .map(|source| RestPayload::new(collection, doc_type, source, &self.build_id))
            .collect();
        self.post(serde_json::to_string(&bodies)?).await
    }

    fn receipt(&self, build_id: &str) -> Option<String> {
        Some(format!(
            "Metrics have been posted to {} (buildId: {})",
            self.config.uri, build_id
        ))
    }
}
