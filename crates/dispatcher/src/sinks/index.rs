//! IndexSink - search/index store over its HTTP document API

use std::time::Duration;

use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use reqwest::{RequestBuilder, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use contracts::{ContractError, IndexConfig, MetricsSink};

use super::http::{self, ClientSlot};

/// Mapping used when the build index has to be created
pub const DEFAULT_MAPPING: &str = r#"{
  "settings": { "number_of_shards": 1 },
  "mappings": {
    "dynamic_templates": [
      { "strings": { "match_mapping_type": "string", "mapping": { "type": "keyword" } } }
    ],
    "properties": {
      "buildId": { "type": "keyword" },
      "startTime": { "type": "date" },
      "finishedTime": { "type": "date" },
      "elapsedTime": { "type": "long" },
      "events": { "type": "nested" },
      "tasks": { "type": "nested" },
      "tests": { "type": "nested" }
    }
  }
}"#;

/// Sink writing build records as documents of an index
#[derive(Debug)]
pub struct IndexSink {
    name: String,
    base_uri: String,
    collection: String,
    config: IndexConfig,
    client: ClientSlot,
}

impl IndexSink {
    pub fn new(config: &IndexConfig, request_timeout: Duration) -> Self {
        let name = "index".to_string();
        Self {
            client: ClientSlot::new(&name, request_timeout),
            name,
            base_uri: config.base_uri(),
            collection: config.build_index_name(),
            config: config.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_uri, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.basic_auth_username {
            Some(username) => request.basic_auth(username, self.config.basic_auth_password.as_ref()),
            None => request,
        }
    }

    async fn mapping(&self) -> Result<String, ContractError> {
        match &self.config.mapping_file {
            Some(path) => Ok(tokio::fs::read_to_string(path).await?),
            None => Ok(DEFAULT_MAPPING.to_string()),
        }
    }

    async fn create_collection(&self, name: &str) -> Result<(), ContractError> {
        let client = self.client.get()?;
        let mapping = self.mapping().await?;
        let request = self
            .authorize(client.put(self.url(name)))
            .header(CONTENT_TYPE, "application/json")
            .body(mapping);
        http::send(&self.name, request).await?;
        info!(sink = %self.name, index = name, "Created index for metrics");
        Ok(())
    }
}

impl MetricsSink for IndexSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn collection(&self) -> &str {
        &self.collection
    }

    fn log_collection(&self) -> String {
        self.config.log_index_name(Utc::now())
    }

    async fn start_up_client(&self) -> Result<(), ContractError> {
        self.client.start()?;
        debug!(sink = %self.name, uri = %self.base_uri, "Index client started");
        Ok(())
    }

    async fn shut_down_client(&self) -> Result<(), ContractError> {
        self.client.shut_down();
        debug!(sink = %self.name, "Index client shut down");
        Ok(())
    }

    #[instrument(name = "index_sink_ensure_collection", skip(self), fields(sink = %self.name))]
    async fn ensure_collection_exists(&self, name: &str) -> Result<(), ContractError> {
        let client = self.client.get()?;
        let response = self
            .authorize(client.head(self.url(name)))
            .send()
            .await
            .map_err(|e| ContractError::sink_request(&self.name, e.to_string()))?;

        match response.status() {
            status if status.is_success() => {
                info!(sink = %self.name, index = name, "Using existing index for metrics");
                Ok(())
            }
            StatusCode::NOT_FOUND => self.create_collection(name).await,
            status => Err(ContractError::sink_response(
                &self.name,
                status.as_u16(),
                format!("unable to check index '{name}'"),
            )),
        }
    }

    #[instrument(
        name = "index_sink_index",
        skip(self, payload),
        fields(sink = %self.name, bytes = payload.len())
    )]
    async fn index(
        &self,
        collection: &str,
        doc_type: &str,
        payload: &str,
        id: Option<&str>,
    ) -> Result<String, ContractError> {
        let client = self.client.get()?;
        let id = id.map_or_else(|| Uuid::new_v4().to_string(), str::to_owned);

        let request = self
            .authorize(client.put(self.url(&format!("{collection}/_doc/{id}"))))
            .header(CONTENT_TYPE, "application/json")
            .body(payload.to_owned());
        let response = http::send(&self.name, request).await?;

        let body: Value = response.json().await.map_err(|e| {
            ContractError::sink_request(&self.name, format!("invalid index response: {e}"))
        })?;
        let assigned = body
            .get("_id")
            .and_then(Value::as_str)
            .map_or(id, str::to_owned);
        debug!(sink = %self.name, doc_type, id = %assigned, "Indexed document");
        Ok(assigned)
    }

    #[instrument(
        name = "index_sink_bulk_index",
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
        let client = self.client.get()?;

        let mut body = String::new();
        for payload in payloads {
            let action = json!({ "index": { "_index": collection, "_id": Uuid::new_v4().to_string() } });
            body.push_str(&action.to_string());
            body.push('\n');
            body.push_str(payload);
            body.push('\n');
        }

        let request = self
            .authorize(client.post(self.url("_bulk")))
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(body);
        let response = http::send(&self.name, request).await?;

        let summary: Value = response.json().await.map_err(|e| {
            ContractError::sink_request(&self.name, format!("invalid bulk response: {e}"))
        })?;
        if summary.get("errors").and_then(Value::as_bool) == Some(true) {
            return Err(ContractError::sink_response(
                &self.name,
                StatusCode::OK.as_u16(),
                format!("bulk request for {doc_type} documents reported item errors"),
            ));
        }
        Ok(())
    }

    fn receipt(&self, build_id: &str) -> Option<String> {
        Some(format!(
            "You can find the metrics for this build at {}/{}/_doc/{}",
            self.base_uri, self.collection, build_id
        ))
    }
}
