//! Shared HTTP plumbing of the network sinks

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};

use contracts::ContractError;

/// Network client owned by one sink, present between start-up and shut-down
#[derive(Debug)]
pub(crate) struct ClientSlot {
    sink_name: String,
    timeout: Duration,
    client: Mutex<Option<Client>>,
}

impl ClientSlot {
    pub(crate) fn new(sink_name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            sink_name: sink_name.into(),
            timeout,
            client: Mutex::new(None),
        }
    }

    /// Create the client unless it already exists
    pub(crate) fn start(&self) -> Result<(), ContractError> {
        let mut slot = self.client.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            let client = Client::builder()
                .timeout(self.timeout)
                .build()
                .map_err(|e| ContractError::sink_connection(&self.sink_name, e.to_string()))?;
            *slot = Some(client);
        }
        Ok(())
    }

    pub(crate) fn shut_down(&self) {
        self.client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub(crate) fn is_started(&self) -> bool {
        self.client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Clone of the live client
    pub(crate) fn get(&self) -> Result<Client, ContractError> {
        self.client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| ContractError::sink_connection(&self.sink_name, "client not started"))
    }
}

pub(crate) fn with_headers(request: RequestBuilder, headers: &BTreeMap<String, String>) -> RequestBuilder {
    headers
        .iter()
        .fold(request, |request, (name, value)| request.header(name, value))
}

/// Send a request, mapping transport failures and non-2xx statuses to errors
pub(crate) async fn send(sink_name: &str, request: RequestBuilder) -> Result<Response, ContractError> {
    let response = request
        .send()
        .await
        .map_err(|e| ContractError::sink_request(sink_name, e.to_string()))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = if body.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        body
    };
    Err(ContractError::sink_response(sink_name, status.as_u16(), message))
}
