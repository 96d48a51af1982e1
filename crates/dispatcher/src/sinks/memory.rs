//! MemorySink - in-process index store
//!
//! Behaves like a real index backend (ids, upserts, bulk writes, a client
//! that must be started) without any I/O. Clones share one store, so a test
//! can keep a clone while the dispatcher owns the other. Index calls can be
//! made to fail by call number.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use contracts::{ContractError, MetricsSink};

/// Document held by the store
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub collection: String,
    pub doc_type: String,
    pub id: String,
    pub payload: String,
}

impl StoredDocument {
    /// Payload parsed as JSON (`Null` when it is not valid JSON)
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.payload).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Default)]
struct Store {
    documents: Vec<StoredDocument>,
    bulk_documents: Vec<StoredDocument>,
    collections: HashSet<String>,
    next_id: u64,
    index_calls: u64,
    fail_on: HashSet<u64>,
    started: bool,
    start_ups: u32,
    shut_downs: u32,
}

impl Store {
    fn fresh_id(&mut self) -> String {
        self.next_id += 1;
        format!("mem-{}", self.next_id)
    }

    fn ensure_started(&self) -> Result<(), ContractError> {
        if self.started {
            Ok(())
        } else {
            Err(ContractError::sink_connection("memory", "client not started"))
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    store: Arc<Mutex<Store>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the given index calls (1-based, counted over the sink's lifetime)
    pub fn failing_on(calls: impl IntoIterator<Item = u64>) -> Self {
        let sink = Self::new();
        sink.lock().fail_on.extend(calls);
        sink
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Documents written through `index`, in first-write order
    pub fn records(&self) -> Vec<StoredDocument> {
        self.lock().documents.clone()
    }

    pub fn record(&self, id: &str) -> Option<StoredDocument> {
        self.lock().documents.iter().find(|d| d.id == id).cloned()
    }

    pub fn record_count(&self) -> usize {
        self.lock().documents.len()
    }

    /// Documents written through `bulk_index`
    pub fn log_records(&self) -> Vec<StoredDocument> {
        self.lock().bulk_documents.clone()
    }

    pub fn index_calls(&self) -> u64 {
        self.lock().index_calls
    }

    pub fn has_collection(&self, name: &str) -> bool {
        self.lock().collections.contains(name)
    }

    pub fn is_started(&self) -> bool {
        self.lock().started
    }

    pub fn start_up_count(&self) -> u32 {
        self.lock().start_ups
    }

    pub fn shut_down_count(&self) -> u32 {
        self.lock().shut_downs
    }
}

impl MetricsSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn collection(&self) -> &str {
        "build-metrics-memory"
    }

    fn log_collection(&self) -> String {
        "logstash-build-metrics-memory".to_string()
    }

    async fn start_up_client(&self) -> Result<(), ContractError> {
        let mut store = self.lock();
        store.started = true;
        store.start_ups += 1;
        Ok(())
    }

    async fn shut_down_client(&self) -> Result<(), ContractError> {
        let mut store = self.lock();
        store.started = false;
        store.shut_downs += 1;
        Ok(())
    }

    async fn ensure_collection_exists(&self, name: &str) -> Result<(), ContractError> {
        let mut store = self.lock();
        store.ensure_started()?;
        store.collections.insert(name.to_string());
        Ok(())
    }

    async fn index(
        &self,
        collection: &str,
        doc_type: &str,
        payload: &str,
        id: Option<&str>,
    ) -> Result<String, ContractError> {
        let mut store = self.lock();
        store.ensure_started()?;
        store.index_calls += 1;
        let call = store.index_calls;
        if store.fail_on.contains(&call) {
            return Err(ContractError::sink_response(
                "memory",
                503,
                format!("injected failure on call {call}"),
            ));
        }

        let id = match id {
            Some(id) => id.to_string(),
            None => store.fresh_id(),
        };
        let document = StoredDocument {
            collection: collection.to_string(),
            doc_type: doc_type.to_string(),
            id: id.clone(),
            payload: payload.to_string(),
        };
        match store
            .documents
            .iter_mut()
            .find(|d| d.collection == collection && d.id == id)
        {
            Some(existing) => *existing = document,
            None => store.documents.push(document),
        }
        Ok(id)
    }

    async fn bulk_index(
        &self,
        collection: &str,
        doc_type: &str,
        payloads: &[String],
    ) -> Result<(), ContractError> {
        let mut store = self.lock();
        store.ensure_started()?;
        for payload in payloads {
            let id = store.fresh_id();
            store.bulk_documents.push(StoredDocument {
                collection: collection.to_string(),
                doc_type: doc_type.to_string(),
                id,
                payload: payload.clone(),
            });
        }
        Ok(())
    }

    fn receipt(&self, build_id: &str) -> Option<String> {
        Some(format!("Metrics stored in memory (buildId: {build_id})"))
    }
}
