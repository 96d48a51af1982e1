//! NoopSink - accepts everything, delivers nothing

use std::sync::atomic::{AtomicU64, Ordering};

use contracts::{ContractError, MetricsSink};

#[derive(Debug, Default)]
pub struct NoopSink {
    indexed: AtomicU64,
}

impl NoopSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Documents accepted so far
    pub fn indexed(&self) -> u64 {
        self.indexed.load(Ordering::Relaxed)
    }
}

impl MetricsSink for NoopSink {
    fn name(&self) -> &str {
        "noop"
    }

    fn collection(&self) -> &str {
        "noop"
    }

    fn log_collection(&self) -> String {
        "noop".to_string()
    }

    async fn start_up_client(&self) -> Result<(), ContractError> {
        Ok(())
    }

    async fn shut_down_client(&self) -> Result<(), ContractError> {
        Ok(())
    }

    async fn ensure_collection_exists(&self, _name: &str) -> Result<(), ContractError> {
        Ok(())
    }

    async fn index(
        &self,
        _collection: &str,
        _doc_type: &str,
        _payload: &str,
        id: Option<&str>,
    ) -> Result<String, ContractError> {
        let count = self.indexed.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(id.map_or_else(|| count.to_string(), str::to_owned))
    }

    async fn bulk_index(
        &self,
        _collection: &str,
        _doc_type: &str,
        payloads: &[String],
    ) -> Result<(), ContractError> {
        self.indexed.fetch_add(payloads.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    fn receipt(&self, _build_id: &str) -> Option<String> {
        None
    }
}
