//! MetricsSink trait - Dispatcher output interface
//!
//! Defines the abstract interface for telemetry backends.

use crate::ContractError;

/// Document type of build records
pub const BUILD_TYPE: &str = "build";

/// Document type of forwarded log lines
pub const LOG_TYPE: &str = "log";

/// Telemetry backend trait
///
/// All sink implementations must implement this trait. Methods take `&self`
/// because the worker and the synchronous flush points share one sink.
#[trait_variant::make(MetricsSink: Send)]
pub trait LocalMetricsSink {
    /// Sink name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Collection that build records are indexed into
    fn collection(&self) -> &str;

    /// Collection that log lines are bulk-indexed into
    fn log_collection(&self) -> String;

    /// Acquire the network client
    ///
    /// Idempotent; called once per dispatcher lifecycle.
    async fn start_up_client(&self) -> Result<(), ContractError>;

    /// Release the network client
    ///
    /// Idempotent; called once per dispatcher lifecycle.
    async fn shut_down_client(&self) -> Result<(), ContractError>;

    /// Create the collection if absent; never destructive
    async fn ensure_collection_exists(&self, name: &str) -> Result<(), ContractError>;

    /// Index one document
    ///
    /// With `id` present this is an upsert of the record `id` refers to,
    /// otherwise a create. Returns the server- or self-assigned id.
    async fn index(
        &self,
        collection: &str,
        doc_type: &str,
        payload: &str,
        id: Option<&str>,
    ) -> Result<String, ContractError>;

    /// Index many documents, each under a fresh id
    async fn bulk_index(
        &self,
        collection: &str,
        doc_type: &str,
        payloads: &[String],
    ) -> Result<(), ContractError>;

    /// Human-readable pointer to the delivered build, if the sink can provide one
    fn receipt(&self, build_id: &str) -> Option<String>;
}
