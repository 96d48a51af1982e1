//! Sink implementations
//!
//! Index store, REST endpoint, log forwarder, no-op and in-memory store,
//! plus `AnySink` for selecting one of them from configuration.

mod http;
mod index;
mod log_forwarder;
mod memory;
mod noop;
mod rest;

use contracts::{ContractError, MetricsSink};

pub use self::index::{IndexSink, DEFAULT_MAPPING};
pub use self::log_forwarder::LogForwarderSink;
pub use self::memory::{MemorySink, StoredDocument};
pub use self::noop::NoopSink;
pub use self::rest::{RestPayload, RestSink};

/// One of the built-in sinks, chosen at runtime
#[derive(Debug)]
pub enum AnySink {
    Index(IndexSink),
    Rest(RestSink),
    LogForwarder(LogForwarderSink),
    Noop(NoopSink),
    Memory(MemorySink),
}

macro_rules! delegate {
    ($self:ident, $sink:ident => $call:expr) => {
        match $self {
            AnySink::Index($sink) => $call,
            AnySink::Rest($sink) => $call,
            AnySink::LogForwarder($sink) => $call,
            AnySink::Noop($sink) => $call,
            AnySink::Memory($sink) => $call,
        }
    };
}

impl MetricsSink for AnySink {
    fn name(&self) -> &str {
        delegate!(self, sink => sink.name())
    }

    fn collection(&self) -> &str {
        delegate!(self, sink => sink.collection())
    }

    fn log_collection(&self) -> String {
        delegate!(self, sink => sink.log_collection())
    }

    async fn start_up_client(&self) -> Result<(), ContractError> {
        delegate!(self, sink => sink.start_up_client().await)
    }

    async fn shut_down_client(&self) -> Result<(), ContractError> {
        delegate!(self, sink => sink.shut_down_client().await)
    }

    async fn ensure_collection_exists(&self, name: &str) -> Result<(), ContractError> {
        delegate!(self, sink => sink.ensure_collection_exists(name).await)
    }

    async fn index(
        &self,
        collection: &str,
        doc_type: &str,
        payload: &str,
        id: Option<&str>,
    ) -> Result<String, ContractError> {
        delegate!(self, sink => sink.index(collection, doc_type, payload, id).await)
    }

    async fn bulk_index(
        &self,
        collection: &str,
        doc_type: &str,
        payloads: &[String],
    ) -> Result<(), ContractError> {
        delegate!(self, sink => sink.bulk_index(collection, doc_type, payloads).await)
    }

    fn receipt(&self, build_id: &str) -> Option<String> {
        delegate!(self, sink => sink.receipt(build_id))
    }
}
