//! MetricsConfig - Config Loader output
//!
//! Connection targets, collection names, failure policy and sanitization
//! rules. Consumed (never produced) by the dispatcher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use validator::Validate;

/// Prefix applied to every build index name
pub const INDEX_PREFIX: &str = "build-metrics-";

/// Prefix applied to rolling log index names
pub const LOG_INDEX_PREFIX: &str = "logstash-";

/// Configuration version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MetricsConfig {
    /// Configuration version
    pub version: ConfigVersion,

    /// Backend selection
    pub dispatcher: DispatcherKind,

    /// Clear the queue and mark the service failed on the first action error
    pub fail_on_error: bool,

    /// Surface action errors to the caller (strict mode only)
    pub verbose_error_output: bool,

    /// Execute every index request inline on the caller (test/debug)
    pub synchronous: bool,

    /// Bound on waiting for the dispatcher to terminate
    #[validate(range(min = 1))]
    pub shutdown_timeout_secs: u64,

    /// Per-request timeout of HTTP sinks
    #[validate(range(min = 1))]
    pub request_timeout_secs: u64,

    /// Environment/property keys redacted by exact match
    pub sanitized_properties: Vec<String>,

    /// Environment/property keys redacted by full regex match
    #[validate(length(min = 1))]
    pub sanitized_properties_regex: Option<String>,

    /// Index store settings
    #[validate(nested)]
    pub index: IndexConfig,

    /// Generic REST endpoint settings
    #[validate(nested)]
    pub rest: RestConfig,

    /// Log aggregator settings
    #[validate(nested)]
    pub log_forwarder: LogForwarderConfig,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            version: ConfigVersion::V1,
            dispatcher: DispatcherKind::default(),
            fail_on_error: true,
            verbose_error_output: false,
            synchronous: false,
            shutdown_timeout_secs: 30,
            request_timeout_secs: 30,
            sanitized_properties: Vec::new(),
            sanitized_properties_regex: None,
            index: IndexConfig::default(),
            rest: RestConfig::default(),
            log_forwarder: LogForwarderConfig::default(),
        }
    }
}

/// Backend kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatcherKind {
    /// Search/index store over HTTP
    #[default]
    Index,
    /// Generic REST endpoint
    Rest,
    /// Log aggregator (HTTP event collector or forwarder)
    LogForwarder,
    /// Counts and discards
    Noop,
    /// In-process index store
    Memory,
}

impl fmt::Display for DispatcherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Index => "index",
            Self::Rest => "rest",
            Self::LogForwarder => "log_forwarder",
            Self::Noop => "noop",
            Self::Memory => "memory",
        };
        f.write_str(name)
    }
}

/// Index store settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct IndexConfig {
    #[validate(length(min = 1))]
    pub hostname: String,

    #[validate(range(min = 1))]
    pub http_port: u16,

    /// Overrides `hostname`/`http_port` when set
    #[validate(url)]
    pub full_uri: Option<String>,

    /// Index name without the `build-metrics-` prefix
    #[validate(length(min = 1))]
    pub index_name: String,

    pub basic_auth_username: Option<String>,

    pub basic_auth_password: Option<String>,

    /// Custom mapping used when the index has to be created
    pub mapping_file: Option<PathBuf>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            http_port: 9200,
            full_uri: None,
            index_name: "default".to_string(),
            basic_auth_username: None,
            basic_auth_password: None,
            mapping_file: None,
        }
    }
}

impl IndexConfig {
    /// Base URI of the index store, without trailing slash
    pub fn base_uri(&self) -> String {
        match &self.full_uri {
            Some(uri) => uri.trim_end_matches('/').to_string(),
            None => format!("http://{}:{}", self.hostname, self.http_port),
        }
    }

    /// Index that build records go to
    pub fn build_index_name(&self) -> String {
        format!("{INDEX_PREFIX}{}", self.index_name)
    }

    /// Monthly rolling index that log lines go to
    pub fn log_index_name(&self, now: DateTime<Utc>) -> String {
        format!(
            "{LOG_INDEX_PREFIX}{}-{}",
            self.build_index_name(),
            now.format("%Y%m")
        )
    }
}

/// Generic REST endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RestConfig {
    #[validate(url)]
    pub uri: String,

    #[validate(length(min = 1))]
    pub build_event_name: String,

    #[validate(length(min = 1))]
    pub log_event_name: String,

    /// Extra headers sent with every request
    pub headers: BTreeMap<String, String>,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            uri: "http://localhost/metrics".to_string(),
            build_event_name: "build_metrics".to_string(),
            log_event_name: "build_logs".to_string(),
            headers: BTreeMap::new(),
        }
    }
}

/// Log aggregator settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LogForwarderConfig {
    /// Required when the log forwarder is selected
    #[validate(url)]
    pub uri: Option<String>,

    pub input_type: LogForwarderInput,

    #[validate(length(min = 1))]
    pub event_name: String,

    /// Extra headers sent with every request (e.g. `Authorization`)
    pub headers: BTreeMap<String, String>,
}

impl Default for LogForwarderConfig {
    fn default() -> Self {
        Self {
            uri: None,
            input_type: LogForwarderInput::default(),
            event_name: "build_metrics".to_string(),
            headers: BTreeMap::new(),
        }
    }
}

/// Envelope expected by the log aggregator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogForwarderInput {
    /// `{"event": {...}}` envelope
    #[default]
    HttpCollector,
    /// Bare object
    Forwarder,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_defaults() {
        let config = MetricsConfig::default();
        assert_eq!(config.dispatcher, DispatcherKind::Index);
        assert!(config.fail_on_error);
        assert!(!config.verbose_error_output);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_index_names() {
        let index = IndexConfig::default();
        assert_eq!(index.base_uri(), "http://localhost:9200");
        assert_eq!(index.build_index_name(), "build-metrics-default");

        let now = Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap();
        assert_eq!(
            index.log_index_name(now),
            "logstash-build-metrics-default-202403"
        );
    }

    #[test]
    fn test_full_uri_overrides_host() {
        let index = IndexConfig {
            full_uri: Some("https://es.example.com:443/".to_string()),
            ..IndexConfig::default()
        };
        assert_eq!(index.base_uri(), "https://es.example.com:443");
    }

    #[test]
    fn test_field_validation() {
        let config = MetricsConfig {
            rest: RestConfig {
                uri: "not a url".to_string(),
                ..RestConfig::default()
            },
            ..MetricsConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
