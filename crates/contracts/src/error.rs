//! Layered error definitions
//!
//! Categorized by source: config / sink / serialization

use thiserror::Error;

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Sink Errors =====
    /// Request could not be sent or the response could not be read
    #[error("sink '{sink_name}' request error: {message}")]
    SinkRequest { sink_name: String, message: String },

    /// Backend answered with a non-success status
    #[error("sink '{sink_name}' rejected request with status {status}: {message}")]
    SinkResponse {
        sink_name: String,
        status: u16,
        message: String,
    },

    /// Sink client unavailable (not started or already shut down)
    #[error("sink '{sink_name}' connection error: {message}")]
    SinkConnection { sink_name: String, message: String },

    // ===== Serialization Errors =====
    /// Payload could not be rendered or parsed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create sink request error
    pub fn sink_request(sink_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkRequest {
            sink_name: sink_name.into(),
            message: message.into(),
        }
    }

    /// Create sink response error
    pub fn sink_response(
        sink_name: impl Into<String>,
        status: u16,
        message: impl Into<String>,
    ) -> Self {
        Self::SinkResponse {
            sink_name: sink_name.into(),
            status,
            message: message.into(),
        }
    }

    /// Create sink connection error
    pub fn sink_connection(sink_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkConnection {
            sink_name: sink_name.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_response_display() {
        let err = ContractError::sink_response("rest", 503, "unavailable");
        assert_eq!(
            err.to_string(),
            "sink 'rest' rejected request with status 503: unavailable"
        );
    }

    #[test]
    fn test_config_validation_display() {
        let err = ContractError::config_validation("rest.uri", "must be a valid URL");
        assert!(err.to_string().contains("rest.uri"));
    }
}
