//! Configuration validation
//!
//! Rules:
//! - field rules declared on the config types (urls, ranges, non-empty names)
//! - the log forwarder needs a `uri` when selected
//! - basic auth credentials come in pairs
//! - sanitized property keys are non-empty
//! - the sanitization regex compiles
//! - a configured index mapping file exists

use contracts::{ContractError, DispatcherKind, MetricsConfig};
use validator::{Validate, ValidationErrors, ValidationErrorsKind};

/// Validate a MetricsConfig
///
/// Returns the first error encountered, or Ok(()).
pub fn validate(config: &MetricsConfig) -> Result<(), ContractError> {
    validate_fields(config)?;
    validate_log_forwarder(config)?;
    validate_basic_auth(config)?;
    validate_sanitized_properties(config)?;
    validate_sanitization_regex(config)?;
    validate_mapping_file(config)?;
    Ok(())
}

/// Run the derived field rules
fn validate_fields(config: &MetricsConfig) -> Result<(), ContractError> {
    config.validate().map_err(|errors| {
        let (field, message) = first_error(&errors, "")
            .unwrap_or_else(|| ("<unknown>".to_string(), errors.to_string()));
        ContractError::config_validation(field, message)
    })
}

/// Depth-first search for the first failing field, in key order
fn first_error(errors: &ValidationErrors, prefix: &str) -> Option<(String, String)> {
    let mut entries: Vec<_> = errors.errors().iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    for (name, kind) in entries {
        let path = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{prefix}.{name}")
        };
        match kind {
            ValidationErrorsKind::Field(field_errors) => {
                if let Some(error) = field_errors.first() {
                    let message = error
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("failed '{}' rule", error.code));
                    return Some((path, message));
                }
            }
            ValidationErrorsKind::Struct(nested) => {
                if let Some(found) = first_error(nested, &path) {
                    return Some(found);
                }
            }
            ValidationErrorsKind::List(items) => {
                for (idx, nested) in items {
                    if let Some(found) = first_error(nested, &format!("{path}[{idx}]")) {
                        return Some(found);
                    }
                }
            }
        }
    }
    None
}

/// The log forwarder has no usable default endpoint
fn validate_log_forwarder(config: &MetricsConfig) -> Result<(), ContractError> {
    if config.dispatcher == DispatcherKind::LogForwarder && config.log_forwarder.uri.is_none() {
        return Err(ContractError::config_validation(
            "log_forwarder.uri",
            "uri is required when dispatcher = \"log_forwarder\"",
        ));
    }
    Ok(())
}

fn validate_basic_auth(config: &MetricsConfig) -> Result<(), ContractError> {
    let index = &config.index;
    match (&index.basic_auth_username, &index.basic_auth_password) {
        (Some(_), None) => Err(ContractError::config_validation(
            "index.basic_auth_password",
            "basic_auth_password must be set together with basic_auth_username",
        )),
        (None, Some(_)) => Err(ContractError::config_validation(
            "index.basic_auth_username",
            "basic_auth_username must be set together with basic_auth_password",
        )),
        _ => Ok(()),
    }
}

fn validate_sanitized_properties(config: &MetricsConfig) -> Result<(), ContractError> {
    for (idx, key) in config.sanitized_properties.iter().enumerate() {
        if key.trim().is_empty() {
            return Err(ContractError::config_validation(
                format!("sanitized_properties[{idx}]"),
                "sanitized property key cannot be empty",
            ));
        }
    }
    Ok(())
}

fn validate_sanitization_regex(config: &MetricsConfig) -> Result<(), ContractError> {
    if let Some(pattern) = &config.sanitized_properties_regex {
        regex::Regex::new(pattern).map_err(|e| {
            ContractError::config_validation(
                "sanitized_properties_regex",
                format!("invalid regex: {e}"),
            )
        })?;
    }
    Ok(())
}

fn validate_mapping_file(config: &MetricsConfig) -> Result<(), ContractError> {
    if let Some(path) = &config.index.mapping_file {
        if !path.is_file() {
            return Err(ContractError::config_validation(
                "index.mapping_file",
                format!("mapping file '{}' not found", path.display()),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_valid_config() {
        assert!(validate(&MetricsConfig::default()).is_ok());
    }

    #[test]
    fn test_nested_field_rule_reports_path() {
        let mut config = MetricsConfig::default();
        config.index.index_name = String::new();
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("index.index_name"), "got: {err}");
    }

    #[test]
    fn test_zero_shutdown_timeout() {
        let mut config = MetricsConfig::default();
        config.shutdown_timeout_secs = 0;
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("shutdown_timeout_secs"), "got: {err}");
    }

    #[test]
    fn test_log_forwarder_requires_uri() {
        let mut config = MetricsConfig::default();
        config.dispatcher = DispatcherKind::LogForwarder;
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("uri is required"), "got: {err}");

        config.log_forwarder.uri = Some("http://localhost:8088/services/collector".into());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_basic_auth_pair() {
        let mut config = MetricsConfig::default();
        config.index.basic_auth_username = Some("elastic".into());
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("basic_auth_password"), "got: {err}");
    }

    #[test]
    fn test_empty_sanitized_key() {
        let mut config = MetricsConfig::default();
        config.sanitized_properties = vec!["TOKEN".into(), " ".into()];
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("sanitized_properties[1]"), "got: {err}");
    }

    #[test]
    fn test_invalid_regex() {
        let mut config = MetricsConfig::default();
        config.sanitized_properties_regex = Some("(unclosed".into());
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("invalid regex"), "got: {err}");
    }

    #[test]
    fn test_missing_mapping_file() {
        let mut config = MetricsConfig::default();
        config.index.mapping_file = Some(PathBuf::from("/definitely/not/here.json"));
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("not found"), "got: {err}");
    }
}
