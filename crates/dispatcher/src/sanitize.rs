//! Property sanitization
//!
//! Keys are sensitive when they equal a configured key or fully match the
//! configured pattern. Values of sensitive keys are overwritten in the build
//! itself, so no later snapshot can carry the original.

use std::collections::HashSet;

use regex::Regex;

use contracts::{Build, ContractError, MetricsConfig};

#[derive(Debug, Clone, Default)]
pub struct Sanitizer {
    keys: HashSet<String>,
    pattern: Option<Regex>,
}

impl Sanitizer {
    /// Build a sanitizer from exact keys and an optional pattern
    ///
    /// The pattern is anchored at both ends.
    pub fn new<I, K>(keys: I, pattern: Option<&str>) -> Result<Self, ContractError>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let pattern = pattern
            .map(|p| {
                Regex::new(&format!("^(?:{p})$")).map_err(|e| {
                    ContractError::config_validation(
                        "sanitized_properties_regex",
                        format!("invalid regex: {e}"),
                    )
                })
            })
            .transpose()?;

        Ok(Self {
            keys: keys.into_iter().map(Into::into).collect(),
            pattern,
        })
    }

    pub fn from_config(config: &MetricsConfig) -> Result<Self, ContractError> {
        Self::new(
            config.sanitized_properties.iter().cloned(),
            config.sanitized_properties_regex.as_deref(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.pattern.is_none()
    }

    pub fn is_sensitive(&self, key: &str) -> bool {
        self.keys.contains(key) || self.pattern.as_ref().is_some_and(|p| p.is_match(key))
    }

    /// Redact the build's environment snapshot; returns the number of values replaced
    pub fn sanitize(&self, build: &mut Build) -> usize {
        if self.is_empty() {
            return 0;
        }
        build.redact_info(|key| self.is_sensitive(key))
    }
}
