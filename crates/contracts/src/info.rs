//! Environment snapshot attached to a build

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Replacement written over the value of every sensitive key
pub const REDACTION_MARKER: &str = "SANITIZED";

/// Single environment variable or system property
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Convert a map into key/value pairs, ordered by key
    pub fn from_map<K, V, I>(entries: I) -> Vec<KeyValue>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut pairs: Vec<KeyValue> = entries
            .into_iter()
            .map(|(k, v)| KeyValue::new(k, v))
            .collect();
        pairs.sort_by(|a, b| a.key.cmp(&b.key));
        pairs
    }
}

/// Description of a tool taking part in the build (build tool, SCM, CI)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub properties: BTreeMap<String, serde_json::Value>,
}

impl Tool {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn unknown() -> Self {
        Self::new("unknown")
    }

    /// Attach a property, replacing any previous value under `key`
    pub fn with_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

impl Default for Tool {
    fn default() -> Self {
        Self::unknown()
    }
}

/// Environment info: tool identity, SCM, CI, variables and properties
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Info {
    pub build: Tool,
    pub scm: Tool,
    pub ci: Tool,
    pub environment_variables: Vec<KeyValue>,
    pub system_properties: Vec<KeyValue>,
}

impl Info {
    /// Replace the value of every key matching `is_sensitive` with [`REDACTION_MARKER`]
    ///
    /// Returns the number of values replaced.
    pub fn redact(&mut self, is_sensitive: impl Fn(&str) -> bool) -> usize {
        let mut redacted = 0;
        for pair in self
            .environment_variables
            .iter_mut()
            .chain(self.system_properties.iter_mut())
        {
            if is_sensitive(&pair.key) && pair.value != REDACTION_MARKER {
                pair.value = REDACTION_MARKER.to_string();
                redacted += 1;
            }
        }
        redacted
    }

    /// Look up a system property by key
    pub fn system_property(&self, key: &str) -> Option<&str> {
        self.system_properties
            .iter()
            .find(|p| p.key == key)
            .map(|p| p.value.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info() -> Info {
        Info {
            build: Tool::new("cargo").with_property("version", "1.80.0"),
            scm: Tool::unknown(),
            ci: Tool::unknown(),
            environment_variables: KeyValue::from_map([("API_TOKEN", "abc"), ("HOME", "/home/ci")]),
            system_properties: KeyValue::from_map([("os.name", "linux")]),
        }
    }

    #[test]
    fn test_redact_replaces_only_matching_keys() {
        let mut info = sample_info();
        let count = info.redact(|key| key == "API_TOKEN");

        assert_eq!(count, 1);
        assert_eq!(info.environment_variables[0].value, REDACTION_MARKER);
        assert_eq!(info.environment_variables[1].value, "/home/ci");
        assert_eq!(info.system_property("os.name"), Some("linux"));
    }

    #[test]
    fn test_redact_is_idempotent() {
        let mut info = sample_info();
        info.redact(|key| key == "API_TOKEN");
        assert_eq!(info.redact(|key| key == "API_TOKEN"), 0);
    }

    #[test]
    fn test_tool_flattens_properties() {
        let json = serde_json::to_value(Tool::new("git").with_property("branch", "main")).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "git", "branch": "main" }));
    }
}
