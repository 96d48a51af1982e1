//! `info` command implementation.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use contracts::{DispatcherKind, MetricsConfig};

use crate::cli::InfoArgs;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    dispatcher: String,
    target: String,
    policy: PolicyInfo,
    collections: CollectionInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    sanitization: Option<SanitizationInfo>,
}

#[derive(Serialize)]
struct PolicyInfo {
    fail_on_error: bool,
    verbose_error_output: bool,
    synchronous: bool,
    shutdown_timeout_secs: u64,
    request_timeout_secs: u64,
}

#[derive(Serialize)]
struct CollectionInfo {
    build: String,
    log: String,
    /// Header names only; values may be credentials
    #[serde(skip_serializing_if = "Vec::is_empty")]
    headers: Vec<String>,
}

#[derive(Serialize)]
struct SanitizationInfo {
    properties: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    regex: Option<String>,
}

/// Where the selected dispatcher delivers to
pub(crate) fn target(config: &MetricsConfig) -> String {
    match config.dispatcher {
        DispatcherKind::Index => config.index.base_uri(),
        DispatcherKind::Rest => config.rest.uri.clone(),
        DispatcherKind::LogForwarder => config
            .log_forwarder
            .uri
            .clone()
            .unwrap_or_else(|| "(unset)".to_string()),
        DispatcherKind::Noop => "(discarded)".to_string(),
        DispatcherKind::Memory => "(in memory)".to_string(),
    }
}

fn collections(config: &MetricsConfig) -> CollectionInfo {
    let header_names =
        |headers: &BTreeMap<String, String>| -> Vec<String> { headers.keys().cloned().collect() };
    match config.dispatcher {
        DispatcherKind::Index => CollectionInfo {
            build: config.index.build_index_name(),
            log: config.index.log_index_name(chrono::Utc::now()),
            headers: Vec::new(),
        },
        DispatcherKind::Rest => CollectionInfo {
            build: config.rest.build_event_name.clone(),
            log: config.rest.log_event_name.clone(),
            headers: header_names(&config.rest.headers),
        },
        DispatcherKind::LogForwarder => CollectionInfo {
            build: config.log_forwarder.event_name.clone(),
            log: config.log_forwarder.event_name.clone(),
            headers: header_names(&config.log_forwarder.headers),
        },
        DispatcherKind::Noop | DispatcherKind::Memory => CollectionInfo {
            build: "-".to_string(),
            log: "-".to_string(),
            headers: Vec::new(),
        },
    }
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let config = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    let info = build_config_info(&config, args);
    if args.json {
        let json = serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{json}");
    } else {
        print_config_info(&info);
    }

    Ok(())
}

fn build_config_info(config: &MetricsConfig, args: &InfoArgs) -> ConfigInfo {
    ConfigInfo {
        version: format!("{:?}", config.version),
        dispatcher: config.dispatcher.to_string(),
        target: target(config),
        policy: PolicyInfo {
            fail_on_error: config.fail_on_error,
            verbose_error_output: config.verbose_error_output,
            synchronous: config.synchronous,
            shutdown_timeout_secs: config.shutdown_timeout_secs,
            request_timeout_secs: config.request_timeout_secs,
        },
        collections: collections(config),
        sanitization: args.sanitization.then(|| SanitizationInfo {
            properties: config.sanitized_properties.clone(),
            regex: config.sanitized_properties_regex.clone(),
        }),
    }
}

fn print_config_info(info: &ConfigInfo) {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║               Build Metrics Configuration                    ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    println!("📤 Dispatcher");
    println!("   ├─ Version: {}", info.version);
    println!("   ├─ Kind: {}", info.dispatcher);
    println!("   ├─ Target: {}", info.target);
    println!("   ├─ Build collection: {}", info.collections.build);
    if info.collections.headers.is_empty() {
        println!("   └─ Log collection: {}", info.collections.log);
    } else {
        println!("   ├─ Log collection: {}", info.collections.log);
        println!("   └─ Headers: {}", info.collections.headers.join(", "));
    }

    let policy = &info.policy;
    println!("\n⚙️  Policy");
    println!("   ├─ Fail on error: {}", policy.fail_on_error);
    println!("   ├─ Verbose errors: {}", policy.verbose_error_output);
    println!("   ├─ Synchronous: {}", policy.synchronous);
    println!("   ├─ Shutdown timeout: {}s", policy.shutdown_timeout_secs);
    println!("   └─ Request timeout: {}s", policy.request_timeout_secs);

    if let Some(sanitization) = &info.sanitization {
        println!("\n🔒 Sanitization");
        for (i, key) in sanitization.properties.iter().enumerate() {
            let is_last = i == sanitization.properties.len() - 1 && sanitization.regex.is_none();
            let prefix = if is_last { "└─" } else { "├─" };
            println!("   {prefix} {key}");
        }
        match &sanitization.regex {
            Some(regex) => println!("   └─ /{regex}/"),
            None if sanitization.properties.is_empty() => println!("   └─ (none)"),
            None => {}
        }
    }

    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rest_info_lists_header_names_only() {
        let mut config = MetricsConfig {
            dispatcher: DispatcherKind::Rest,
            ..MetricsConfig::default()
        };
        config
            .rest
            .headers
            .insert("Authorization".to_string(), "Bearer secret".to_string());

        let args = InfoArgs {
            config: "unused.toml".into(),
            json: true,
            sanitization: false,
        };
        let json = serde_json::to_value(build_config_info(&config, &args)).unwrap();
        assert_eq!(json["collections"]["build"], "build_metrics");
        assert_eq!(json["collections"]["headers"][0], "Authorization");
        assert!(!json.to_string().contains("secret"));
        assert!(json.get("sanitization").is_none());
    }

    #[test]
    fn test_sanitization_shown_on_request() {
        let config = MetricsConfig {
            sanitized_properties: vec!["AWS_SECRET_ACCESS_KEY".to_string()],
            sanitized_properties_regex: Some("(?i).*token.*".to_string()),
            ..MetricsConfig::default()
        };
        let args = InfoArgs {
            config: "unused.toml".into(),
            json: true,
            sanitization: true,
        };
        let info = build_config_info(&config, &args);
        let sanitization = info.sanitization.unwrap();
        assert_eq!(sanitization.properties, ["AWS_SECRET_ACCESS_KEY"]);
        assert_eq!(info.target, "http://localhost:9200");
    }
}
