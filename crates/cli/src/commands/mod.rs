//! Command implementations.

mod info;
mod run;
mod validate;

pub use info::run_info;
pub use run::run_command;
pub use validate::run_validate;

use contracts::MetricsConfig;

/// Non-fatal configuration issues
pub(crate) fn collect_warnings(config: &MetricsConfig) -> Vec<String> {
    use contracts::DispatcherKind;

    let mut warnings = Vec::new();

    match config.dispatcher {
        DispatcherKind::Index => {
            let uri = config.index.base_uri();
            if config.index.basic_auth_username.is_some() && uri.starts_with("http://") {
                warnings.push(format!("Basic auth credentials are sent in clear text to {uri}"));
            }
        }
        DispatcherKind::Noop => {
            warnings.push("Noop dispatcher selected - metrics will be discarded".to_string());
        }
        DispatcherKind::Memory => {
            warnings.push("Memory dispatcher selected - metrics are lost when the process exits".to_string());
        }
        DispatcherKind::Rest | DispatcherKind::LogForwarder => {}
    }

    if config.sanitized_properties.is_empty() && config.sanitized_properties_regex.is_none() {
        warnings.push("No sanitization rules - environment variables are sent unredacted".to_string());
    }
    if config.synchronous {
        warnings.push("synchronous = true - every index request blocks the build".to_string());
    }
    if !config.fail_on_error && config.verbose_error_output {
        warnings.push("verbose_error_output has no effect while fail_on_error = false".to_string());
    }

    warnings
}
