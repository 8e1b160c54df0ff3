//! Tracing/logging initialization.
//!
//! Services emit structured `tracing` events; this module decides where they go.
//! Production runs JSON lines to stdout, local runs can switch to the pretty
//! formatter.

use serde::Deserialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// `EnvFilter` directives. `None` reads `RUST_LOG`, falling back to `info`.
    pub filter: Option<String>,
    pub format: LogFormat,
    /// Route output through the test harness capture.
    pub test_writer: bool,
}

impl ObservabilityConfig {
    /// Pretty, captured output for test binaries.
    pub fn for_tests(filter: impl Into<String>) -> Self {
        Self {
            filter: Some(filter.into()),
            format: LogFormat::Pretty,
            test_writer: true,
        }
    }

    fn env_filter(&self) -> EnvFilter {
        match &self.filter {
            Some(directives) => {
                EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("info"))
            }
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        }
    }
}

/// Initialize tracing/logging for the process with the defaults.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    init_with(&ObservabilityConfig::default());
}

/// Install a global subscriber built from `config`.
///
/// Returns `false` when a subscriber was already installed; the existing one
/// stays in place.
pub fn init_with(config: &ObservabilityConfig) -> bool {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(config.env_filter())
        .with_timer(tracing_subscriber::fmt::time::SystemTime);

    match (config.format, config.test_writer) {
        (LogFormat::Json, false) => builder.json().with_target(false).try_init().is_ok(),
        (LogFormat::Json, true) => builder
            .json()
            .with_target(false)
            .with_test_writer()
            .try_init()
            .is_ok(),
        (LogFormat::Pretty, false) => builder.pretty().try_init().is_ok(),
        (LogFormat::Pretty, true) => builder.pretty().with_test_writer().try_init().is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_deserializes_with_defaults() {
        let config: ObservabilityConfig = serde_json::from_str(r#"{"format":"pretty"}"#).unwrap();
        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.filter, None);
        assert!(!config.test_writer);
    }

    #[test]
    fn repeated_init_is_a_no_op() {
        let config = ObservabilityConfig::for_tests("debug");
        init_with(&config);

        assert!(!init_with(&config));
        init();
        ::tracing::info!(answer = 42, "still logging");
    }
}
