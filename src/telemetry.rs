//! Structured logging setup
//!
//! Logs go through `tracing`. The subscriber filter comes from `RUST_LOG`
//! when it is set and from [`LoggingSettings::filter`] otherwise.

use anyhow::Result;
use serde::Deserialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output format of log lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line
    #[default]
    Json,
    /// Multi-line human readable output
    Pretty,
    /// Single-line human readable output
    Compact,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Output format
    pub format: LogFormat,
    /// Filter directives, e.g. `info,metric_ingest=debug`
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            filter: "info".to_string(),
        }
    }
}

impl LoggingSettings {
    /// Filter to install, honoring `RUST_LOG` first
    pub fn env_filter(&self) -> Result<EnvFilter> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => Ok(EnvFilter::try_new(&self.filter)?),
        }
    }
}

/// Install the global tracing subscriber
///
/// Fails if a subscriber is already installed or the filter does not parse.
pub fn init_tracing(settings: &LoggingSettings) -> Result<()> {
    let filter = settings.env_filter()?;
    let registry = tracing_subscriber::registry().with(filter);

    match settings.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init()?,
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer().pretty()).try_init()?,
        LogFormat::Compact => registry
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init()?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_defaults() {
        let settings = LoggingSettings::default();
        assert_eq!(settings.format, LogFormat::Json);
        assert_eq!(settings.filter, "info");
    }

    #[test]
    fn test_format_from_yaml() {
        let settings: LoggingSettings =
            serde_yaml::from_str("format: compact\nfilter: debug").unwrap();
        assert_eq!(settings.format, LogFormat::Compact);
        assert_eq!(settings.filter, "debug");
    }

    #[test]
    fn test_invalid_filter_rejected() {
        let settings = LoggingSettings {
            format: LogFormat::Json,
            filter: "metric_ingest=loud".to_string(),
        };
        if std::env::var("RUST_LOG").is_err() {
            assert!(settings.env_filter().is_err());
        }
    }
}
