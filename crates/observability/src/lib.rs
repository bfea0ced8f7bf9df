// crates/observability/src/lib.rs
//! Tracing subscriber setup for binaries built on the job crates.
//!
//! Libraries only emit `tracing` events; installing a subscriber is the
//! binary's call, through [`init`].

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Directives used when neither `RUST_LOG` nor [`LogConfig::filter`] is set.
pub const DEFAULT_FILTER: &str = "warn,jobtree=info,jobtree_core=info,jobtree_combinators=info";

#[derive(Debug, thiserror::Error)]
pub enum ObservabilityError {
    #[error("invalid log filter: {0}")]
    InvalidFilter(#[from] tracing_subscriber::filter::ParseError),
    #[error("a global subscriber is already installed: {0}")]
    AlreadyInitialized(#[from] tracing_subscriber::util::TryInitError),
    #[error("unknown log format `{0}` (expected `plain` or `json`)")]
    UnknownFormat(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

impl FromStr for LogFormat {
    type Err = ObservabilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "plain" | "text" => Ok(Self::Plain),
            "json" => Ok(Self::Json),
            _ => Err(ObservabilityError::UnknownFormat(s.to_string())),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Plain => "plain",
            Self::Json => "json",
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directives. `RUST_LOG` wins when set.
    pub filter: Option<String>,
    pub format: LogFormat,
}

impl LogConfig {
    /// The directives that will be installed, given the value of `RUST_LOG`.
    pub fn directives(&self, env: Option<&str>) -> String {
        env.filter(|value| !value.trim().is_empty())
            .or(self.filter.as_deref())
            .unwrap_or(DEFAULT_FILTER)
            .to_string()
    }

    pub fn env_filter(&self) -> Result<EnvFilter, ObservabilityError> {
        let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
        Ok(EnvFilter::try_new(self.directives(env.as_deref()))?)
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init(config: &LogConfig) -> Result<(), ObservabilityError> {
    let filter = config.env_filter()?;
    let registry = tracing_subscriber::registry().with(filter);
    match config.format {
        LogFormat::Plain => registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init()?,
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init()?,
    }
    tracing::debug!(format = %config.format, "tracing initialised");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_env_wins_over_config() {
        let config = LogConfig {
            filter: Some("debug".into()),
            ..LogConfig::default()
        };
        assert_eq!(config.directives(Some("trace")), "trace");
        assert_eq!(config.directives(Some("  ")), "debug");
        assert_eq!(config.directives(None), "debug");
        assert_eq!(LogConfig::default().directives(None), DEFAULT_FILTER);
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Plain);
        let err = "yaml".parse::<LogFormat>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "unknown log format `yaml` (expected `plain` or `json`)"
        );
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: LogConfig = serde_json::from_str(r#"{"format": "json"}"#).unwrap();
        assert_eq!(
            config,
            LogConfig {
                filter: None,
                format: LogFormat::Json,
            }
        );
    }

    #[test]
    fn test_invalid_directive_is_reported() {
        let err = EnvFilter::try_new("jobtree=loud").map_err(ObservabilityError::from);
        assert!(matches!(err, Err(ObservabilityError::InvalidFilter(_))));
    }

    #[test]
    fn test_second_init_fails() {
        let config = LogConfig {
            filter: Some("off".into()),
            format: LogFormat::Plain,
        };
        assert!(init(&config).is_ok());
        let second = init(&config);
        assert!(matches!(second, Err(ObservabilityError::AlreadyInitialized(_))));
    }
}
