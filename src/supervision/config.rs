//! Supervised loop configuration.
//!
//! ```toml
//! name = "flush-rule"
//! fault_backoff_ms = 250
//! ```
//!
//! Missing keys take their defaults: no name, no backoff (the loop only
//! yields once after a fault).

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[cfg(feature = "config-file")]
use crate::error::{Error, ErrorKind, Result};

/// Settings shared by every instance a [`Supervised`](super::Supervised)
/// or [`Rule`](crate::rule::Rule) starts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoopConfig {
    /// Label attached to every log event of the loop.
    pub name: Option<String>,
    /// Pause after a faulted iteration, in milliseconds. Zero yields once.
    pub fault_backoff_ms: u64,
}

impl LoopConfig {
    /// Config with a name and no backoff.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Sets the pause after a faulted iteration.
    #[must_use]
    pub fn with_fault_backoff(mut self, backoff: Duration) -> Self {
        self.fault_backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// The pause after a faulted iteration, if any.
    #[must_use]
    pub fn fault_backoff(&self) -> Option<Duration> {
        (self.fault_backoff_ms > 0).then(|| Duration::from_millis(self.fault_backoff_ms))
    }

    /// Name used in log events.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("anonymous")
    }

    /// Parses a config from TOML.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| {
            Error::new(ErrorKind::Config)
                .with_message(format!("failed to parse loop config: {e}"))
                .with_source(e)
        })
    }

    /// Reads and parses a TOML config file.
    #[cfg(feature = "config-file")]
    pub fn from_toml_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::new(ErrorKind::Config)
                .with_message(format!("failed to read config file {}: {e}", path.display()))
                .with_source(e)
        })?;
        Self::from_toml_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_mean_yield_only() {
        let config = LoopConfig::default();
        assert_eq!(config.fault_backoff(), None);
        assert_eq!(config.display_name(), "anonymous");
    }

    #[test]
    fn backoff_round_trips_through_millis() {
        let config = LoopConfig::named("ticker").with_fault_backoff(Duration::from_millis(250));
        assert_eq!(config.fault_backoff_ms, 250);
        assert_eq!(config.fault_backoff(), Some(Duration::from_millis(250)));
        assert_eq!(config.display_name(), "ticker");
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: LoopConfig = toml::from_str("fault_backoff_ms = 10").expect("valid toml");
        assert_eq!(config.name, None);
        assert_eq!(config.fault_backoff_ms, 10);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let parsed: std::result::Result<LoopConfig, _> = toml::from_str("backoff = 10");
        assert!(parsed.is_err());
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn from_toml_str_reports_config_errors() {
        let config = LoopConfig::from_toml_str("name = \"flush\"\nfault_backoff_ms = 5\n")
            .expect("valid config");
        assert_eq!(config, LoopConfig::named("flush").with_fault_backoff(Duration::from_millis(5)));

        let err = LoopConfig::from_toml_str("fault_backoff_ms = \"soon\"").expect_err("bad type");
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}
