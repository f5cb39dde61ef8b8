// src/utils/config.rs
//! Layered runtime configuration
//!
//! Sources, lowest precedence first:
//!
//! 1. Built-in defaults
//! 2. `sentra-bus.{yaml,toml,json}` in the working directory (optional)
//! 3. The file named by `SENTRA_BUS_CONFIG` (optional)
//! 4. Environment variables, e.g. `SENTRA_BUS_LOGGING__LEVEL=debug`

use crate::utils::errors::{BusError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an extra configuration file
pub const CONFIG_PATH_ENV: &str = "SENTRA_BUS_CONFIG";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
    pub runtime: RuntimeConfig,
    pub simulation: SimulationSettings,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive (overridden by `RUST_LOG`)
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Prometheus exporter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,

    /// Address the exporter listens on
    pub listen_addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1:9464".to_string(),
        }
    }
}

/// Agent thread configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Stack size for each agent thread, in KiB
    pub thread_stack_kb: usize,

    /// How long shutdown waits for agents after a stop request, in seconds
    pub join_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            thread_stack_kb: 2048,
            join_timeout_secs: 10,
        }
    }
}

/// Simulation driver settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    /// Where reports are written; defaults to the fixture's directory
    pub output_dir: Option<PathBuf>,
}

impl BusConfig {
    /// Load configuration from the default locations and the environment
    pub fn load() -> Result<Self> {
        let extra = std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
        Self::load_from(extra.as_deref())
    }

    /// Load configuration, layering `path` over the working-directory file
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("sentra-bus").required(false));

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config: BusConfig = builder
            .add_source(
                config::Environment::with_prefix("SENTRA_BUS")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.runtime.thread_stack_kb == 0 {
            return Err(BusError::ConfigError(
                "runtime.thread_stack_kb must be greater than 0".to_string(),
            ));
        }

        if self.metrics.enabled {
            self.metrics_addr()?;
        }

        Ok(())
    }

    /// Parsed metrics listen address
    pub fn metrics_addr(&self) -> Result<SocketAddr> {
        self.metrics.listen_addr.parse().map_err(|e| {
            BusError::ConfigError(format!(
                "invalid metrics.listen_addr '{}': {}",
                self.metrics.listen_addr, e
            ))
        })
    }

    /// Agent thread stack size in bytes
    pub fn thread_stack_bytes(&self) -> usize {
        self.runtime.thread_stack_kb * 1024
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.runtime.join_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = BusConfig::default();
        assert_eq!(config.logging.level, "info");
        assert!(!config.metrics.enabled);
        assert_eq!(config.thread_stack_bytes(), 2048 * 1024);
        assert!(config.simulation.output_dir.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bus.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "logging:\n  level: debug\n  json: true\nruntime:\n  thread_stack_kb: 512").unwrap();

        let config = BusConfig::load_from(Some(&path)).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
        assert_eq!(config.runtime.thread_stack_kb, 512);
        assert_eq!(config.metrics.listen_addr, "127.0.0.1:9464");
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let result = BusConfig::load_from(Some(Path::new("/nonexistent/sentra-bus.yaml")));
        assert!(matches!(result, Err(BusError::ConfigError(_))));
    }

    #[test]
    fn test_validate_rejects_zero_stack() {
        let mut config = BusConfig::default();
        config.runtime.thread_stack_kb = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_metrics_addr() {
        let mut config = BusConfig::default();
        config.metrics.enabled = true;
        config.metrics.listen_addr = "not-an-address".to_string();
        assert!(config.validate().is_err());

        config.metrics.enabled = false;
        assert!(config.validate().is_ok());
    }
}
