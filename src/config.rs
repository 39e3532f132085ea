//! ==============================================================================
//! config.rs - runtime configuration loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `ingest.toml`.
//!     loads configuration from file or falls back to defaults. secrets and
//!     the endpoint can be overridden from the environment (see main.rs).
//!
//! structure:
//!     - ServerConfig: where the http listener binds.
//!     - IngestSettings: first-error vs collect validation.
//!     - StorageConfig: which sink to use and how to reach influxdb.
//!     - LoggingConfig: default log filter.
//!
//! ==============================================================================

use crate::ingest::ValidationMode;

use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct IngestConfig {
    pub server: ServerConfig,
    pub ingest: IngestSettings,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { listen: "0.0.0.0:8080".to_string() }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct IngestSettings {
    pub validation: ValidationMode,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Influxdb,
    Log,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: Backend,
    pub influxdb: InfluxConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct InfluxConfig {
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
    /// line protocol measurement name
    pub measurement: String,
    /// lines per http write
    pub batch_size: usize,
    pub flush_interval_ms: u64,
    /// lines waiting for the writer before requests get 503
    pub queue_capacity: usize,
    pub error_capacity: usize,
    pub timeout_seconds: u64,
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8086".to_string(),
            token: String::new(),
            org: "airquality".to_string(),
            bucket: "airquality".to_string(),
            measurement: "airquality".to_string(),
            batch_size: 500,
            flush_interval_ms: 1000,
            queue_capacity: 10_000,
            error_capacity: 64,
            timeout_seconds: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

impl IngestConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        Self::parse(&content).with_context(|| format!("Failed to parse config {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// First config file found in the usual places, if any.
    ///
    /// Runs before logging is set up, so it stays quiet; main.rs reports
    /// which file (if any) was used.
    pub fn locate() -> Option<PathBuf> {
        [
            PathBuf::from("config").join("ingest.toml"),
            PathBuf::from("..").join("config").join("ingest.toml"),
        ]
        .into_iter()
        .find(|path| path.exists())
    }

    /// Log configuration summary (never the token)
    pub fn log_summary(&self) {
        tracing::info!("┌─────────────────────────────────────────┐");
        tracing::info!("│          INGEST CONFIGURATION           │");
        tracing::info!("├─────────────────────────────────────────┤");
        tracing::info!("│ Listen: {}", self.server.listen);
        tracing::info!("│ Validation: {:?}", self.ingest.validation);
        tracing::info!("│ Backend: {:?}", self.storage.backend);
        if self.storage.backend == Backend::Influxdb {
            let influx = &self.storage.influxdb;
            tracing::info!("│ InfluxDB: {} ({}/{})", influx.url, influx.org, influx.bucket);
            tracing::info!("│ Token set: {}", !influx.token.is_empty());
        }
        tracing::info!("│ Log Level: {}", self.logging.level);
        tracing::info!("└─────────────────────────────────────────┘");
    }
}
