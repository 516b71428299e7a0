//! Relay daemon configuration
//!
//! TOML-based configuration loading with sensible defaults. Listener and
//! forwarder instances are named sections carrying a `type` tag plus a
//! free-form option map; option values are coerced best-effort by the
//! component that consumes them.
//!
//! # Example
//!
//! ```toml
//! [listeners.udp_in]
//! type = "UDP"
//! port = "19192"
//!
//! [forwarders.kafka_out]
//! type = "Kafka"
//! brokers = ["localhost:9092"]
//! acks = "1"
//!
//! [internal_server]
//! port = 19090
//! path = "/metrics"
//! ```

mod error;
mod options;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

pub use error::{ConfigError, Result};
pub use options::Options;

/// Default internal metrics server port.
const DEFAULT_INTERNAL_PORT: u16 = 19090;

/// Default internal metrics server path.
const DEFAULT_METRICS_PATH: &str = "/metrics";

/// Main configuration structure
///
/// All sections are optional; an empty file yields a daemon with no
/// listeners and no forwarders.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,

    /// Internal metrics server configuration
    pub internal_server: InternalServerConfig,

    /// Listener instances, keyed by unique instance name
    pub listeners: BTreeMap<String, InstanceConfig>,

    /// Forwarder instances, keyed by unique instance name
    pub forwarders: BTreeMap<String, InstanceConfig>,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or contains invalid TOML.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_str(&contents)
    }

    /// Names of all configured listeners
    ///
    /// Every forwarder allocates an input channel for each of these names;
    /// this set is the global subscription surface the fabric consults.
    pub fn listener_names(&self) -> Vec<String> {
        self.listeners.keys().cloned().collect()
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(ConfigError::Parse)
    }
}

/// One configured listener or forwarder instance
///
/// The `type` tag selects the registered constructor; all remaining keys
/// form the instance's option map.
#[derive(Debug, Clone, Deserialize)]
pub struct InstanceConfig {
    /// Registered type name ("UDP", "TCP", "Kafka", ...)
    #[serde(rename = "type")]
    pub kind: String,

    /// Free-form per-instance options
    #[serde(flatten)]
    pub options: Options,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

/// Internal metrics server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InternalServerConfig {
    /// Listen port (0 binds an ephemeral port)
    pub port: u16,

    /// HTTP path serving the metrics document
    pub path: String,
}

impl Default for InternalServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_INTERNAL_PORT,
            path: DEFAULT_METRICS_PATH.into(),
        }
    }
}
