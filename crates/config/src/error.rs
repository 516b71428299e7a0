//! Configuration error types

/// Result alias for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors produced while loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}
