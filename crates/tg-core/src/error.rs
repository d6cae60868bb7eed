//! Error types for configuration loading.

use std::path::PathBuf;

/// Errors raised while loading settings from disk
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("Failed to read config file {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("Failed to parse config file {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },
}
