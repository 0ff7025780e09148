use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable overriding [`ResolverConfig::cache_root`].
pub const CACHE_ROOT_ENV: &str = "LABCACHE_CACHE_ROOT";
/// Environment variable overriding [`ResolverConfig::archive_suffix`].
pub const ARCHIVE_SUFFIX_ENV: &str = "LABCACHE_ARCHIVE_SUFFIX";
/// Environment variable overriding [`ResolverConfig::tool_timeout_secs`]. An empty value disables the timeout.
pub const TOOL_TIMEOUT_SECS_ENV: &str = "LABCACHE_TOOL_TIMEOUT_SECS";

/// Resolver configuration.
///
/// Deserializable from a table such as:
///
/// ```toml
/// cache_root = "/var/cache/labcache"
/// archive_suffix = ".tar.gz"
/// tool_timeout_secs = 3600
/// ```
///
/// where every key is optional.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolverConfig {
  /// Directory holding derived files. Created on demand.
  pub cache_root: PathBuf,
  /// Suffix appended to fingerprints to form cache file names.
  pub archive_suffix: String,
  /// Seconds after which a running tool is killed. `None` lets tools run indefinitely.
  pub tool_timeout_secs: Option<u64>,
}

impl Default for ResolverConfig {
  fn default() -> Self {
    Self {
      cache_root: PathBuf::from("generated"),
      archive_suffix: ".tar.gz".to_string(),
      tool_timeout_secs: None,
    }
  }
}

impl ResolverConfig {
  #[inline]
  pub fn new(cache_root: impl Into<PathBuf>) -> Self {
    Self { cache_root: cache_root.into(), ..Self::default() }
  }

  #[inline]
  pub fn tool_timeout(&self) -> Option<Duration> { self.tool_timeout_secs.map(Duration::from_secs) }

  /// Parses configuration from TOML text.
  #[cfg(feature = "toml_config")]
  pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
    Ok(toml::from_str(text)?)
  }

  /// Reads and parses the TOML configuration file at `path`.
  #[cfg(feature = "toml_config")]
  pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
    Self::from_toml_str(&text)
  }

  /// Overrides fields with the `LABCACHE_*` environment variables that are set.
  pub fn apply_env(self) -> Result<Self, ConfigError> {
    self.apply_env_from(|key| env::var(key).ok())
  }

  /// Overrides fields with the values `lookup` returns for the `LABCACHE_*` variable names.
  pub fn apply_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
    if let Some(cache_root) = lookup(CACHE_ROOT_ENV) {
      self.cache_root = PathBuf::from(cache_root);
    }
    if let Some(archive_suffix) = lookup(ARCHIVE_SUFFIX_ENV) {
      self.archive_suffix = archive_suffix;
    }
    if let Some(timeout) = lookup(TOOL_TIMEOUT_SECS_ENV) {
      let timeout = timeout.trim();
      self.tool_timeout_secs = if timeout.is_empty() {
        None
      } else {
        let secs = timeout.parse()
          .map_err(|_| ConfigError::InvalidEnv { key: TOOL_TIMEOUT_SECS_ENV, value: timeout.to_string() })?;
        Some(secs)
      };
    }
    Ok(self)
  }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("cannot read configuration file '{}'", .path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[cfg(feature = "toml_config")]
  #[error("invalid configuration")]
  Parse(#[from] toml::de::Error),
  #[error("environment variable {key} has invalid value '{value}'")]
  InvalidEnv {
    key: &'static str,
    value: String,
  },
}
