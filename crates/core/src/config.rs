//! Harness configuration via `casprobe.toml`
//!
//! Every field has a default, so an empty file (or no file at all) gives a
//! full-length run. To change a run, edit the file; `seed` makes a failing
//! workload reproducible.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};

/// Config file name looked up by the harness.
pub const CONFIG_FILE_NAME: &str = "casprobe.toml";

/// Workload generator settings (`[workload]`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkloadConfig {
    /// Operations issued per workload run
    #[serde(default = "default_iterations")]
    pub iterations: usize,
    /// Size of the key/value pool
    #[serde(default = "default_key_count")]
    pub key_count: usize,
    /// Length of each generated key/value string
    #[serde(default = "default_string_length")]
    pub string_length: usize,
    /// RNG seed; a random seed is chosen (and logged) when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

fn default_iterations() -> usize {
    2137
}

fn default_key_count() -> usize {
    42
}

fn default_string_length() -> usize {
    10
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            iterations: default_iterations(),
            key_count: default_key_count(),
            string_length: default_string_length(),
            seed: None,
        }
    }
}

/// Log watcher settings (`[log]`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogConfig {
    /// Default bound for a log wait, in seconds
    #[serde(default = "default_wait_timeout_secs")]
    pub wait_timeout_secs: u64,
    /// Pause between re-reads once the end of the file is reached
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Worker threads dedicated to blocking log reads
    #[serde(default = "default_read_threads")]
    pub read_threads: usize,
    /// Prefix a genuine server log starts with
    #[serde(default = "default_sentinel")]
    pub sentinel: String,
}

fn default_wait_timeout_secs() -> u64 {
    600
}

fn default_poll_interval_ms() -> u64 {
    10
}

fn default_read_threads() -> usize {
    4
}

fn default_sentinel() -> String {
    "Scylla ".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            wait_timeout_secs: default_wait_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            read_threads: default_read_threads(),
            sentinel: default_sentinel(),
        }
    }
}

impl LogConfig {
    /// Default wait bound as a `Duration`
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    /// EOF poll interval as a `Duration`
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Server endpoint settings (`[endpoints]`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndpointConfig {
    /// Port the query interface listens on; used to find the server process
    #[serde(default = "default_cql_port")]
    pub cql_port: u16,
    /// Port of the REST API hosting error injection
    #[serde(default = "default_rest_port")]
    pub rest_port: u16,
    /// Per-request REST timeout in milliseconds
    #[serde(default = "default_rest_timeout_ms")]
    pub rest_timeout_ms: u64,
}

fn default_cql_port() -> u16 {
    9042
}

fn default_rest_port() -> u16 {
    10000
}

fn default_rest_timeout_ms() -> u64 {
    30_000
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            cql_port: default_cql_port(),
            rest_port: default_rest_port(),
            rest_timeout_ms: default_rest_timeout_ms(),
        }
    }
}

impl EndpointConfig {
    /// REST timeout as a `Duration`
    pub fn rest_timeout(&self) -> Duration {
        Duration::from_millis(self.rest_timeout_ms)
    }
}

/// Harness configuration loaded from `casprobe.toml`.
///
/// # Example
///
/// ```toml
/// [workload]
/// iterations = 2137
/// seed = 7
///
/// [log]
/// wait_timeout_secs = 600
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct HarnessConfig {
    /// Workload generator settings
    #[serde(default)]
    pub workload: WorkloadConfig,
    /// Log watcher settings
    #[serde(default)]
    pub log: LogConfig,
    /// Server endpoint settings
    #[serde(default)]
    pub endpoints: EndpointConfig,
}

impl HarnessConfig {
    /// Check values that would make a run meaningless.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.workload.key_count == 0 {
            return Err(Error::Config(
                "workload.key_count must be at least 1".to_string(),
            ));
        }
        if self.workload.string_length == 0 {
            return Err(Error::Config(
                "workload.string_length must be at least 1".to_string(),
            ));
        }
        if self.log.read_threads == 0 {
            return Err(Error::Config(
                "log.read_threads must be at least 1".to_string(),
            ));
        }
        if self.log.sentinel.is_empty() {
            return Err(Error::Config("log.sentinel must not be empty".to_string()));
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# casprobe harness configuration

[workload]
# Operations per workload run
iterations = 2137
# Number of distinct strings used as keys and values
key_count = 42
# Length of each generated string
string_length = 10
# Fix the RNG seed to replay a failing run
# seed = 12345

[log]
# Upper bound for a single log wait, in seconds
wait_timeout_secs = 600
# Pause before re-reading at end of file, in milliseconds
poll_interval_ms = 10
# Worker threads performing blocking log reads
read_threads = 4
# First bytes of a genuine server log
sentinel = "Scylla "

[endpoints]
cql_port = 9042
rest_port = 10000
rest_timeout_ms = 30000
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: HarnessConfig = toml::from_str(&content).map_err(|e| {
            Error::Config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            debug!(target: "casprobe::config", path = %path.display(), "no config file; using defaults");
            Ok(Self::default())
        }
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                Error::Config(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::Config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_matches_original_run() {
        let config = HarnessConfig::default();
        assert_eq!(config.workload.iterations, 2137);
        assert_eq!(config.workload.key_count, 42);
        assert_eq!(config.workload.string_length, 10);
        assert!(config.workload.seed.is_none());
        assert_eq!(config.log.sentinel, "Scylla ");
        assert_eq!(config.endpoints.cql_port, 9042);
        config.validate().unwrap();
    }

    #[test]
    fn default_toml_parses_to_defaults() {
        let config: HarnessConfig = toml::from_str(HarnessConfig::default_toml()).unwrap();
        assert_eq!(config, HarnessConfig::default());
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config: HarnessConfig = toml::from_str("[workload]\nseed = 7\n").unwrap();
        assert_eq!(config.workload.seed, Some(7));
        assert_eq!(config.workload.iterations, 2137);
        assert_eq!(config.log.wait_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn zero_key_count_rejected() {
        let config: HarnessConfig = toml::from_str("[workload]\nkey_count = 0\n").unwrap();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn write_default_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        assert!(!path.exists());

        HarnessConfig::write_default_if_missing(&path).unwrap();
        assert!(path.exists());

        let config = HarnessConfig::from_file(&path).unwrap();
        assert_eq!(config.log.read_threads, 4);
    }

    #[test]
    fn write_default_does_not_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[log]\nread_threads = 2\n").unwrap();

        HarnessConfig::write_default_if_missing(&path).unwrap();

        let config = HarnessConfig::from_file(&path).unwrap();
        assert_eq!(config.log.read_threads, 2);
    }

    #[test]
    fn from_file_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "workload = 3").unwrap();
        assert!(matches!(
            HarnessConfig::from_file(&path),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn load_or_default_without_file() {
        let dir = TempDir::new().unwrap();
        let config = HarnessConfig::load_or_default(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config, HarnessConfig::default());
    }

    #[test]
    fn write_to_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        let mut config = HarnessConfig::default();
        config.workload.seed = Some(99);
        config.endpoints.rest_port = 10001;

        config.write_to_file(&path).unwrap();
        let loaded = HarnessConfig::from_file(&path).unwrap();
        assert_eq!(loaded.workload.seed, Some(99));
        assert_eq!(loaded.endpoints.rest_port, 10001);
    }
}
