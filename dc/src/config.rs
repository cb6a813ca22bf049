//! dbcoord configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Main dbcoord configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Coordination bus settings
    pub bus: BusConfig,

    /// Relay broker settings
    pub relay: RelayConfig,

    /// Client proxy settings
    pub client: ClientConfig,

    /// Owner candidate settings
    pub candidate: CandidateConfig,

    /// Named lock backend
    pub lock: LockConfig,

    /// Database engine backend
    pub engine: EngineConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .dbcoord.yml
        let local_config = PathBuf::from(".dbcoord.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/dbcoord/dbcoord.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("dbcoord").join("dbcoord.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is set up
    ///
    /// Errors are swallowed: a broken config file is reported properly by
    /// [`Config::load`] once logging works.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let candidates: Vec<PathBuf> = match config_path {
            Some(path) => vec![path.clone()],
            None => {
                let mut paths = vec![PathBuf::from(".dbcoord.yml")];
                if let Some(config_dir) = dirs::config_dir() {
                    paths.push(config_dir.join("dbcoord").join("dbcoord.yml"));
                }
                paths
            }
        };

        candidates
            .iter()
            .filter(|p| p.exists())
            .find_map(|p| Self::load_from_file(p).ok())
            .and_then(|c| c.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Coordination bus settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Messages a slow subscriber may fall behind before it starts missing some
    pub capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

/// Relay broker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Channel buffer size for relay requests
    #[serde(rename = "channel-buffer")]
    pub channel_buffer: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self { channel_buffer: 256 }
    }
}

/// Client proxy settings, including the reconnect policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Consecutive failed attempts before ResourceUnavailable is surfaced
    #[serde(rename = "max-attempts", default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff before the first retry, in milliseconds
    #[serde(rename = "initial-backoff-ms", default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound on the backoff, in milliseconds
    #[serde(rename = "max-backoff-ms", default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Add up to 25% random jitter to each backoff
    #[serde(default)]
    pub jitter: bool,

    /// How long one discovery or handoff attempt may take, in milliseconds
    #[serde(rename = "handoff-timeout-ms", default = "default_handoff_timeout_ms")]
    pub handoff_timeout_ms: u64,

    /// Channel buffer size for proxy commands
    #[serde(rename = "channel-buffer", default = "default_client_channel_buffer")]
    pub channel_buffer: usize,
}

fn default_max_attempts() -> u32 {
    debug!("default_max_attempts: called");
    5
}

fn default_initial_backoff_ms() -> u64 {
    debug!("default_initial_backoff_ms: called");
    50
}

fn default_max_backoff_ms() -> u64 {
    debug!("default_max_backoff_ms: called");
    2_000
}

fn default_handoff_timeout_ms() -> u64 {
    debug!("default_handoff_timeout_ms: called");
    1_000
}

fn default_client_channel_buffer() -> usize {
    debug!("default_client_channel_buffer: called");
    256
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 50,
            max_backoff_ms: 2_000,
            jitter: false,
            handoff_timeout_ms: 1_000,
            channel_buffer: 256,
        }
    }
}

impl ClientConfig {
    /// Get the handoff timeout as a Duration
    pub fn handoff_timeout(&self) -> Duration {
        Duration::from_millis(self.handoff_timeout_ms)
    }

    /// Build the retry policy described by this config
    pub fn retry_policy(&self) -> crate::client::RetryPolicy {
        crate::client::RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            jitter: self.jitter,
        }
    }
}

/// Owner candidate settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CandidateConfig {
    /// Resources to serve; empty means any requested resource
    pub serves: Vec<String>,

    /// Resources to try to own immediately at startup
    pub eager: Vec<String>,

    /// Channel buffer size for each handed-off data channel
    #[serde(rename = "endpoint-buffer")]
    pub endpoint_buffer: usize,

    /// Channel buffer size for handoff requests forwarded by the relay
    #[serde(rename = "provider-buffer")]
    pub provider_buffer: usize,

    /// Channel buffer size for candidate commands
    #[serde(rename = "channel-buffer")]
    pub channel_buffer: usize,
}

impl Default for CandidateConfig {
    fn default() -> Self {
        Self {
            serves: Vec::new(),
            eager: Vec::new(),
            endpoint_buffer: 64,
            provider_buffer: 64,
            channel_buffer: 64,
        }
    }
}

/// Which named lock implementation to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockBackend {
    /// In-process lock table
    #[default]
    Local,
    /// OS advisory locks on files in `dir`
    File,
}

/// Named lock settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub backend: LockBackend,

    /// Directory for lock files (file backend)
    pub dir: PathBuf,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            backend: LockBackend::Local,
            dir: std::env::temp_dir().join("dbcoord").join("locks"),
        }
    }
}

/// Which database engine to serve resources with
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineBackend {
    /// Returns every payload unchanged
    #[default]
    Echo,
    /// Executes payloads as SQL against SQLite
    Sqlite,
}

/// Database engine settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub backend: EngineBackend,

    /// Directory for database files; in-memory databases when unset
    pub dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.bus.capacity, 1024);
        assert_eq!(config.relay.channel_buffer, 256);
        assert_eq!(config.client.max_attempts, 5);
        assert_eq!(config.client.handoff_timeout(), Duration::from_secs(1));
        assert_eq!(config.lock.backend, LockBackend::Local);
        assert_eq!(config.engine.backend, EngineBackend::Echo);
        assert!(config.candidate.serves.is_empty());
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
log-level: debug
client:
  max-attempts: 3
  handoff-timeout-ms: 250
lock:
  backend: file
  dir: /tmp/dbcoord-test-locks
engine:
  backend: sqlite
candidate:
  eager: [db1]
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.client.max_attempts, 3);
        assert_eq!(config.client.handoff_timeout_ms, 250);
        // Unset fields in a present section keep their defaults
        assert_eq!(config.client.initial_backoff_ms, 50);
        assert_eq!(config.client.max_backoff_ms, 2_000);
        assert_eq!(config.lock.backend, LockBackend::File);
        assert_eq!(config.lock.dir, PathBuf::from("/tmp/dbcoord-test-locks"));
        assert_eq!(config.engine.backend, EngineBackend::Sqlite);
        assert_eq!(config.candidate.eager, vec!["db1".to_string()]);
        assert_eq!(config.candidate.provider_buffer, 64);
    }

    #[test]
    fn test_retry_policy_from_config() {
        let config = ClientConfig {
            max_attempts: 7,
            initial_backoff_ms: 10,
            max_backoff_ms: 80,
            ..Default::default()
        };
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 7);
        assert_eq!(policy.initial_backoff, Duration::from_millis(10));
        assert_eq!(policy.max_backoff, Duration::from_millis(80));
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("dbcoord.yml");
        std::fs::write(&path, "log-level: warn\nbus:\n  capacity: 16\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.bus.capacity, 16);
        assert_eq!(Config::load_log_level(Some(&path)).as_deref(), Some("warn"));
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let path = PathBuf::from("/nonexistent/dbcoord.yml");
        assert!(Config::load(Some(&path)).is_err());
    }
}
