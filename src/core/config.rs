use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    pub tracker: Option<TrackerConfig>,
    pub admin: Option<AdminConfig>,
    pub peer: Option<PeerConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    pub port: u16,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    /// Read operator commands from stdin
    #[serde(default = "default_true")]
    pub console: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_admin_bind_address")]
    pub bind_address: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PeerConfig {
    /// `host:port` of the tracker's control listener
    pub tracker_address: String,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Transfer port; a random one in 10000..20000 when absent
    pub port: Option<u16>,
    /// Peer identity; `<shared dir name>_<port>` when absent
    pub id: Option<String>,
    pub shared_dir: PathBuf,
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default)]
    pub console: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            num_threads: default_num_threads(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            console: false,
        }
    }
}

impl TrackerConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl PeerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

// Default value functions
fn default_num_threads() -> usize {
    num_cpus::get()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_admin_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_shutdown_grace_ms() -> u64 {
    2_000
}

fn default_true() -> bool {
    true
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("download")
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_io_timeout_ms() -> u64 {
    30_000
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "console".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config file")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.runtime.num_threads == 0 {
            bail!("num_threads must be greater than 0");
        }

        if let Some(tracker) = &self.tracker {
            if tracker.port == 0 {
                bail!("tracker port must be greater than 0");
            }
        }

        if let Some(admin) = &self.admin {
            if admin.port == 0 {
                bail!("admin port must be greater than 0");
            }
            if let Some(tracker) = &self.tracker {
                if admin.port == tracker.port && admin.bind_address == tracker.bind_address {
                    bail!("admin port must differ from the tracker port");
                }
            }
        }

        if let Some(peer) = &self.peer {
            if peer.tracker_address.is_empty() {
                bail!("tracker_address must not be empty");
            }
            if peer.port == Some(0) {
                bail!("peer port must be greater than 0");
            }
            if let Some(id) = &peer.id {
                if id.is_empty() || id.chars().any(char::is_whitespace) {
                    bail!("peer id must be non-empty and contain no whitespace");
                }
            }
            if peer.connect_timeout_ms == 0 || peer.io_timeout_ms == 0 {
                bail!("peer timeouts must be greater than 0");
            }
            if peer.poll_interval_ms == 0 {
                bail!("poll_interval_ms must be greater than 0");
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            bail!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            );
        }

        let valid_formats = ["json", "console"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            bail!(
                "Invalid log format '{}'. Must be one of: json, console",
                self.logging.format
            );
        }

        Ok(())
    }

    pub fn tracker(&self) -> Result<&TrackerConfig> {
        self.tracker
            .as_ref()
            .context("Missing [tracker] section in config")
    }

    pub fn peer(&self) -> Result<&PeerConfig> {
        self.peer.as_ref().context("Missing [peer] section in config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_config_defaults() {
        let config = Config::from_toml(
            r#"
            [tracker]
            port = 9000
            "#,
        )
        .unwrap();

        let tracker = config.tracker().unwrap();
        assert_eq!(tracker.port, 9000);
        assert_eq!(tracker.bind_address, "0.0.0.0");
        assert_eq!(tracker.shutdown_grace(), Duration::from_secs(2));
        assert!(config.admin.is_none());
        assert!(config.peer().is_err());
        assert_eq!(config.logging.level, "info");
        assert!(config.runtime.num_threads > 0);
    }

    #[test]
    fn test_peer_config_defaults() {
        let config = Config::from_toml(
            r#"
            [peer]
            tracker_address = "127.0.0.1:9000"
            shared_dir = "shared/files/repo1"
            "#,
        )
        .unwrap();

        let peer = config.peer().unwrap();
        assert_eq!(peer.port, None);
        assert_eq!(peer.id, None);
        assert_eq!(peer.download_dir, PathBuf::from("download"));
        assert_eq!(peer.connect_timeout(), Duration::from_secs(5));
        assert_eq!(peer.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_rejects_zero_port() {
        let result = Config::from_toml(
            r#"
            [tracker]
            port = 0
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_admin_on_tracker_port() {
        let result = Config::from_toml(
            r#"
            [tracker]
            bind_address = "127.0.0.1"
            port = 9000

            [admin]
            port = 9000
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_peer_id_with_whitespace() {
        let result = Config::from_toml(
            r#"
            [peer]
            tracker_address = "127.0.0.1:9000"
            shared_dir = "shared"
            id = "two words"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_unknown_log_format() {
        let result = Config::from_toml(
            r#"
            [tracker]
            port = 9000

            [logging]
            format = "xml"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_bundled_config_loads() {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config.toml");
        let config = Config::from_file(&path).expect("Failed to load config");

        assert!(config.tracker().is_ok());
        assert!(config.peer().is_ok());
    }
}
