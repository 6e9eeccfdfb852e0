//! TOML-based configuration persistence for the client application.
//!
//! Reads and writes `ClientConfig` to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\Bricklayer\config.toml`
//! - Linux:    `~/.config/bricklayer/config.toml`
//! - macOS:    `~/Library/Application Support/Bricklayer/config.toml`
//!
//! Example file:
//!
//! ```toml
//! [client]
//! username = "pyratron"
//! log_level = "debug"
//!
//! [network]
//! server_address = "play.example.net:14242"
//! auth_address = "auth.example.net:14241"
//! ```
//!
//! Every field has a serde default, so a missing file, a missing section, or
//! a file written by an older version all load cleanly.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::infrastructure::network::udp::UdpSettings;

const CONFIG_FILE_NAME: &str = "config.toml";

/// Failure while locating, reading or writing the client config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Neither the OS nor the environment names a config base directory.
    #[error("no config directory for this platform")]
    NoPlatformConfigDir,

    #[error("cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config file is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config could not be written as TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level client configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    #[serde(default)]
    pub client: ClientSettings,
    #[serde(default)]
    pub network: NetworkConfig,
}

/// Player identity and diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientSettings {
    /// Account name sent to the auth service.
    #[serde(default = "default_username")]
    pub username: String,
    /// Fallback `EnvFilter` directive when `RUST_LOG` is unset, e.g. `"info"`
    /// or `"brick_client=debug"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Endpoints and transport timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// Game server `host:port`.
    #[serde(default = "default_server_address")]
    pub server_address: String,
    /// Auth service `host:port`.  Resolved once at startup.
    #[serde(default = "default_auth_address")]
    pub auth_address: String,
    /// Local address for the UDP socket.  Port 0 picks any free port.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// How long to wait for the server to accept a connection.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Interval between latency pings while connected.
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
}

impl NetworkConfig {
    /// Transport timing derived from this config.
    pub fn udp_settings(&self) -> UdpSettings {
        UdpSettings {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            ping_interval: Duration::from_millis(self.ping_interval_ms),
        }
    }
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_username() -> String {
    "guest".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_server_address() -> String {
    "127.0.0.1:14242".to_string()
}
fn default_auth_address() -> String {
    "127.0.0.1:14241".to_string()
}
fn default_bind_address() -> String {
    "0.0.0.0:0".to_string()
}
fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_ping_interval_ms() -> u64 {
    1000
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            username: default_username(),
            log_level: default_log_level(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            server_address: default_server_address(),
            auth_address: default_auth_address(),
            bind_address: default_bind_address(),
            connect_timeout_ms: default_connect_timeout_ms(),
            ping_interval_ms: default_ping_interval_ms(),
        }
    }
}

// ── Load / save ───────────────────────────────────────────────────────────────

/// Directory holding `config.toml` for the current user.
///
/// # Errors
///
/// [`ConfigError::NoPlatformConfigDir`] if the relevant environment variable
/// (`APPDATA`, `XDG_CONFIG_HOME`/`HOME`) is unset or the OS is unsupported.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    let (base, app_dir) = platform_base_dir().ok_or(ConfigError::NoPlatformConfigDir)?;
    Ok(base.join(app_dir))
}

/// `config_dir()/config.toml`.
///
/// # Errors
///
/// Same as [`config_dir`].
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    config_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
}

/// Reads the user's config file.  A missing file yields the defaults.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<ClientConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Reads `path`.  A missing file yields the defaults.
///
/// # Errors
///
/// [`ConfigError::Io`] when the file exists but cannot be read, and
/// [`ConfigError::Parse`] when its content is not a valid config.
pub fn load_config_from(path: &Path) -> Result<ClientConfig, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ClientConfig::default()),
        Err(source) => return Err(io_error(path, source)),
    };
    Ok(toml::from_str(&content)?)
}

/// Writes `config` to the user's config file.
///
/// # Errors
///
/// See [`save_config_to`].
pub fn save_config(config: &ClientConfig) -> Result<(), ConfigError> {
    save_config_to(config, &config_file_path()?)
}

/// Writes `config` to `path`, creating missing parent directories.
///
/// # Errors
///
/// [`ConfigError::Serialize`] if `config` cannot be rendered, and
/// [`ConfigError::Io`] if a directory or the file cannot be written.
pub fn save_config_to(config: &ClientConfig, path: &Path) -> Result<(), ConfigError> {
    let rendered = toml::to_string_pretty(config)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
    }
    std::fs::write(path, rendered).map_err(|e| io_error(path, e))
}

fn io_error(path: &Path, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Per-user base directory and the application folder name used under it.
fn platform_base_dir() -> Option<(PathBuf, &'static str)> {
    let home = || std::env::var_os("HOME").map(PathBuf::from);
    if cfg!(target_os = "windows") {
        std::env::var_os("APPDATA").map(|p| (PathBuf::from(p), "Bricklayer"))
    } else if cfg!(target_os = "macos") {
        home().map(|h| (h.join("Library").join("Application Support"), "Bricklayer"))
    } else if cfg!(target_os = "linux") {
        std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| home().map(|h| h.join(".config")))
            .map(|base| (base, "bricklayer"))
    } else {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("brick_test_{}", Uuid::new_v4()))
            .join("config.toml")
    }

    #[test]
    fn test_client_config_default_has_expected_endpoints() {
        // Arrange / Act
        let cfg = ClientConfig::default();

        // Assert
        assert_eq!(cfg.network.server_address, "127.0.0.1:14242");
        assert_eq!(cfg.network.auth_address, "127.0.0.1:14241");
        assert_eq!(cfg.client.log_level, "info");
    }

    #[test]
    fn test_udp_settings_follow_millisecond_fields() {
        let mut cfg = NetworkConfig::default();
        cfg.connect_timeout_ms = 250;
        cfg.ping_interval_ms = 2000;

        let settings = cfg.udp_settings();

        assert_eq!(settings.connect_timeout, Duration::from_millis(250));
        assert_eq!(settings.ping_interval, Duration::from_secs(2));
    }

    #[test]
    fn test_deserialize_empty_toml_uses_defaults() {
        let cfg: ClientConfig = toml::from_str("").expect("deserialize empty");
        assert_eq!(cfg, ClientConfig::default());
    }

    #[test]
    fn test_partial_network_section_keeps_other_defaults() {
        // Arrange
        let toml_str = r#"
[network]
auth_address = "auth.example.net:9000"
"#;

        // Act
        let cfg: ClientConfig = toml::from_str(toml_str).expect("deserialize partial");

        // Assert
        assert_eq!(cfg.network.auth_address, "auth.example.net:9000");
        assert_eq!(cfg.network.connect_timeout_ms, 5000);
        assert_eq!(cfg.client.username, "guest");
    }

    #[test]
    fn test_load_rejects_malformed_file() {
        let path = temp_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[[[ not valid toml").unwrap();

        let result = load_config_from(&path);

        assert!(matches!(result, Err(ConfigError::Parse(_))));
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_missing_file_loads_defaults() {
        // Never created.
        let path = temp_path();
        assert_eq!(load_config_from(&path).unwrap(), ClientConfig::default());
    }

    #[test]
    fn test_saved_config_loads_back_unchanged() {
        // Arrange
        let path = temp_path();
        let mut cfg = ClientConfig::default();
        cfg.client.username = "pyratron".to_string();
        cfg.network.ping_interval_ms = 250;

        // Act
        save_config_to(&cfg, &path).unwrap();
        let loaded = load_config_from(&path).unwrap();

        // Assert
        assert_eq!(loaded, cfg);

        // Cleanup
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_config_path_is_inside_config_dir() {
        // Either both resolve or neither does.
        match (config_dir(), config_file_path()) {
            (Ok(dir), Ok(file)) => assert_eq!(file, dir.join("config.toml")),
            (Err(_), Err(_)) => {}
            other => panic!("inconsistent config paths: {other:?}"),
        }
    }
}
