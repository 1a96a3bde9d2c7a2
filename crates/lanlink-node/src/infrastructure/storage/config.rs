//! TOML-based configuration persistence for the LanLink node.
//!
//! Reads and writes [`AppConfig`] to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\LanLink\config.toml`
//! - Linux:    `~/.config/lanlink/config.toml`
//! - macOS:    `~/Library/Application Support/LanLink/config.toml`
//!
//! Every field carries a `#[serde(default = "...")]`, and every section is
//! optional, so an empty file, a missing file, and a file written by an older
//! version all load.
//!
//! ```toml
//! [node]
//! name = "alice-laptop"
//! download_dir = "/home/alice/Downloads"
//!
//! [network]
//! listen_port = 5000
//! discovery_port = 8888
//!
//! [timing]
//! heartbeat_interval_ms = 2000
//! liveness_timeout_ms = 20000
//! ```

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lanlink_core::domain::transfer::DEFAULT_CHUNK_SIZE;
use lanlink_core::protocol::discovery::DEFAULT_DISCOVERY_PORT;
use lanlink_core::protocol::frame::DEFAULT_PEER_PORT;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value parsed but makes no sense (e.g. a zero interval).
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level application configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
}

/// Identity and local behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeConfig {
    /// Name announced in discovery datagrams.
    #[serde(default = "default_name")]
    pub name: String,
    /// `tracing` level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Where received files are stored.  Defaults to `~/Downloads`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_dir: Option<PathBuf>,
}

/// Ports and addresses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// TCP port peers connect to.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// UDP port for presence broadcasts.
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// IP address to bind both sockets to.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Destination of presence broadcasts.
    #[serde(default = "default_broadcast_address")]
    pub broadcast_address: String,
    /// Address this node identifies itself by.  Detected when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advertise_address: Option<String>,
    /// Dial discovered peers automatically when the tie-break elects us.
    #[serde(default = "default_true")]
    pub auto_connect: bool,
}

/// Timers, all in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimingConfig {
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_liveness_timeout_ms")]
    pub liveness_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_broadcast_interval_ms")]
    pub broadcast_interval_ms: u64,
    #[serde(default = "default_registry_expiry_ms")]
    pub registry_expiry_ms: u64,
    #[serde(default = "default_ack_interval_ms")]
    pub ack_interval_ms: u64,
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
}

/// File transfer tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransferConfig {
    /// Bytes read or written per file chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Pending outbound sends per peer before senders wait.
    #[serde(default = "default_outbound_queue_depth")]
    pub outbound_queue_depth: usize,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_name() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| "lanlink".to_string())
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_listen_port() -> u16 {
    DEFAULT_PEER_PORT
}
fn default_discovery_port() -> u16 {
    DEFAULT_DISCOVERY_PORT
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_broadcast_address() -> String {
    "255.255.255.255".to_string()
}
fn default_true() -> bool {
    true
}
fn default_heartbeat_interval_ms() -> u64 {
    2_000
}
fn default_liveness_timeout_ms() -> u64 {
    20_000
}
fn default_connect_timeout_ms() -> u64 {
    2_000
}
fn default_broadcast_interval_ms() -> u64 {
    4_000
}
fn default_registry_expiry_ms() -> u64 {
    10_000
}
fn default_ack_interval_ms() -> u64 {
    1_000
}
fn default_progress_interval_ms() -> u64 {
    500
}
fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_outbound_queue_depth() -> usize {
    32
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            download_dir: None,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            discovery_port: default_discovery_port(),
            bind_address: default_bind_address(),
            broadcast_address: default_broadcast_address(),
            advertise_address: None,
            auto_connect: default_true(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            liveness_timeout_ms: default_liveness_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            broadcast_interval_ms: default_broadcast_interval_ms(),
            registry_expiry_ms: default_registry_expiry_ms(),
            ack_interval_ms: default_ack_interval_ms(),
            progress_interval_ms: default_progress_interval_ms(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            outbound_queue_depth: default_outbound_queue_depth(),
        }
    }
}

// ── Derived values ────────────────────────────────────────────────────────────

impl NodeConfig {
    /// Returns the configured download directory, or `~/Downloads`, or a
    /// `lanlink-downloads` directory under the system temp dir when no home
    /// directory is known.
    pub fn resolved_download_dir(&self) -> PathBuf {
        if let Some(dir) = &self.download_dir {
            return dir.clone();
        }
        std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(|home| PathBuf::from(home).join("Downloads"))
            .unwrap_or_else(|| std::env::temp_dir().join("lanlink-downloads"))
    }
}

impl NetworkConfig {
    /// Parses `bind_address`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if it is not an IP address.
    pub fn bind_ip(&self) -> Result<IpAddr, ConfigError> {
        parse_ip("network.bind_address", &self.bind_address)
    }

    /// Parses `broadcast_address`.
    pub fn broadcast_ip(&self) -> Result<IpAddr, ConfigError> {
        parse_ip("network.broadcast_address", &self.broadcast_address)
    }
}

impl TimingConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms)
    }
    pub fn registry_expiry(&self) -> Duration {
        Duration::from_millis(self.registry_expiry_ms)
    }
    pub fn ack_interval(&self) -> Duration {
        Duration::from_millis(self.ack_interval_ms)
    }
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

impl AppConfig {
    /// Rejects values that would stall the node: zero-length timers (tokio
    /// intervals panic on zero), a zero chunk size, or a zero queue depth.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let timers = [
            ("timing.heartbeat_interval_ms", self.timing.heartbeat_interval_ms),
            ("timing.liveness_timeout_ms", self.timing.liveness_timeout_ms),
            ("timing.connect_timeout_ms", self.timing.connect_timeout_ms),
            ("timing.broadcast_interval_ms", self.timing.broadcast_interval_ms),
            ("timing.ack_interval_ms", self.timing.ack_interval_ms),
            ("transfer.chunk_size", self.transfer.chunk_size as u64),
            ("transfer.outbound_queue_depth", self.transfer.outbound_queue_depth as u64),
        ];
        if let Some((field, _)) = timers.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Invalid {
                field: *field,
                reason: "must be greater than zero".to_string(),
            });
        }
        self.network.bind_ip()?;
        self.network.broadcast_ip()?;
        Ok(())
    }
}

fn parse_ip(field: &'static str, value: &str) -> Result<IpAddr, ConfigError> {
    value.parse().map_err(|_| ConfigError::Invalid {
        field,
        reason: format!("'{value}' is not an IP address"),
    })
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from the platform path, returning defaults if the file
/// does not yet exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `AppConfig` from `path`, returning defaults if it does not exist.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Persists `config` to the platform path.
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_config_to(config, &config_file_path()?)
}

/// Persists `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolves the platform config base directory including the app subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("LanLink"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("lanlink"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("LanLink")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("lanlink_cfg_{}", uuid::Uuid::new_v4()))
    }

    // ── Defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn test_app_config_default_has_expected_ports() {
        // Arrange / Act
        let cfg = AppConfig::default();

        // Assert
        assert_eq!(cfg.network.listen_port, 5000);
        assert_eq!(cfg.network.discovery_port, 8888);
        assert_eq!(cfg.network.broadcast_address, "255.255.255.255");
    }

    #[test]
    fn test_timing_config_default_matches_documented_values() {
        let t = TimingConfig::default();
        assert_eq!(t.heartbeat_interval(), Duration::from_secs(2));
        assert_eq!(t.liveness_timeout(), Duration::from_secs(20));
        assert_eq!(t.connect_timeout(), Duration::from_secs(2));
        assert_eq!(t.registry_expiry(), Duration::from_secs(10));
        assert_eq!(t.ack_interval(), Duration::from_secs(1));
        assert_eq!(t.progress_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_transfer_config_default_chunk_is_8_kib() {
        assert_eq!(TransferConfig::default().chunk_size, 8192);
    }

    #[test]
    fn test_node_config_default_name_is_never_empty() {
        assert!(!NodeConfig::default().name.is_empty());
    }

    #[test]
    fn test_resolved_download_dir_prefers_explicit_value() {
        let cfg = NodeConfig {
            download_dir: Some(PathBuf::from("/srv/inbox")),
            ..NodeConfig::default()
        };
        assert_eq!(cfg.resolved_download_dir(), PathBuf::from("/srv/inbox"));
    }

    // ── TOML round-trip ───────────────────────────────────────────────────────

    #[test]
    fn test_app_config_serializes_and_deserializes_round_trip() {
        // Arrange
        let mut cfg = AppConfig::default();
        cfg.network.listen_port = 6000;
        cfg.network.advertise_address = Some("192.168.1.7".to_string());
        cfg.timing.liveness_timeout_ms = 10_000;

        // Act
        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        let restored: AppConfig = toml::from_str(&toml_str).expect("deserialize");

        // Assert
        assert_eq!(cfg, restored);
    }

    #[test]
    fn test_optional_fields_are_omitted_when_none() {
        let cfg = AppConfig::default();
        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        assert!(!toml_str.contains("advertise_address"));
        assert!(!toml_str.contains("download_dir"));
    }

    #[test]
    fn test_deserialize_empty_toml_uses_defaults() {
        let cfg: AppConfig = toml::from_str("").expect("deserialize empty");
        assert_eq!(cfg.network, NetworkConfig::default());
        assert_eq!(cfg.timing, TimingConfig::default());
    }

    #[test]
    fn test_deserialize_partial_section_overrides_defaults() {
        // Arrange
        let toml_str = r#"
[timing]
heartbeat_interval_ms = 3000
"#;

        // Act
        let cfg: AppConfig = toml::from_str(toml_str).expect("deserialize partial");

        // Assert
        assert_eq!(cfg.timing.heartbeat_interval_ms, 3000);
        // Unspecified fields keep their defaults
        assert_eq!(cfg.timing.liveness_timeout_ms, 20_000);
        assert_eq!(cfg.network.listen_port, 5000);
    }

    #[test]
    fn test_deserialize_invalid_toml_returns_parse_error() {
        let result: Result<AppConfig, toml::de::Error> = toml::from_str("[[[ not valid toml");
        assert!(result.is_err());
    }

    // ── Validation ────────────────────────────────────────────────────────────

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_heartbeat_interval() {
        let mut cfg = AppConfig::default();
        cfg.timing.heartbeat_interval_ms = 0;
        let err = cfg.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "timing.heartbeat_interval_ms",
                ..
            }
        ));
    }

    #[test]
    fn test_validate_rejects_non_ip_bind_address() {
        let mut cfg = AppConfig::default();
        cfg.network.bind_address = "everywhere".to_string();
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid { .. })));
    }

    // ── Files ─────────────────────────────────────────────────────────────────

    #[test]
    fn test_load_config_from_missing_file_returns_default() {
        let path = scratch_dir().join("absent.toml");
        assert_eq!(load_config_from(&path).unwrap(), AppConfig::default());
    }

    #[test]
    fn test_save_and_load_config_round_trip_via_temp_dir() {
        // Arrange: nested directory that does not exist yet
        let dir = scratch_dir();
        let path = dir.join("nested").join("config.toml");
        let mut cfg = AppConfig::default();
        cfg.node.name = "kitchen-pc".to_string();
        cfg.network.discovery_port = 9999;

        // Act
        save_config_to(&cfg, &path).expect("save");
        let loaded = load_config_from(&path).expect("load");

        // Assert
        assert_eq!(loaded, cfg);

        // Cleanup
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_config_from_malformed_file_returns_parse_error() {
        let dir = scratch_dir();
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "listen_port = = 1").unwrap();

        assert!(matches!(load_config_from(&path), Err(ConfigError::Parse(_))));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_config_file_path_ends_with_config_toml() {
        if let Ok(path) = config_file_path() {
            assert!(
                path.ends_with("config.toml"),
                "config file must be named config.toml, got {path:?}"
            );
        }
        // NoPlatformConfigDir in a stripped environment is also acceptable.
    }
}
