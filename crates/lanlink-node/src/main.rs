//! LanLink node: entry point.
//!
//! Runs one peer on the local network: announces itself over UDP, accepts
//! and opens peer sessions, and exchanges messages and files.  Without a GUI
//! the process is driven from a small stdin console (type `help`).
//!
//! # Usage
//!
//! ```text
//! lanlink [OPTIONS]
//!
//! Options:
//!   --config <PATH>          Config file [default: platform config dir]
//!   --name <NAME>            Name announced to other peers
//!   --download-dir <DIR>     Where received files are saved
//!   --listen-port <PORT>     TCP peer port [default from config: 5000]
//!   --discovery-port <PORT>  UDP discovery port [default from config: 8888]
//!   --advertise <IP>         Address this node is known by
//! ```
//!
//! Every option also reads an environment variable (`LANLINK_CONFIG`,
//! `LANLINK_NAME`, ...).  Command-line values win over the environment, which
//! wins over the config file.  `RUST_LOG` overrides `node.log_level`.

mod console;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use lanlink_node::infrastructure::storage::config::{self, AppConfig, ConfigError};
use lanlink_node::node::LanNode;

use console::{execute, parse_command, ConsoleCommand, ConsoleObserver};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// LanLink peer-to-peer LAN messenger node.
#[derive(Debug, Parser)]
#[command(name = "lanlink", about = "Serverless LAN messaging and file transfer", version)]
struct Cli {
    /// Path of the TOML config file.  Missing files mean defaults.
    #[arg(long, env = "LANLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Name announced in discovery datagrams.
    #[arg(long, env = "LANLINK_NAME")]
    name: Option<String>,

    /// Directory for received files.
    #[arg(long, env = "LANLINK_DOWNLOAD_DIR")]
    download_dir: Option<PathBuf>,

    /// TCP port for peer sessions (also the port dialled on peers).
    #[arg(long, env = "LANLINK_LISTEN_PORT")]
    listen_port: Option<u16>,

    /// UDP port for presence broadcasts.
    #[arg(long, env = "LANLINK_DISCOVERY_PORT")]
    discovery_port: Option<u16>,

    /// Address this node identifies as, instead of auto-detection.
    #[arg(long, env = "LANLINK_ADVERTISE")]
    advertise: Option<String>,
}

impl Cli {
    /// Loads the config file and applies command-line overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or if
    /// the merged configuration is invalid.
    fn into_app_config(self) -> anyhow::Result<AppConfig> {
        let mut cfg = match &self.config {
            Some(path) => config::load_config_from(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => match config::load_config() {
                Ok(cfg) => cfg,
                Err(ConfigError::NoPlatformConfigDir) => {
                    warn!("no platform config directory; using defaults");
                    AppConfig::default()
                }
                Err(e) => return Err(e).context("failed to load config"),
            },
        };

        if let Some(name) = self.name {
            cfg.node.name = name;
        }
        if let Some(dir) = self.download_dir {
            cfg.node.download_dir = Some(dir);
        }
        if let Some(port) = self.listen_port {
            cfg.network.listen_port = port;
        }
        if let Some(port) = self.discovery_port {
            cfg.network.discovery_port = port;
        }
        if let Some(addr) = self.advertise {
            cfg.network.advertise_address = Some(addr);
        }

        cfg.validate().context("invalid configuration")?;
        Ok(cfg)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = cli.into_app_config()?;

    // `RUST_LOG` wins; otherwise the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cfg.node.log_level)),
        )
        .init();

    info!("LanLink node '{}' starting", cfg.node.name);
    let node = LanNode::new(cfg, Arc::new(ConsoleObserver)).context("failed to create node")?;
    let status = node.start().await;
    match status.listener {
        Some(addr) => info!("listening for peers on {addr}"),
        None => warn!("not accepting inbound sessions; outbound sessions still work"),
    }
    if !status.discovery_active {
        warn!("discovery is off; use 'connect <ip>' with known peers");
    }
    println!("lanlink ready as {}; type 'help'", node.local_address());

    run_console(&node).await?;

    node.shutdown();
    info!("LanLink node stopped");
    Ok(())
}

/// Reads commands from stdin until `quit` or Ctrl+C.
async fn run_console(node: &LanNode) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => info!("received Ctrl+C; shutting down"),
                    Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
                }
                return Ok(());
            }
            line = lines.next_line() => line.context("failed to read stdin")?,
        };
        let Some(line) = line else {
            info!("stdin closed; running until Ctrl+C");
            return tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl+C signal");
        };

        match parse_command(&line) {
            Ok(ConsoleCommand::Quit) => return Ok(()),
            Ok(command) => execute(node, command).await,
            Err(e) => println!("{e}"),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_config() -> PathBuf {
        std::env::temp_dir()
            .join(format!("lanlink_cli_{}", uuid::Uuid::new_v4()))
            .join("config.toml")
    }

    #[test]
    fn test_cli_defaults_leave_overrides_unset() {
        // Arrange / Act
        let cli = Cli::parse_from(["lanlink"]);

        // Assert
        assert!(cli.name.is_none());
        assert!(cli.listen_port.is_none());
        assert!(cli.advertise.is_none());
    }

    #[test]
    fn test_cli_port_overrides_parse() {
        let cli = Cli::parse_from(["lanlink", "--listen-port", "6000", "--discovery-port", "6001"]);
        assert_eq!(cli.listen_port, Some(6000));
        assert_eq!(cli.discovery_port, Some(6001));
    }

    #[test]
    fn test_into_app_config_missing_file_gives_defaults() {
        // Arrange
        let path = scratch_config();
        let cli = Cli::parse_from(["lanlink", "--config", path.to_str().unwrap()]);

        // Act
        let cfg = cli.into_app_config().unwrap();

        // Assert
        assert_eq!(cfg.network.listen_port, 5000);
        assert_eq!(cfg.network.discovery_port, 8888);
    }

    #[test]
    fn test_into_app_config_cli_overrides_file_values() {
        // Arrange
        let path = scratch_config();
        let mut on_disk = AppConfig::default();
        on_disk.network.listen_port = 7000;
        on_disk.node.name = "from-file".to_string();
        config::save_config_to(&on_disk, &path).unwrap();
        let cli = Cli::parse_from([
            "lanlink",
            "--config",
            path.to_str().unwrap(),
            "--name",
            "from-cli",
            "--advertise",
            "10.0.0.42",
        ]);

        // Act
        let cfg = cli.into_app_config().unwrap();

        // Assert
        assert_eq!(cfg.network.listen_port, 7000);
        assert_eq!(cfg.node.name, "from-cli");
        assert_eq!(cfg.network.advertise_address.as_deref(), Some("10.0.0.42"));

        if let Some(dir) = path.parent() {
            std::fs::remove_dir_all(dir).ok();
        }
    }

    #[test]
    fn test_into_app_config_rejects_invalid_file() {
        // Arrange
        let path = scratch_config();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[timing]\nheartbeat_interval_ms = 0\n").unwrap();
        let cli = Cli::parse_from(["lanlink", "--config", path.to_str().unwrap()]);

        // Act
        let result = cli.into_app_config();

        // Assert
        assert!(result.is_err());

        if let Some(dir) = path.parent() {
            std::fs::remove_dir_all(dir).ok();
        }
    }
}
