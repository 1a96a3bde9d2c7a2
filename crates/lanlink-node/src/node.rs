//! `LanNode`: one process's view of the LAN.
//!
//! Wires the registry, discovery service and session manager together and
//! exposes the operations a user interface needs:
//!
//! ```text
//!  DiscoveryService ──refresh──► PeerRegistry ◄──online_peers()── UI
//!                                     │
//!                               (auto-connect)
//!                                     ▼
//!  UI ──connect_to / send_*──► SessionManager ──► Connection ×N
//!                                     │
//!  UI ◄──────── ConnectionObserver ◄──┘
//! ```
//!
//! Nothing here is global: a test can run several nodes in one process.

use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lanlink_core::{PeerAddress, PeerRegistry};
use thiserror::Error;
use tracing::{error, info};

use crate::application::observer::ConnectionObserver;
use crate::infrastructure::network::connection::LinkState;
use crate::infrastructure::network::discovery::{DiscoveryConfig, DiscoveryError, DiscoveryService};
use crate::infrastructure::network::session_manager::{
    SessionManager, SessionManagerConfig, SessionSummary,
};
use crate::infrastructure::storage::config::{AppConfig, ConfigError, NetworkConfig};

/// Error type for node construction and start-up.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("discovery unavailable: {0}")]
    Discovery(#[from] DiscoveryError),
}

/// What came up during [`LanNode::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceStatus {
    /// Bound address of the TCP listener, if the bind succeeded.
    pub listener: Option<SocketAddr>,
    /// Whether the discovery threads are running.
    pub discovery_active: bool,
}

/// A LanLink peer node.
pub struct LanNode {
    config: AppConfig,
    local: PeerAddress,
    registry: Arc<PeerRegistry>,
    sessions: SessionManager,
    discovery: Mutex<Option<DiscoveryService>>,
    status: Mutex<Option<ServiceStatus>>,
}

impl LanNode {
    /// Creates a node whose identity is [`detect_local_address`].
    ///
    /// # Errors
    ///
    /// [`NodeError::Config`] if `config` fails validation.
    pub fn new(config: AppConfig, observer: Arc<dyn ConnectionObserver>) -> Result<Self, NodeError> {
        let local = detect_local_address(&config.network);
        Self::with_local_address(config, local, observer)
    }

    /// Creates a node with an explicit identity.
    pub fn with_local_address(
        config: AppConfig,
        local: PeerAddress,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Result<Self, NodeError> {
        config.validate()?;
        let registry = Arc::new(PeerRegistry::new(config.timing.registry_expiry()));
        let sessions = SessionManager::new(
            local.clone(),
            SessionManagerConfig::from_app(&config)?,
            Arc::clone(&registry),
            observer,
        );
        info!("node '{}' identifies as {local}", config.node.name);
        Ok(Self {
            config,
            local,
            registry,
            sessions,
            discovery: Mutex::new(None),
            status: Mutex::new(None),
        })
    }

    /// Starts the TCP listener and the discovery service.
    ///
    /// A bind failure disables only the component concerned; it is logged
    /// and reflected in the returned [`ServiceStatus`].  Calling `start`
    /// again returns the first status without doing anything.
    pub async fn start(&self) -> ServiceStatus {
        let started = *lock(&self.status);
        if let Some(status) = started {
            return status;
        }

        let listener = match self.sessions.start().await {
            Ok(addr) => Some(addr),
            Err(e) => {
                error!("peer listener disabled: {e}");
                None
            }
        };

        let discovery_active = match self.start_discovery() {
            Ok(service) => {
                *lock(&self.discovery) = Some(service);
                true
            }
            Err(e) => {
                error!("discovery disabled: {e}");
                false
            }
        };

        let status = ServiceStatus {
            listener,
            discovery_active,
        };
        *lock(&self.status) = Some(status);
        status
    }

    fn start_discovery(&self) -> Result<DiscoveryService, NodeError> {
        let cfg = DiscoveryConfig::from_app(&self.config, &self.local)?;
        Ok(DiscoveryService::start(cfg, Arc::clone(&self.registry))?)
    }

    /// Opens a session with `address` if the tie-break elects us to dial.
    pub async fn connect_to(&self, address: PeerAddress) {
        self.sessions.connect_to(address).await;
    }

    /// Closes the session with `address` and keeps auto-connect from
    /// reopening it until the next [`connect_to`](Self::connect_to).
    pub fn disconnect_from(&self, address: &PeerAddress) {
        self.sessions.disconnect_from(address);
    }

    /// Sends text; a no-op unless the session is Online.
    pub async fn send_message_to(&self, address: &PeerAddress, text: &str) {
        self.sessions.send_message_to(address, text).await;
    }

    /// Sends a file; a no-op unless the session is Online.
    pub async fn send_file_to(&self, address: &PeerAddress, path: &Path) {
        self.sessions.send_file_to(address, path).await;
    }

    /// Peers heard from within the registry's expiry window.
    pub fn online_peers(&self) -> Vec<PeerAddress> {
        self.registry.online_peers()
    }

    /// Peers with an Online session.
    pub fn connected_peers(&self) -> Vec<PeerAddress> {
        self.sessions.connected_peers()
    }

    pub fn sessions(&self) -> Vec<SessionSummary> {
        self.sessions.sessions()
    }

    pub fn connection_state(&self, address: &PeerAddress) -> Option<LinkState> {
        self.sessions.state_of(address)
    }

    pub fn local_address(&self) -> &PeerAddress {
        &self.local
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Stops discovery and closes every session.
    pub fn shutdown(&self) {
        if let Some(mut service) = lock(&self.discovery).take() {
            service.stop();
        }
        self.sessions.shutdown();
        info!("node {} shut down", self.local);
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Picks the address this node is known by.
///
/// In order: `advertise_address` if set, `bind_address` if it names one
/// interface, the source address the OS would use for an outbound route, and
/// finally `127.0.0.1`.
pub fn detect_local_address(network: &NetworkConfig) -> PeerAddress {
    if let Some(advertised) = network
        .advertise_address
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        return PeerAddress::from(advertised);
    }
    if let Ok(ip) = network.bind_ip() {
        if !ip.is_unspecified() {
            return PeerAddress::from(ip);
        }
    }
    route_source_ip()
        .map(PeerAddress::from)
        .unwrap_or_else(|| PeerAddress::from("127.0.0.1"))
}

/// Source IP of a connected (never used) UDP socket.  No packet is sent.
fn route_source_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified()).then_some(ip)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::observer::mock::RecordingObserver;

    #[test]
    fn test_detect_local_address_prefers_advertised_address() {
        // Arrange
        let mut network = NetworkConfig::default();
        network.advertise_address = Some(" 10.1.2.3 ".to_string());
        network.bind_address = "192.168.0.2".to_string();

        // Act / Assert
        assert_eq!(detect_local_address(&network).as_str(), "10.1.2.3");
    }

    #[test]
    fn test_detect_local_address_uses_specific_bind_address() {
        let mut network = NetworkConfig::default();
        network.bind_address = "127.0.0.2".to_string();
        assert_eq!(detect_local_address(&network).as_str(), "127.0.0.2");
    }

    #[test]
    fn test_detect_local_address_always_yields_an_ip() {
        let network = NetworkConfig::default();
        assert!(detect_local_address(&network).ip().is_some());
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        // Arrange
        let mut config = AppConfig::default();
        config.timing.heartbeat_interval_ms = 0;

        // Act
        let result = LanNode::new(config, Arc::new(RecordingObserver::new()));

        // Assert
        assert!(matches!(result, Err(NodeError::Config(_))));
    }

    #[tokio::test]
    async fn test_start_reports_listener_bind_failure_without_failing() {
        // Arrange: occupy the listen port
        let holder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let udp = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut config = AppConfig::default();
        config.network.bind_address = "127.0.0.1".to_string();
        config.network.listen_port = holder.local_addr().unwrap().port();
        config.network.discovery_port = udp.local_addr().unwrap().port();
        drop(udp);
        config.network.broadcast_address = "127.0.0.1".to_string();
        let node = LanNode::new(config, Arc::new(RecordingObserver::new())).unwrap();

        // Act
        let status = node.start().await;

        // Assert
        assert_eq!(status.listener, None);
        assert!(status.discovery_active);
        assert_eq!(node.start().await, status, "second start is a no-op");
        node.shutdown();
    }
}
