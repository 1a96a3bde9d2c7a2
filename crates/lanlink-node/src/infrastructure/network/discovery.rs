//! UDP broadcast presence: announce ourselves, learn about everyone else.
//!
//! One UDP socket bound on the discovery port (default 8888) serves two
//! dedicated threads:
//!
//! - the **broadcaster** sends `LANLINK_v1|<identity>` to the broadcast
//!   address immediately and then every `interval`;
//! - the **listener** blocks on `recv_from` and calls
//!   [`PeerRegistry::refresh`] with the sender's IP for every datagram that
//!   carries the protocol prefix.  Our own datagrams (sender IP equal to the
//!   local address) and anything else are dropped without complaint.
//!
//! Announcements are one-way; nothing is ever sent in reply.
//!
//! # Read timeout
//!
//! The socket has a 500 ms read timeout so the listener can notice the
//! `running` flag going false.  The broadcaster sleeps in short steps for the
//! same reason, so [`DiscoveryService::stop`] returns within about half a
//! second.

use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use lanlink_core::protocol::discovery::{encode_announcement, parse_announcement};
use lanlink_core::{PeerAddress, PeerRegistry};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::infrastructure::storage::config::{AppConfig, ConfigError};

const READ_TIMEOUT: Duration = Duration::from_millis(500);
const SLEEP_STEP: Duration = Duration::from_millis(100);

/// Error type for discovery service operations.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The UDP socket could not be bound.
    #[error("failed to bind discovery socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    /// The socket could not be configured.
    #[error("discovery socket error: {0}")]
    Socket(#[source] std::io::Error),
    /// A worker thread could not be started.
    #[error("failed to spawn discovery thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Settings for [`DiscoveryService::start`].
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Local address of the discovery socket.
    pub bind_addr: SocketAddr,
    /// Where announcements are sent.
    pub target: SocketAddr,
    /// Time between announcements.
    pub interval: Duration,
    /// Informational suffix of our announcement.
    pub identity: String,
    /// Datagrams from this address are ignored.
    pub local_ip: Option<IpAddr>,
}

impl DiscoveryConfig {
    /// Builds discovery settings from the application config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an unparsable bind or broadcast
    /// address.
    pub fn from_app(cfg: &AppConfig, local: &PeerAddress) -> Result<Self, ConfigError> {
        let port = cfg.network.discovery_port;
        Ok(Self {
            bind_addr: SocketAddr::new(cfg.network.bind_ip()?, port),
            target: SocketAddr::new(cfg.network.broadcast_ip()?, port),
            interval: cfg.timing.broadcast_interval(),
            identity: cfg.node.name.clone(),
            local_ip: local.ip(),
        })
    }
}

/// Running broadcaster and listener threads.  Stopped on drop.
#[derive(Debug)]
pub struct DiscoveryService {
    running: Arc<AtomicBool>,
    local_addr: SocketAddr,
    threads: Vec<JoinHandle<()>>,
}

impl DiscoveryService {
    /// Binds the discovery socket and starts both threads.
    ///
    /// # Errors
    ///
    /// [`DiscoveryError::BindFailed`] if the port is taken.  The caller is
    /// expected to log it and carry on without discovery.
    pub fn start(config: DiscoveryConfig, registry: Arc<PeerRegistry>) -> Result<Self, DiscoveryError> {
        let addr = config.bind_addr;
        let socket =
            UdpSocket::bind(addr).map_err(|source| DiscoveryError::BindFailed { addr, source })?;
        socket.set_broadcast(true).map_err(DiscoveryError::Socket)?;
        socket
            .set_read_timeout(Some(READ_TIMEOUT))
            .map_err(DiscoveryError::Socket)?;
        let local_addr = socket.local_addr().map_err(DiscoveryError::Socket)?;
        let sender = socket.try_clone().map_err(DiscoveryError::Socket)?;

        let running = Arc::new(AtomicBool::new(true));
        let mut service = Self {
            running: Arc::clone(&running),
            local_addr,
            threads: Vec::with_capacity(2),
        };

        let ignore = config.local_ip.map(PeerAddress::from);
        let flag = Arc::clone(&running);
        let listener = thread::Builder::new()
            .name("lanlink-discovery-rx".to_string())
            .spawn(move || listen_loop(socket, registry, ignore, flag))
            .map_err(DiscoveryError::Spawn)?;
        service.threads.push(listener);

        let payload = encode_announcement(&config.identity);
        let flag = Arc::clone(&running);
        let (target, interval) = (config.target, config.interval);
        // On failure `service` drops here, which stops the listener.
        let broadcaster = thread::Builder::new()
            .name("lanlink-discovery-tx".to_string())
            .spawn(move || broadcast_loop(sender, target, payload, interval, flag))
            .map_err(DiscoveryError::Spawn)?;
        service.threads.push(broadcaster);

        info!("discovery listening on UDP {local_addr}, announcing to {target} every {interval:?}");
        Ok(service)
    }

    /// Address the discovery socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Signals both threads to exit and waits for them.  Idempotent.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                warn!("a discovery thread panicked");
            }
        }
    }
}

impl Drop for DiscoveryService {
    fn drop(&mut self) {
        self.stop();
    }
}

fn listen_loop(
    socket: UdpSocket,
    registry: Arc<PeerRegistry>,
    ignore: Option<PeerAddress>,
    running: Arc<AtomicBool>,
) {
    let mut buf = [0u8; 1024];

    while running.load(Ordering::Relaxed) {
        let (len, src) = match socket.recv_from(&mut buf) {
            Ok(pair) => pair,
            Err(e) if is_timeout_error(&e) => continue,
            Err(e) => {
                debug!("discovery recv error: {e}");
                thread::sleep(SLEEP_STEP);
                continue;
            }
        };

        let sender = PeerAddress::from(src.ip());
        if ignore.as_ref() == Some(&sender) {
            trace!("ignoring our own announcement");
            continue;
        }
        match parse_announcement(&buf[..len]) {
            Some(announcement) => {
                trace!("presence from {src} ({})", announcement.identity);
                registry.refresh(sender);
            }
            None => trace!("ignoring foreign datagram from {src} ({len} bytes)"),
        }
    }

    debug!("discovery listener stopped");
}

fn broadcast_loop(
    socket: UdpSocket,
    target: SocketAddr,
    payload: Vec<u8>,
    interval: Duration,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Relaxed) {
        if let Err(e) = socket.send_to(&payload, target) {
            debug!("announcement to {target} failed: {e}");
        }
        let next = Instant::now() + interval;
        while running.load(Ordering::Relaxed) {
            let now = Instant::now();
            if now >= next {
                break;
            }
            thread::sleep(SLEEP_STEP.min(next - now));
        }
    }

    debug!("discovery broadcaster stopped");
}

/// Returns `true` for OS timeout / would-block errors that should be retried.
fn is_timeout_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────
