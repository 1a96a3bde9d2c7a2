//! SessionManager: owns every per-peer [`Connection`] of one node.
//!
//! Responsibilities:
//!
//! - keep at most one connection per remote address;
//! - accept inbound TCP sessions and wrap each in a responder connection;
//! - apply the tie-break rule so that exactly one side of a pair dials;
//! - optionally dial every registry peer this side is elected to dial,
//!   except peers the user disconnected from;
//! - relay connection events to the consumer's observer, forgetting
//!   responders whose session has ended.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use lanlink_core::{should_initiate, PeerAddress, PeerRegistry};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::observer::{ConnectionObserver, TransferOutcome};
use crate::infrastructure::network::connection::{Connection, ConnectionConfig, LinkState, Role};
use crate::infrastructure::storage::config::{AppConfig, ConfigError};

/// Error type for session management.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("bind failed on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("listener error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration for a [`SessionManager`].
#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    /// Address the TCP listener binds to.
    pub bind_addr: SocketAddr,
    /// Dial registry peers automatically when this side wins the tie-break.
    pub auto_connect: bool,
    /// Settings shared by every connection.
    pub connection: ConnectionConfig,
}

impl SessionManagerConfig {
    /// Builds the manager settings from the application config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `network.bind_address` is not an IP.
    pub fn from_app(cfg: &AppConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            bind_addr: SocketAddr::new(cfg.network.bind_ip()?, cfg.network.listen_port),
            auto_connect: cfg.network.auto_connect,
            connection: ConnectionConfig::from(cfg),
        })
    }
}

/// Snapshot of one managed session, for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub address: PeerAddress,
    pub role: Role,
    pub state: LinkState,
}

/// The session manager.  Dropping it shuts every session down.
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    local: PeerAddress,
    bind_addr: SocketAddr,
    auto_connect: bool,
    connection: Arc<ConnectionConfig>,
    registry: Arc<PeerRegistry>,
    observer: Arc<dyn ConnectionObserver>,
    peers: Mutex<HashMap<PeerAddress, Managed>>,
    /// Peers closed with `disconnect_from`; auto-connect leaves them alone
    /// until the next explicit `connect_to`.
    dismissed: Mutex<HashSet<PeerAddress>>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

/// A map entry.  `id` tells a relay whether the entry is still its own.
struct Managed {
    id: u64,
    conn: Arc<Connection>,
}

impl SessionManager {
    /// Creates a manager for the node identified by `local`.
    ///
    /// Nothing touches the network until [`start`](Self::start).
    pub fn new(
        local: PeerAddress,
        config: SessionManagerConfig,
        registry: Arc<PeerRegistry>,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                local,
                bind_addr: config.bind_addr,
                auto_connect: config.auto_connect,
                connection: Arc::new(config.connection),
                registry,
                observer,
                peers: Mutex::new(HashMap::new()),
                dismissed: Mutex::new(HashSet::new()),
                next_id: AtomicU64::new(1),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn local_address(&self) -> &PeerAddress {
        &self.inner.local
    }

    /// Binds the listener and spawns the accept loop (and the auto-connect
    /// loop if enabled).  Returns the bound address.
    ///
    /// # Errors
    ///
    /// [`SessionError::BindFailed`] if the port is unavailable.  Sessions
    /// this node dials keep working without a listener.
    pub async fn start(&self) -> Result<SocketAddr, SessionError> {
        let addr = self.inner.bind_addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| SessionError::BindFailed { addr, source })?;
        let local_addr = listener.local_addr()?;
        info!("accepting peer sessions on {local_addr}");

        tokio::spawn(Arc::clone(&self.inner).accept_loop(listener));
        if self.inner.auto_connect {
            tokio::spawn(Arc::clone(&self.inner).auto_connect_loop());
        }
        Ok(local_addr)
    }

    /// Opens (or nudges) a session with `address`.
    ///
    /// Does nothing for our own address, and only logs when the tie-break
    /// says the remote side must dial us.  If a connection already exists
    /// this makes an immediate attempt when it is Offline.  Undoes an
    /// earlier [`disconnect_from`](Self::disconnect_from) for auto-connect.
    pub async fn connect_to(&self, address: PeerAddress) {
        if self.inner.dismissed().remove(&address) {
            debug!("{address} is eligible for auto-connect again");
        }
        self.inner.connect_to(address).await;
    }

    /// Closes the session with `address`, stops reconnecting, and forgets it.
    ///
    /// Auto-connect skips `address` from then on, until [`connect_to`]
    /// names it again.  A session the remote side dials is still accepted.
    ///
    /// [`connect_to`]: Self::connect_to
    pub fn disconnect_from(&self, address: &PeerAddress) {
        self.inner.dismissed().insert(address.clone());
        let removed = self.inner.peers().remove(address);
        match removed {
            Some(entry) => {
                info!("disconnecting from {address}");
                entry.conn.shutdown();
            }
            None => debug!("disconnect: no session with {address}"),
        }
    }

    /// Sends a text message.  Silently ignored unless the session is Online.
    pub async fn send_message_to(&self, address: &PeerAddress, text: &str) {
        if let Some(conn) = self.inner.lookup(address) {
            conn.send_text(text).await;
        } else {
            debug!("message to {address} dropped: no session");
        }
    }

    /// Queues a file.  Silently ignored unless the session is Online.
    pub async fn send_file_to(&self, address: &PeerAddress, path: &Path) {
        if let Some(conn) = self.inner.lookup(address) {
            conn.send_file(path).await;
        } else {
            debug!("file to {address} dropped: no session");
        }
    }

    /// Addresses whose session is currently Online.
    pub fn connected_peers(&self) -> Vec<PeerAddress> {
        self.inner
            .peers()
            .iter()
            .filter(|(_, m)| m.conn.is_online())
            .map(|(a, _)| a.clone())
            .collect()
    }

    /// Every managed session, sorted by address.
    pub fn sessions(&self) -> Vec<SessionSummary> {
        let mut out: Vec<_> = self
            .inner
            .peers()
            .iter()
            .map(|(address, m)| SessionSummary {
                address: address.clone(),
                role: m.conn.role(),
                state: m.conn.state(),
            })
            .collect();
        out.sort_by(|a, b| a.address.cmp(&b.address));
        out
    }

    /// Link state of the session with `address`, if one is managed.
    pub fn state_of(&self, address: &PeerAddress) -> Option<LinkState> {
        self.inner.lookup(address).map(|c| c.state())
    }

    /// Stops accepting and shuts every session down.  Idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown_all();
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.inner.shutdown_all();
    }
}

// ── Internals ─────────────────────────────────────────────────────────────────

impl ManagerInner {
    fn peers(&self) -> MutexGuard<'_, HashMap<PeerAddress, Managed>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dismissed(&self) -> MutexGuard<'_, HashSet<PeerAddress>> {
        self.dismissed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup(&self, address: &PeerAddress) -> Option<Arc<Connection>> {
        self.peers().get(address).map(|m| Arc::clone(&m.conn))
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn relay(self: &Arc<Self>, id: u64) -> Arc<dyn ConnectionObserver> {
        Arc::new(ConnectionRelay {
            id,
            manager: Arc::downgrade(self),
            downstream: Arc::clone(&self.observer),
        })
    }

    async fn connect_to(self: &Arc<Self>, address: PeerAddress) {
        if address == self.local {
            debug!("not connecting to ourselves");
            return;
        }
        if self.shutdown.is_cancelled() {
            return;
        }
        if !should_initiate(&self.local, &address) {
            info!("waiting for {address} to connect to us");
            return;
        }

        let (conn, replaced) = {
            let mut peers = self.peers();
            match peers.get(&address) {
                Some(existing) if !existing.conn.is_terminal() => (Arc::clone(&existing.conn), None),
                _ => {
                    let id = self.next_id();
                    let conn = Connection::initiator(
                        address.clone(),
                        Arc::clone(&self.connection),
                        self.relay(id),
                    );
                    let replaced = peers.insert(
                        address.clone(),
                        Managed {
                            id,
                            conn: Arc::clone(&conn),
                        },
                    );
                    debug!("created initiator for {address}");
                    (conn, replaced)
                }
            }
        };
        drop(replaced);
        conn.connect().await;
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            let (stream, remote) = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("accept failed: {e}");
                        time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                },
            };
            let address = PeerAddress::from(remote.ip());
            if address == self.local {
                debug!("ignoring inbound session from our own address");
                continue;
            }
            info!("inbound session from {remote}");
            self.adopt_inbound(address, stream).await;
        }
        info!("accept loop stopped");
    }

    /// Installs a responder for `stream`, replacing any existing session.
    async fn adopt_inbound(self: &Arc<Self>, address: PeerAddress, stream: TcpStream) {
        let id = self.next_id();
        let conn = Connection::responder(
            address.clone(),
            Arc::clone(&self.connection),
            self.relay(id),
        );
        let previous = self.peers().insert(
            address.clone(),
            Managed {
                id,
                conn: Arc::clone(&conn),
            },
        );
        if let Some(old) = previous {
            debug!("replacing existing session with {address}");
            old.conn.shutdown();
        }
        conn.adopt(stream).await;
    }

    async fn auto_connect_loop(self: Arc<Self>) {
        let mut ticker = time::interval(self.connection.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            for peer in self.registry.online_peers() {
                let due = should_initiate(&self.local, &peer)
                    && self.lookup(&peer).is_none()
                    && !self.dismissed().contains(&peer);
                if due {
                    info!("auto-connecting to discovered peer {peer}");
                    let this = Arc::clone(&self);
                    tokio::spawn(async move { this.connect_to(peer).await });
                }
            }
        }
        debug!("auto-connect loop stopped");
    }

    /// Removes the entry for `address` if it still is `id` and can never
    /// come back Online.
    fn forget_if_terminal(&self, address: &PeerAddress, id: u64) {
        let removed = {
            let mut peers = self.peers();
            let stale = peers
                .get(address)
                .is_some_and(|m| m.id == id && m.conn.is_terminal());
            if stale {
                peers.remove(address)
            } else {
                None
            }
        };
        if removed.is_some() {
            debug!("forgot finished session with {address}");
        }
    }

    fn shutdown_all(&self) {
        self.shutdown.cancel();
        let drained: Vec<Managed> = self.peers().drain().map(|(_, m)| m).collect();
        for entry in drained {
            entry.conn.shutdown();
        }
    }
}

// ── Event relay ───────────────────────────────────────────────────────────────

/// Observer handed to each connection: bookkeeping, then forward unchanged.
struct ConnectionRelay {
    id: u64,
    manager: Weak<ManagerInner>,
    downstream: Arc<dyn ConnectionObserver>,
}

impl ConnectionObserver for ConnectionRelay {
    fn on_message(&self, address: &PeerAddress, text: &str) {
        self.downstream.on_message(address, text);
    }

    fn on_status_change(&self, address: &PeerAddress, online: bool) {
        if !online {
            if let Some(manager) = self.manager.upgrade() {
                manager.forget_if_terminal(address, self.id);
            }
        }
        self.downstream.on_status_change(address, online);
    }

    fn on_file_progress(&self, address: &PeerAddress, file_name: &str, percent: u8) {
        self.downstream.on_file_progress(address, file_name, percent);
    }

    fn on_transfer_finished(&self, address: &PeerAddress, file_name: &str, outcome: &TransferOutcome) {
        self.downstream.on_transfer_finished(address, file_name, outcome);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
