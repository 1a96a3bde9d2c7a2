//! One self-healing TCP session with one remote peer.
//!
//! # States
//!
//! ```text
//!            connect() / reconnect tick          stream attached
//!  Offline ──────────────────────────► Connecting ───────────────► Online
//!     ▲                                    │                         │
//!     │            attempt failed          │   I/O error, protocol   │
//!     └────────────────────────────────────┘   error, or liveness    │
//!     └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! An *initiator* (we dialled) starts Offline and keeps retrying on every
//! watchdog tick while Offline.  A *responder* (we accepted) starts
//! Connecting with its socket in hand; when it drops it is finished for good,
//! because the remote initiator will dial again and the accept loop wraps that
//! socket in a fresh `Connection`.
//!
//! # Tasks
//!
//! Each connection runs three tokio tasks:
//!
//! - the **watchdog** ticks every `heartbeat_interval`.  While Online it
//!   forces a disconnect once nothing has arrived for `liveness_timeout`,
//!   otherwise it sends a HEARTBEAT.  While Offline (initiators only) it makes
//!   one bounded connect attempt.
//! - the **outbound worker** drains a bounded queue of sends, so messages and
//!   files go out one at a time and never interleave on the wire.
//! - the **reader** exists only while Online, one per session.
//!
//! The read half and the write half are locked independently, so ACKs from
//! the peer keep arriving while a long file write holds the writer.
//!
//! A heartbeat that cannot be written within one tick is abandoned with a
//! warning rather than ending the session.  A peer that has stopped reading
//! has usually stopped writing too, and the liveness check takes the link
//! down once `liveness_timeout` passes without inbound bytes.
//!
//! # Sessions and generations
//!
//! Every successful attach bumps a generation counter and creates a session
//! token (a child of the connection's lifetime token).  A failure reported by
//! a task only takes the link down if it still belongs to the current
//! generation, so a stale reader from a previous session can never kill a
//! newer one.  Taking the link down cancels the session token, which unwinds
//! the reader and any in-flight write, and never waits on the writer lock.

use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use lanlink_core::domain::transfer::DEFAULT_CHUNK_SIZE;
use lanlink_core::protocol::frame::DEFAULT_PEER_PORT;
use lanlink_core::{
    encode_frame, sanitize_file_name, Command, Frame, PeerAddress, ProgressThrottle, Transfer,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::application::observer::{ConnectionObserver, TransferOutcome};
use crate::infrastructure::network::wire::{self, LinkError};
use crate::infrastructure::storage::config::AppConfig;
use crate::infrastructure::storage::downloads::PartFile;

// ── Configuration ─────────────────────────────────────────────────────────────

/// Timing and sizing for every connection a node owns.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// TCP port dialled on the remote peer.
    pub peer_port: u16,
    /// Watchdog tick: heartbeat cadence and reconnect cadence.
    pub heartbeat_interval: Duration,
    /// Silence after which an Online link is considered dead.
    pub liveness_timeout: Duration,
    /// Upper bound for one outbound connect attempt.
    pub connect_timeout: Duration,
    /// Source address for outbound connects; `None` lets the OS choose.
    pub local_bind: Option<IpAddr>,
    /// ACK cadence while receiving a file.
    pub ack_interval: Duration,
    /// Minimum spacing of progress reports while sending a file.
    pub progress_interval: Duration,
    /// Bytes per file chunk.
    pub chunk_size: usize,
    /// Outbound sends that may wait in the queue.
    pub outbound_queue_depth: usize,
    /// Where received files go.
    pub download_dir: PathBuf,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            peer_port: DEFAULT_PEER_PORT,
            heartbeat_interval: Duration::from_secs(2),
            liveness_timeout: Duration::from_secs(20),
            connect_timeout: Duration::from_secs(2),
            local_bind: None,
            ack_interval: Duration::from_secs(1),
            progress_interval: Duration::from_millis(500),
            chunk_size: DEFAULT_CHUNK_SIZE,
            outbound_queue_depth: 32,
            download_dir: std::env::temp_dir().join("lanlink-downloads"),
        }
    }
}

impl From<&AppConfig> for ConnectionConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            peer_port: cfg.network.listen_port,
            heartbeat_interval: cfg.timing.heartbeat_interval(),
            liveness_timeout: cfg.timing.liveness_timeout(),
            connect_timeout: cfg.timing.connect_timeout(),
            local_bind: cfg.network.bind_ip().ok().filter(|ip| !ip.is_unspecified()),
            ack_interval: cfg.timing.ack_interval(),
            progress_interval: cfg.timing.progress_interval(),
            chunk_size: cfg.transfer.chunk_size,
            outbound_queue_depth: cfg.transfer.outbound_queue_depth,
            download_dir: cfg.node.resolved_download_dir(),
        }
    }
}

// ── Public types ──────────────────────────────────────────────────────────────

/// Link state of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Offline,
    Connecting,
    Online,
}

/// Which side opened the TCP session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// We dial and keep redialling.
    Initiator,
    /// We accepted; a drop is terminal.
    Responder,
}

/// A per-peer session.  Sole owner of its socket.
///
/// Dropping the last handle shuts the connection down.
pub struct Connection {
    shared: Arc<Shared>,
    outbound: mpsc::Sender<Outbound>,
}

enum Outbound {
    /// A fully encoded frame.
    Frame(Vec<u8>),
    File(PathBuf),
}

struct Link {
    state: LinkState,
    session: Option<CancellationToken>,
    generation: u64,
}

struct SessionWriter {
    generation: u64,
    stream: BufWriter<OwnedWriteHalf>,
}

struct Shared {
    address: PeerAddress,
    role: Role,
    config: Arc<ConnectionConfig>,
    observer: Arc<dyn ConnectionObserver>,
    link: Mutex<Link>,
    writer: tokio::sync::Mutex<Option<SessionWriter>>,
    epoch: Instant,
    last_seen_ms: AtomicU64,
    lifetime: CancellationToken,
}

impl Connection {
    /// Creates an Offline initiator.  Call [`connect`](Self::connect) for an
    /// immediate first attempt; the watchdog retries on its own afterwards.
    ///
    /// Must be called inside a tokio runtime.
    pub fn initiator(
        address: PeerAddress,
        config: Arc<ConnectionConfig>,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Arc<Self> {
        Self::spawn(address, Role::Initiator, LinkState::Offline, config, observer)
    }

    /// Creates a Connecting responder awaiting [`adopt`](Self::adopt).
    pub fn responder(
        address: PeerAddress,
        config: Arc<ConnectionConfig>,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Arc<Self> {
        Self::spawn(address, Role::Responder, LinkState::Connecting, config, observer)
    }

    /// Wraps an accepted socket in a new responder and brings it Online.
    pub async fn accept(
        address: PeerAddress,
        stream: TcpStream,
        config: Arc<ConnectionConfig>,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Arc<Self> {
        let conn = Self::responder(address, config, observer);
        conn.adopt(stream).await;
        conn
    }

    fn spawn(
        address: PeerAddress,
        role: Role,
        state: LinkState,
        config: Arc<ConnectionConfig>,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(config.outbound_queue_depth.max(1));
        let shared = Arc::new(Shared {
            address,
            role,
            config,
            observer,
            link: Mutex::new(Link {
                state,
                session: None,
                generation: 0,
            }),
            writer: tokio::sync::Mutex::new(None),
            epoch: Instant::now(),
            last_seen_ms: AtomicU64::new(0),
            lifetime: CancellationToken::new(),
        });
        tokio::spawn(Arc::clone(&shared).run_watchdog());
        tokio::spawn(Arc::clone(&shared).run_outbound(rx));
        Arc::new(Self {
            shared,
            outbound: tx,
        })
    }

    pub fn address(&self) -> &PeerAddress {
        &self.shared.address
    }

    pub fn role(&self) -> Role {
        self.shared.role
    }

    pub fn state(&self) -> LinkState {
        self.shared.state()
    }

    pub fn is_online(&self) -> bool {
        self.state() == LinkState::Online
    }

    /// `true` once the connection has been shut down and will never come
    /// back Online.
    pub fn is_terminal(&self) -> bool {
        self.shared.lifetime.is_cancelled()
    }

    /// Time since the last byte arrived from the peer.
    pub fn silence(&self) -> Duration {
        self.shared.silence()
    }

    /// Makes one bounded connect attempt if this is an Offline initiator.
    pub async fn connect(&self) {
        self.shared.try_connect().await;
    }

    /// Attaches an accepted socket to a Connecting responder.
    pub async fn adopt(&self, stream: TcpStream) {
        self.shared.attach(stream).await;
    }

    /// Queues one MSG frame.  A no-op unless Online.
    ///
    /// Text longer than 65535 UTF-8 bytes is refused locally and nothing is
    /// sent.
    pub async fn send_text(&self, text: &str) {
        if !self.is_online() {
            debug!("not sending message to {}: offline", self.address());
            return;
        }
        match encode_frame(&Frame::Message(text.to_string())) {
            Ok(bytes) => self.enqueue(Outbound::Frame(bytes)).await,
            Err(e) => warn!("not sending message to {}: {e}", self.address()),
        }
    }

    /// Queues a file for sending.  A no-op unless Online.
    pub async fn send_file(&self, path: &Path) {
        if !self.is_online() {
            debug!("not sending {} to {}: offline", path.display(), self.address());
            return;
        }
        self.enqueue(Outbound::File(path.to_path_buf())).await;
    }

    /// Closes the session and stops reconnecting.  Idempotent, callable from
    /// any thread, and never waits for an in-flight write.
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }

    async fn enqueue(&self, job: Outbound) {
        if self.outbound.send(job).await.is_err() {
            debug!("outbound queue for {} is closed", self.address());
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("address", self.address())
            .field("role", &self.role())
            .field("state", &self.state())
            .finish()
    }
}

// ── State transitions ─────────────────────────────────────────────────────────

impl Shared {
    fn link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> LinkState {
        self.link().state
    }

    fn touch(&self) {
        let now = self.epoch.elapsed().as_millis() as u64;
        self.last_seen_ms.store(now, Ordering::Relaxed);
    }

    fn silence(&self) -> Duration {
        let last = Duration::from_millis(self.last_seen_ms.load(Ordering::Relaxed));
        self.epoch.elapsed().saturating_sub(last)
    }

    /// Generation and token of the live session, if Online.
    fn current_session(&self) -> Option<(u64, CancellationToken)> {
        let link = self.link();
        match (link.state, &link.session) {
            (LinkState::Online, Some(token)) => Some((link.generation, token.clone())),
            _ => None,
        }
    }

    async fn try_connect(self: &Arc<Self>) {
        if self.role != Role::Initiator {
            return;
        }
        {
            let mut link = self.link();
            if link.state != LinkState::Offline || self.lifetime.is_cancelled() {
                return;
            }
            link.state = LinkState::Connecting;
        }

        let port = self.config.peer_port;
        let attempt = time::timeout(
            self.config.connect_timeout,
            dial(&self.address, port, self.config.local_bind),
        )
        .await;
        match attempt {
            Ok(Ok(stream)) => self.attach(stream).await,
            Ok(Err(e)) => {
                debug!("connect to {}:{port} failed: {e}", self.address);
                self.abandon_connect();
            }
            Err(_) => {
                debug!(
                    "connect to {}:{port} timed out after {:?}",
                    self.address, self.config.connect_timeout
                );
                self.abandon_connect();
            }
        }
    }

    fn abandon_connect(&self) {
        let mut link = self.link();
        if link.state == LinkState::Connecting {
            link.state = LinkState::Offline;
        }
    }

    /// Connecting → Online with `stream` as the new session.
    async fn attach(self: &Arc<Self>, stream: TcpStream) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay failed for {}: {e}", self.address);
        }
        let (reader, writer) = stream.into_split();

        let generation = {
            let mut link = self.link();
            if link.state != LinkState::Connecting || self.lifetime.is_cancelled() {
                debug!("discarding stream for {}: no longer connecting", self.address);
                return;
            }
            link.generation += 1;
            link.generation
        };

        *self.writer.lock().await = Some(SessionWriter {
            generation,
            stream: BufWriter::new(writer),
        });

        let session = self.lifetime.child_token();
        {
            let mut link = self.link();
            if link.state != LinkState::Connecting
                || link.generation != generation
                || self.lifetime.is_cancelled()
            {
                drop(link);
                self.release_writer(generation);
                return;
            }
            self.touch();
            link.state = LinkState::Online;
            link.session = Some(session.clone());
        }

        info!("session with {} is online ({:?})", self.address, self.role);
        self.observer.on_status_change(&self.address, true);
        tokio::spawn(Arc::clone(self).run_reader(reader, session, generation));
    }

    /// Takes the link down.
    ///
    /// With `Some(generation)` this only acts if that generation is the live
    /// Online session; with `None` it acts on whatever is current.  The
    /// offline event fires only on an Online → Offline transition, so it is
    /// reported exactly once however many tasks notice the failure.
    fn drop_link(self: &Arc<Self>, generation: Option<u64>, reason: &dyn fmt::Display) {
        let (was_online, session, current) = {
            let mut link = self.link();
            match generation {
                Some(g) if link.state != LinkState::Online || link.generation != g => return,
                None if link.state == LinkState::Offline => return,
                _ => {}
            }
            let was_online = link.state == LinkState::Online;
            link.state = LinkState::Offline;
            (was_online, link.session.take(), link.generation)
        };

        if let Some(token) = session {
            token.cancel();
        }
        self.release_writer(current);
        if self.role == Role::Responder {
            self.lifetime.cancel();
        }
        if was_online {
            warn!("session with {} went offline: {reason}", self.address);
            self.observer.on_status_change(&self.address, false);
        }
    }

    fn shutdown(self: &Arc<Self>) {
        if self.lifetime.is_cancelled() && self.state() == LinkState::Offline {
            return;
        }
        self.lifetime.cancel();
        self.drop_link(None, &"closed locally");
        debug!("connection to {} shut down", self.address);
    }

    /// Drops the write half of `generation`'s session without waiting for
    /// whoever holds the writer lock.
    fn release_writer(self: &Arc<Self>, generation: u64) {
        fn clear(slot: &mut Option<SessionWriter>, generation: u64) {
            if slot.as_ref().is_some_and(|w| w.generation == generation) {
                *slot = None;
            }
        }

        if let Ok(mut slot) = self.writer.try_lock() {
            clear(&mut slot, generation);
            return;
        }
        // Outside a runtime the writer goes away with `Shared` itself.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let this = Arc::clone(self);
            handle.spawn(async move {
                clear(&mut *this.writer.lock().await, generation);
            });
        }
    }
}

// ── Watchdog ──────────────────────────────────────────────────────────────────

impl Shared {
    async fn run_watchdog(self: Arc<Self>) {
        let mut ticker = time::interval(self.config.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.lifetime.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match self.current_session() {
                Some((generation, _)) => self.watch_session(generation).await,
                None if self.state() == LinkState::Offline => self.try_connect().await,
                None => {}
            }
        }
        debug!("watchdog for {} stopped", self.address);
    }

    async fn watch_session(self: &Arc<Self>, generation: u64) {
        let silent = self.silence();
        if silent > self.config.liveness_timeout {
            self.drop_link(Some(generation), &LinkError::LivenessTimeout(silent));
            return;
        }

        // An outbound transfer holding the writer keeps the peer fed anyway.
        let Ok(mut slot) = self.writer.try_lock() else {
            trace!("writer for {} busy; skipping heartbeat", self.address);
            return;
        };
        let Some(writer) = slot.as_mut().filter(|w| w.generation == generation) else {
            return;
        };
        let sent = time::timeout(
            self.config.heartbeat_interval,
            write_and_flush(&mut writer.stream, &Frame::Heartbeat),
        )
        .await;
        drop(slot);

        match sent {
            Ok(Ok(())) => trace!("heartbeat sent to {}", self.address),
            Ok(Err(e)) => self.drop_link(Some(generation), &e),
            Err(_) => warn!(
                "heartbeat to {} stalled for {:?}; peer is not reading",
                self.address, self.config.heartbeat_interval
            ),
        }
    }
}

// ── Inbound ───────────────────────────────────────────────────────────────────

impl Shared {
    async fn run_reader(
        self: Arc<Self>,
        reader: OwnedReadHalf,
        session: CancellationToken,
        generation: u64,
    ) {
        let mut reader = BufReader::new(reader);
        let result = tokio::select! {
            _ = session.cancelled() => return,
            result = self.read_frames(&mut reader, generation) => result,
        };
        if let Err(e) = result {
            self.drop_link(Some(generation), &e);
        }
    }

    async fn read_frames<R>(self: &Arc<Self>, reader: &mut R, generation: u64) -> Result<(), LinkError>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            let command = wire::read_command(reader).await?;
            self.touch();
            match command {
                Command::Heartbeat => trace!("heartbeat from {}", self.address),
                Command::Ack => trace!("ack from {}", self.address),
                Command::Message => {
                    let text = wire::read_string(reader).await?;
                    self.touch();
                    self.observer.on_message(&self.address, &text);
                }
                Command::File => self.receive_file(reader, generation).await?,
            }
        }
    }

    async fn receive_file<R>(self: &Arc<Self>, reader: &mut R, generation: u64) -> Result<(), LinkError>
    where
        R: AsyncRead + Unpin,
    {
        let (raw_name, size) = wire::read_file_header(reader).await?;
        self.touch();
        let file_name = sanitize_file_name(&raw_name);
        info!("receiving {file_name} ({size} bytes) from {}", self.address);

        let mut sink = match PartFile::create(&self.config.download_dir, &file_name).await {
            Ok(part) => Some(part),
            Err(e) => {
                warn!("cannot store {file_name}: {e}; discarding its bytes");
                None
            }
        };
        let mut local_failure = sink
            .is_none()
            .then(|| "could not create destination file".to_string());

        let mut transfer = Transfer::new(file_name.clone(), size);
        let body = self
            .pump_file_body(reader, &mut transfer, &mut sink, &mut local_failure, generation)
            .await;
        if let Err(e) = body {
            // `sink` is dropped on return, which removes the .part file.
            self.finish(&file_name, TransferOutcome::Failed { reason: e.to_string() });
            return Err(e);
        }

        match (sink, local_failure) {
            (Some(part), None) => match part.commit().await {
                Ok(path) => {
                    info!("saved {} from {}", path.display(), self.address);
                    self.observer.on_file_progress(&self.address, &file_name, 100);
                    self.finish(&file_name, TransferOutcome::Saved { path });
                }
                Err(e) => {
                    warn!("could not finalize {file_name}: {e}");
                    self.finish(&file_name, TransferOutcome::Failed { reason: e.to_string() });
                }
            },
            (_, reason) => {
                let reason = reason.unwrap_or_else(|| "destination unavailable".to_string());
                self.finish(&file_name, TransferOutcome::Failed { reason });
            }
        }
        Ok(())
    }

    /// Reads exactly `transfer.total_size()` bytes into `sink`, sending an ACK
    /// and a progress report every `ack_interval` of wall-clock time, whether
    /// or not bytes are arriving.
    ///
    /// A local write failure drops the sink and keeps consuming the body so
    /// the stream stays framed.
    async fn pump_file_body<R>(
        self: &Arc<Self>,
        reader: &mut R,
        transfer: &mut Transfer,
        sink: &mut Option<PartFile>,
        local_failure: &mut Option<String>,
        generation: u64,
    ) -> Result<(), LinkError>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; self.config.chunk_size.max(1)];
        let mut ack_tick = time::interval(self.config.ack_interval);
        ack_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ack_tick.tick().await;

        while !transfer.is_complete() {
            let want = transfer.next_chunk_len(buf.len());
            // `read` is cancel safe, so an ACK tick never loses body bytes.
            let n = tokio::select! {
                read = reader.read(&mut buf[..want]) => read?,
                _ = ack_tick.tick() => {
                    self.send_ack(generation).await?;
                    self.observer
                        .on_file_progress(&self.address, transfer.file_name(), transfer.percent());
                    continue;
                }
            };
            if n == 0 {
                return Err(LinkError::TruncatedFile {
                    expected: transfer.total_size(),
                    received: transfer.bytes_moved(),
                });
            }
            self.touch();

            let write_error = match sink.as_mut() {
                Some(part) => part.write_chunk(&buf[..n]).await.err(),
                None => None,
            };
            if let Some(e) = write_error {
                warn!("writing {} failed: {e}; discarding the rest", transfer.file_name());
                *local_failure = Some(e.to_string());
                *sink = None;
            }
            transfer.advance(n);
        }
        Ok(())
    }

    /// Sends one ACK unless our own outbound work holds the writer.
    async fn send_ack(&self, generation: u64) -> Result<(), LinkError> {
        let Ok(mut slot) = self.writer.try_lock() else {
            trace!("writer for {} busy; skipping ack", self.address);
            return Ok(());
        };
        let Some(writer) = slot.as_mut().filter(|w| w.generation == generation) else {
            return Ok(());
        };
        match time::timeout(
            self.config.ack_interval,
            write_and_flush(&mut writer.stream, &Frame::Ack),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                debug!("ack to {} stalled", self.address);
                Ok(())
            }
        }
    }

    fn finish(&self, file_name: &str, outcome: TransferOutcome) {
        self.observer
            .on_transfer_finished(&self.address, file_name, &outcome);
    }
}

// ── Outbound ──────────────────────────────────────────────────────────────────

impl Shared {
    async fn run_outbound(self: Arc<Self>, mut jobs: mpsc::Receiver<Outbound>) {
        loop {
            let job = tokio::select! {
                _ = self.lifetime.cancelled() => break,
                job = jobs.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };
            self.perform(job).await;
        }
        debug!("outbound worker for {} stopped", self.address);
    }

    async fn perform(self: &Arc<Self>, job: Outbound) {
        let Some((generation, session)) = self.current_session() else {
            self.abandon_job(&job, "peer went offline");
            return;
        };

        let mut slot = tokio::select! {
            _ = session.cancelled() => {
                self.abandon_job(&job, "peer went offline");
                return;
            }
            slot = self.writer.lock() => slot,
        };
        let Some(writer) = slot.as_mut().filter(|w| w.generation == generation) else {
            self.abandon_job(&job, "peer went offline");
            return;
        };

        let result = tokio::select! {
            _ = session.cancelled() => Err(LinkError::Closed),
            result = self.write_job(&mut writer.stream, &job) => result,
        };
        drop(slot);

        if let Err(e) = result {
            if let Outbound::File(path) = &job {
                self.finish(&display_name(path), TransferOutcome::Failed { reason: e.to_string() });
            }
            self.drop_link(Some(generation), &e);
        }
    }

    fn abandon_job(&self, job: &Outbound, reason: &str) {
        match job {
            Outbound::Frame(_) => debug!("dropping queued message for {}: {reason}", self.address),
            Outbound::File(path) => {
                debug!("dropping queued file {} for {}: {reason}", path.display(), self.address);
                self.finish(
                    &display_name(path),
                    TransferOutcome::Failed {
                        reason: reason.to_string(),
                    },
                );
            }
        }
    }

    async fn write_job<W>(&self, writer: &mut W, job: &Outbound) -> Result<(), LinkError>
    where
        W: AsyncWrite + Unpin,
    {
        match job {
            Outbound::Frame(bytes) => {
                writer.write_all(bytes).await?;
                writer.flush().await?;
                Ok(())
            }
            Outbound::File(path) => self.stream_file(writer, path).await,
        }
    }

    /// Writes a FILE frame for `path`: header, then the body in chunks.
    ///
    /// If the file cannot be opened or its name cannot be encoded, nothing is
    /// written, the failure is reported, and the link stays up.  Once the
    /// header is out, any error ends the session.
    async fn stream_file<W>(&self, writer: &mut W, path: &Path) -> Result<(), LinkError>
    where
        W: AsyncWrite + Unpin,
    {
        let name = display_name(path);
        let prepared = match open_source(path).await {
            Ok((file, size)) => encode_frame(&Frame::FileHeader {
                file_name: name.clone(),
                size,
            })
            .map(|header| (file, size, header))
            .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        let (mut file, size, header) = match prepared {
            Ok(prepared) => prepared,
            Err(reason) => {
                warn!("cannot send {}: {reason}", path.display());
                self.finish(&name, TransferOutcome::Failed { reason });
                return Ok(());
            }
        };

        info!("sending {name} ({size} bytes) to {}", self.address);
        writer.write_all(&header).await?;

        let mut transfer = Transfer::new(name.clone(), size);
        let mut throttle = ProgressThrottle::new(self.config.progress_interval);
        let mut buf = vec![0u8; self.config.chunk_size.max(1)];
        while !transfer.is_complete() {
            let want = transfer.next_chunk_len(buf.len());
            let n = file.read(&mut buf[..want]).await?;
            if n == 0 {
                return Err(LinkError::SourceShrank {
                    path: path.to_path_buf(),
                    expected: size,
                    sent: transfer.bytes_moved(),
                });
            }
            writer.write_all(&buf[..n]).await?;
            transfer.advance(n);
            if !transfer.is_complete() && throttle.should_report() {
                self.observer
                    .on_file_progress(&self.address, &name, transfer.percent());
            }
        }
        writer.flush().await?;

        info!("sent {name} to {}", self.address);
        self.observer.on_file_progress(&self.address, &name, 100);
        self.finish(&name, TransferOutcome::Sent);
        Ok(())
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

async fn write_and_flush<W>(writer: &mut W, frame: &Frame) -> Result<(), LinkError>
where
    W: AsyncWrite + Unpin,
{
    wire::write_frame(writer, frame).await?;
    writer.flush().await?;
    Ok(())
}

async fn dial(address: &PeerAddress, port: u16, source: Option<IpAddr>) -> io::Result<TcpStream> {
    let Some(source) = source else {
        return TcpStream::connect((address.as_str(), port)).await;
    };
    let ip = address.ip().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, format!("{address} is not an IP address"))
    })?;
    let socket = match ip {
        IpAddr::V4(_) => TcpSocket::new_v4()?,
        IpAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.bind(SocketAddr::new(source, 0))?;
    socket.connect(SocketAddr::new(ip, port)).await
}

async fn open_source(path: &Path) -> io::Result<(tokio::fs::File, u64)> {
    let file = tokio::fs::File::open(path).await?;
    let meta = file.metadata().await?;
    if !meta.is_file() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "not a regular file",
        ));
    }
    Ok((file, meta.len()))
}

/// Name announced for an outgoing file: its final path component.
fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
