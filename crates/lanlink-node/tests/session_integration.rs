//! Integration tests: two real nodes talking over loopback.
//!
//! Node A lives on 127.0.0.1 and node B on 127.0.0.2, both using the same TCP
//! port, exactly as two machines on a LAN would.  "127.0.0.2" sorts above
//! "127.0.0.1", so B is always the side that dials.

use std::net::{TcpListener, UdpSocket};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use lanlink_core::PeerAddress;
use lanlink_node::application::observer::mock::RecordingObserver;
use lanlink_node::application::observer::TransferOutcome;
use lanlink_node::infrastructure::network::connection::{LinkState, Role};
use lanlink_node::infrastructure::storage::config::AppConfig;
use lanlink_node::node::LanNode;

const WAIT: Duration = Duration::from_secs(10);
const A_IP: &str = "127.0.0.1";
const B_IP: &str = "127.0.0.2";

struct Pair {
    a: LanNode,
    b: LanNode,
    a_events: Arc<RecordingObserver>,
    b_events: Arc<RecordingObserver>,
    a_dir: PathBuf,
    b_dir: PathBuf,
}

impl Drop for Pair {
    fn drop(&mut self) {
        self.a.shutdown();
        self.b.shutdown();
        std::fs::remove_dir_all(&self.a_dir).ok();
        std::fs::remove_dir_all(&self.b_dir).ok();
    }
}

fn a_addr() -> PeerAddress {
    PeerAddress::from(A_IP)
}

fn b_addr() -> PeerAddress {
    PeerAddress::from(B_IP)
}

fn free_tcp_port() -> u16 {
    TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
}

fn free_udp_port() -> u16 {
    UdpSocket::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
}

fn scratch_dir(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("lanlink_it_{tag}_{}", uuid::Uuid::new_v4()))
}

fn node_config(ip: &str, peer_ip: &str, tcp: u16, udp: u16, auto_connect: bool, dir: &Path) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.node.name = format!("node-{ip}");
    cfg.node.download_dir = Some(dir.to_path_buf());
    cfg.network.bind_address = ip.to_string();
    cfg.network.broadcast_address = peer_ip.to_string();
    cfg.network.listen_port = tcp;
    cfg.network.discovery_port = udp;
    cfg.network.auto_connect = auto_connect;
    cfg.timing.heartbeat_interval_ms = 100;
    cfg.timing.liveness_timeout_ms = 3000;
    cfg.timing.connect_timeout_ms = 500;
    cfg.timing.broadcast_interval_ms = 100;
    cfg.timing.ack_interval_ms = 100;
    cfg.timing.progress_interval_ms = 50;
    cfg
}

async fn start_pair(auto_connect: bool) -> Pair {
    start_pair_with(auto_connect, |_| {}).await
}

/// Like [`start_pair`], with `tweak` applied to both nodes' config.
async fn start_pair_with(auto_connect: bool, tweak: impl Fn(&mut AppConfig)) -> Pair {
    let (tcp, udp) = (free_tcp_port(), free_udp_port());
    let (a_dir, b_dir) = (scratch_dir("a"), scratch_dir("b"));
    let a_events = Arc::new(RecordingObserver::new());
    let b_events = Arc::new(RecordingObserver::new());

    let mut a_config = node_config(A_IP, B_IP, tcp, udp, auto_connect, &a_dir);
    let mut b_config = node_config(B_IP, A_IP, tcp, udp, auto_connect, &b_dir);
    tweak(&mut a_config);
    tweak(&mut b_config);
    let a = LanNode::new(a_config, a_events.clone()).unwrap();
    let b = LanNode::new(b_config, b_events.clone()).unwrap();
    assert_eq!(a.local_address(), &a_addr());
    assert_eq!(b.local_address(), &b_addr());

    assert!(a.start().await.listener.is_some());
    assert!(b.start().await.listener.is_some());

    Pair {
        a,
        b,
        a_events,
        b_events,
        a_dir,
        b_dir,
    }
}

/// Brings the pair Online by having the elected side dial.
async fn connect_pair(pair: &Pair) {
    pair.b.connect_to(a_addr()).await;
    let (a_events, b_events) = (&pair.a_events, &pair.b_events);
    assert!(
        a_events
            .wait_until(WAIT, |_| a_events.statuses_for(&b_addr()) == vec![true])
            .await
    );
    assert!(
        b_events
            .wait_until(WAIT, |_| b_events.statuses_for(&a_addr()) == vec![true])
            .await
    );
}

#[tokio::test]
async fn test_message_is_delivered_once_with_sender_address() {
    // Arrange
    let pair = start_pair(false).await;
    connect_pair(&pair).await;

    // Act
    pair.a.send_message_to(&b_addr(), "hello").await;

    // Assert
    let b_events = &pair.b_events;
    assert!(b_events.wait_until(WAIT, |_| !b_events.messages().is_empty()).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(b_events.messages(), vec![(a_addr(), "hello".to_string())]);
}

#[tokio::test]
async fn test_messages_arrive_in_send_order() {
    // Arrange
    let pair = start_pair(false).await;
    connect_pair(&pair).await;

    // Act
    for i in 0..20 {
        pair.b.send_message_to(&a_addr(), &format!("m{i}")).await;
    }

    // Assert
    let a_events = &pair.a_events;
    assert!(a_events.wait_until(WAIT, |_| a_events.messages().len() == 20).await);
    let texts: Vec<String> = a_events.messages().into_iter().map(|(_, t)| t).collect();
    let expected: Vec<String> = (0..20).map(|i| format!("m{i}")).collect();
    assert_eq!(texts, expected);
}

#[tokio::test]
async fn test_files_of_any_size_arrive_byte_identical() {
    // Arrange
    let pair = start_pair(false).await;
    connect_pair(&pair).await;
    let source_dir = scratch_dir("src");
    std::fs::create_dir_all(&source_dir).unwrap();

    for size in [0usize, 1, 8192, 8193, 300_000] {
        let name = format!("blob_{size}.bin");
        let body: Vec<u8> = (0..size).map(|i| (i * 7 % 256) as u8).collect();
        let path = source_dir.join(&name);
        std::fs::write(&path, &body).unwrap();

        // Act
        pair.a.send_file_to(&b_addr(), &path).await;

        // Assert
        let b_events = &pair.b_events;
        assert!(
            b_events
                .wait_until(WAIT, |_| !b_events.outcomes_for(&name).is_empty())
                .await,
            "no outcome for {name}"
        );
        let saved = pair.b_dir.join(&name);
        assert_eq!(
            b_events.outcomes_for(&name),
            vec![TransferOutcome::Saved { path: saved.clone() }]
        );
        assert_eq!(std::fs::read(&saved).unwrap(), body, "content of {name}");
        let progress = b_events.progress_for(&name);
        assert_eq!(progress.iter().filter(|p| **p == 100).count(), 1);

        let a_events = &pair.a_events;
        assert!(
            a_events
                .wait_until(WAIT, |_| a_events.outcomes_for(&name) == vec![TransferOutcome::Sent])
                .await
        );
    }

    // The session survives every transfer.
    assert_eq!(pair.a.connection_state(&b_addr()), Some(LinkState::Online));
    std::fs::remove_dir_all(&source_dir).ok();
}

#[tokio::test]
async fn test_simultaneous_connect_yields_one_session_dialled_by_greater_address() {
    // Arrange
    let pair = start_pair(false).await;

    // Act: both sides ask for the session in the same instant
    tokio::join!(pair.a.connect_to(b_addr()), pair.b.connect_to(a_addr()));

    // Assert
    let (a_events, b_events) = (&pair.a_events, &pair.b_events);
    assert!(
        a_events
            .wait_until(WAIT, |_| a_events.statuses_for(&b_addr()) == vec![true])
            .await
    );
    assert!(
        b_events
            .wait_until(WAIT, |_| b_events.statuses_for(&a_addr()) == vec![true])
            .await
    );
    tokio::time::sleep(Duration::from_millis(300)).await;

    let a_sessions = pair.a.sessions();
    let b_sessions = pair.b.sessions();
    assert_eq!(a_sessions.len(), 1);
    assert_eq!(b_sessions.len(), 1);
    assert_eq!(a_sessions[0].role, Role::Responder);
    assert_eq!(b_sessions[0].role, Role::Initiator);
    assert_eq!(a_events.statuses_for(&b_addr()), vec![true]);
}

#[tokio::test]
async fn test_send_to_offline_peer_is_a_silent_no_op() {
    // Arrange
    let pair = start_pair(false).await;
    let nowhere = PeerAddress::from("127.0.0.77");

    // Act
    pair.a.send_message_to(&nowhere, "anyone?").await;
    pair.a.send_file_to(&nowhere, Path::new("/etc/hostname")).await;
    pair.a.send_message_to(&b_addr(), "not connected yet").await;

    // Assert
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(pair.a_events.events().is_empty());
    assert!(pair.b_events.events().is_empty());
}

#[tokio::test]
async fn test_disconnect_reports_offline_on_both_sides() {
    // Arrange
    let pair = start_pair(false).await;
    connect_pair(&pair).await;

    // Act
    pair.b.disconnect_from(&a_addr());

    // Assert
    let (a_events, b_events) = (&pair.a_events, &pair.b_events);
    assert_eq!(b_events.statuses_for(&a_addr()), vec![true, false]);
    assert!(
        a_events
            .wait_until(WAIT, |_| a_events.statuses_for(&b_addr()) == vec![true, false])
            .await
    );
    assert!(a_events.wait_until(WAIT, |_| pair.a.sessions().is_empty()).await);
    assert!(pair.b.sessions().is_empty());
}

#[tokio::test]
async fn test_initiator_reconnects_after_remote_restart_of_session() {
    // Arrange
    let pair = start_pair(false).await;
    connect_pair(&pair).await;

    // Act: A drops its responder; B's initiator must come back on its own
    pair.a.disconnect_from(&b_addr());

    // Assert
    let (a_events, b_events) = (&pair.a_events, &pair.b_events);
    assert!(
        b_events
            .wait_until(WAIT, |_| b_events.statuses_for(&a_addr()) == vec![true, false, true])
            .await
    );
    assert!(
        a_events
            .wait_until(WAIT, |_| a_events.statuses_for(&b_addr()) == vec![true, false, true])
            .await
    );
}

#[tokio::test]
async fn test_discovery_and_auto_connect_link_two_nodes() {
    // Arrange / Act: nothing but start-up
    let pair = start_pair(true).await;

    // Assert: each registry lists the other
    let (a_events, b_events) = (&pair.a_events, &pair.b_events);
    assert!(a_events.wait_until(WAIT, |_| pair.a.online_peers() == vec![b_addr()]).await);
    assert!(b_events.wait_until(WAIT, |_| pair.b.online_peers() == vec![a_addr()]).await);

    // And B, the greater address, dialled A
    assert!(
        a_events
            .wait_until(WAIT, |_| a_events.statuses_for(&b_addr()) == vec![true])
            .await
    );
    assert!(b_events.wait_until(WAIT, |_| pair.b.connected_peers() == vec![a_addr()]).await);
    assert_eq!(pair.b.sessions()[0].role, Role::Initiator);
}

#[tokio::test]
async fn test_disconnect_is_not_undone_by_auto_connect() {
    // Arrange
    let pair = start_pair(true).await;
    let b_events = &pair.b_events;
    assert!(
        b_events
            .wait_until(WAIT, |_| b_events.statuses_for(&a_addr()) == vec![true])
            .await
    );

    // Act: plenty of auto-connect ticks
    pair.b.disconnect_from(&a_addr());
    tokio::time::sleep(Duration::from_millis(1500)).await;

    // Assert
    assert_eq!(b_events.statuses_for(&a_addr()), vec![true, false]);
    assert!(pair.b.sessions().is_empty());
    assert!(pair.a.sessions().is_empty());
    assert_eq!(pair.b.online_peers(), vec![a_addr()], "A is still announced");

    // Connecting again is an explicit choice
    pair.b.connect_to(a_addr()).await;
    assert!(
        b_events
            .wait_until(WAIT, |_| b_events.statuses_for(&a_addr()) == vec![true, false, true])
            .await
    );
}

#[tokio::test]
async fn test_transfer_longer_than_liveness_timeout_keeps_session() {
    // Arrange: liveness far shorter than the transfer takes
    let pair = start_pair_with(false, |cfg| {
        cfg.timing.heartbeat_interval_ms = 50;
        cfg.timing.liveness_timeout_ms = 300;
        cfg.timing.ack_interval_ms = 100;
    })
    .await;
    connect_pair(&pair).await;
    let source_dir = scratch_dir("big");
    std::fs::create_dir_all(&source_dir).unwrap();
    let path = source_dir.join("big.bin");
    let body: Vec<u8> = (0..128 * 1024 * 1024usize).map(|i| (i % 253) as u8).collect();
    std::fs::write(&path, &body).unwrap();

    // Act
    let started = std::time::Instant::now();
    pair.a.send_file_to(&b_addr(), &path).await;

    // Assert
    let a_events = &pair.a_events;
    assert!(
        a_events
            .wait_until(Duration::from_secs(60), |_| !a_events.outcomes_for("big.bin").is_empty())
            .await
    );
    let elapsed = started.elapsed();
    assert_eq!(a_events.outcomes_for("big.bin"), vec![TransferOutcome::Sent]);
    let b_events = &pair.b_events;
    assert!(
        b_events
            .wait_until(WAIT, |_| !b_events.outcomes_for("big.bin").is_empty())
            .await
    );
    let saved = pair.b_dir.join("big.bin");
    assert_eq!(
        b_events.outcomes_for("big.bin"),
        vec![TransferOutcome::Saved { path: saved.clone() }]
    );
    assert!(std::fs::read(&saved).unwrap() == body, "received bytes differ");
    assert_eq!(a_events.statuses_for(&b_addr()), vec![true], "sender took {elapsed:?}");
    assert_eq!(b_events.statuses_for(&a_addr()), vec![true]);
    assert_eq!(pair.a.connection_state(&b_addr()), Some(LinkState::Online));

    std::fs::remove_dir_all(&source_dir).ok();
}
