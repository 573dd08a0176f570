//! Overlay integration tests
//!
//! Drives real routers and nodes over loopback sockets. Every node gets its
//! own 127.0.0.x address so several can share one peer port on one host.

use cluster_link::{
    ClientRouter, DiscoveryOutcome, Node, NodePhase, OverlayError, Router, ServerRouter, Settings,
    TransferHeader,
};
use std::fs;
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::{tempdir, TempDir};

const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
const WAIT: Duration = Duration::from_secs(5);

fn test_settings() -> Settings {
    let probe = TcpListener::bind((LOOPBACK, 0)).unwrap();
    let peer_port = probe.local_addr().unwrap().port();
    Settings {
        bind_address: LOOPBACK,
        router_port: 0,
        node_port: 0,
        peer_port,
        table_capacity: Some(16),
        settle_timeout_ms: 500,
        download_dir: ".".into(),
    }
}

/// Router A (server) and router B (client), linked, both accepting nodes
fn linked_routers(settings: &Settings) -> (ServerRouter, ClientRouter, SocketAddr, SocketAddr) {
    let a = ServerRouter::bind(settings.clone()).unwrap();
    let mut b_settings = settings.clone();
    b_settings.router_port = a.router_listen_addr().port();
    let b = ClientRouter::new(b_settings);

    b.connect_to_router(LOOPBACK).unwrap();
    a.listen_for_router().unwrap();

    let a_nodes = SocketAddr::new(LOOPBACK, a.spawn_node_listener().unwrap().port());
    let b_nodes = SocketAddr::new(LOOPBACK, b.spawn_node_listener().unwrap().port());
    (a, b, a_nodes, b_nodes)
}

fn attach(router: SocketAddr, settings: &Settings, local: &str) -> (Node, TempDir) {
    let dir = tempdir().unwrap();
    let mut settings = settings.clone();
    settings.download_dir = dir.path().to_path_buf();
    let node = Node::attach(router, settings, Some(local.parse().unwrap())).unwrap();
    (node, dir)
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
fn test_routers_link_at_index_zero() {
    let settings = test_settings();
    let (a, b, _, _) = linked_routers(&settings);

    assert!(a.is_peer_linked());
    assert!(b.is_peer_linked());
    assert!(a.table().get(0).unwrap().is_peer_router());
    assert!(b.table().get(0).unwrap().is_peer_router());
}

#[test]
fn test_listen_for_nodes_before_link_fails() {
    let settings = test_settings();
    let a = ServerRouter::bind(settings).unwrap();

    assert!(matches!(a.listen_for_nodes(), Err(OverlayError::NotLinked(_))));
    assert!(!a.is_listening_for_nodes());
}

#[test]
fn test_round_trip_file_transfer() {
    let settings = test_settings();
    let (a, b, a_nodes, b_nodes) = linked_routers(&settings);
    let (x, _x_dir) = attach(a_nodes, &settings, "127.0.0.2");
    let (y, y_dir) = attach(b_nodes, &settings, "127.0.0.3");
    assert!(a.table().find_node("127.0.0.2").is_some());
    assert!(b.table().find_node("127.0.0.3").is_some());

    let outcome = x.discover_and_link("127.0.0.3".parse().unwrap()).unwrap();
    assert_eq!(outcome, DiscoveryOutcome::Linked);
    assert_eq!(x.phase(), NodePhase::LinkedToPeer);
    assert!(y.wait_for_phase(NodePhase::LinkedToPeer, WAIT));

    // Both nodes left their routers
    assert!(!x.is_attached_to_router());
    assert!(!y.is_attached_to_router());
    assert!(wait_until(|| a.table().find_by_identity("127.0.0.2").is_none()));
    assert!(wait_until(|| b.table().find_by_identity("127.0.0.3").is_none()));

    let source_dir = tempdir().unwrap();
    let source = source_dir.path().join("f.bin");
    fs::write(&source, [1u8, 2, 3, 4, 5]).unwrap();
    assert_eq!(x.send_file(&source).unwrap(), 5);

    let received = y.wait_for_transfer(WAIT).unwrap().unwrap();
    assert_eq!(received.name, "f.bin");
    assert_eq!(received.size, 5);
    assert_eq!(received.path, y_dir.path().join("f.bin"));
    assert_eq!(fs::read(&received.path).unwrap(), vec![1u8, 2, 3, 4, 5]);
}

#[test]
fn test_unreachable_destination_keeps_node_attached() {
    let settings = test_settings();
    let (_a, _b, a_nodes, _) = linked_routers(&settings);
    let (x, _x_dir) = attach(a_nodes, &settings, "127.0.0.4");

    let outcome = x.discover_and_link("127.0.0.99".parse().unwrap()).unwrap();
    assert_eq!(outcome, DiscoveryOutcome::Unreachable);
    assert_eq!(x.phase(), NodePhase::AttachedToRouter);
    assert!(x.link_id().is_some());
}

#[test]
fn test_only_one_peer_link() {
    let settings = test_settings();
    let (_a, _b, a_nodes, b_nodes) = linked_routers(&settings);
    let (x, _x_dir) = attach(a_nodes, &settings, "127.0.0.5");
    let (_y, _y_dir) = attach(b_nodes, &settings, "127.0.0.6");

    let target: IpAddr = "127.0.0.6".parse().unwrap();
    assert_eq!(x.discover_and_link(target).unwrap(), DiscoveryOutcome::Linked);
    assert_eq!(
        x.discover_and_link(target).unwrap(),
        DiscoveryOutcome::AlreadyLinked
    );
}

#[test]
fn test_send_errors_are_recoverable() {
    let settings = test_settings();
    let (_a, _b, a_nodes, b_nodes) = linked_routers(&settings);
    let (x, _x_dir) = attach(a_nodes, &settings, "127.0.0.7");
    let (_y, _y_dir) = attach(b_nodes, &settings, "127.0.0.8");

    let missing = tempdir().unwrap().path().join("missing.bin");
    assert_eq!(x.send_file(&missing), Err(OverlayError::NoPeerLink));

    x.discover_and_link("127.0.0.8".parse().unwrap()).unwrap();
    assert!(matches!(
        x.send_file(&missing),
        Err(OverlayError::FileNotFound(_))
    ));
    assert_eq!(x.phase(), NodePhase::LinkedToPeer);
}

#[test]
fn test_terminate_removes_routing_entry() {
    let settings = test_settings();
    let (a, _b, a_nodes, _) = linked_routers(&settings);
    let (x, _x_dir) = attach(a_nodes, &settings, "127.0.0.9");
    assert!(a.table().find_by_identity("127.0.0.9").is_some());

    x.terminate();
    assert_eq!(x.phase(), NodePhase::Terminated);
    assert!(wait_until(|| a.table().find_by_identity("127.0.0.9").is_none()));
    // The peer router stays
    assert!(a.table().peer_router().is_some());
}

#[test]
fn test_short_session_is_broken_link() {
    let settings = test_settings();
    let (_a, _b, _, b_nodes) = linked_routers(&settings);
    let (y, y_dir) = attach(b_nodes, &settings, "127.0.0.10");

    let mut sender = TcpStream::connect(y.peer_listen_addr()).unwrap();
    let header = TransferHeader {
        name: "f.bin".to_string(),
        size: 10,
    };
    header.write_to(&mut sender).unwrap();
    sender.write_all(&[1, 2, 3]).unwrap();
    drop(sender);

    let outcome = y.wait_for_transfer(WAIT).unwrap();
    assert!(matches!(outcome, Err(OverlayError::BrokenLink(_))));
    assert!(y.wait_for_phase(NodePhase::Terminated, WAIT));
    assert!(!y_dir.path().join("f.bin").exists());
}

#[test]
fn test_full_table_rejects_node() {
    let mut settings = test_settings();
    // Room for the peer router only
    settings.table_capacity = Some(1);
    let (a, _b, a_nodes, _) = linked_routers(&settings);

    let result = Node::attach(a_nodes, settings, Some("127.0.0.11".parse().unwrap()));
    assert!(matches!(result, Err(OverlayError::NotConnectedToRouter(_))));
    assert_eq!(a.table().len(), 1);
}

#[test]
fn test_sending_a_directory_keeps_the_link() {
    let settings = test_settings();
    let (_a, _b, a_nodes, b_nodes) = linked_routers(&settings);
    let (x, _x_dir) = attach(a_nodes, &settings, "127.0.0.12");
    let (y, _y_dir) = attach(b_nodes, &settings, "127.0.0.13");
    x.discover_and_link("127.0.0.13".parse().unwrap()).unwrap();

    let source_dir = tempdir().unwrap();
    let result = x.send_file(source_dir.path());
    assert!(matches!(result, Err(OverlayError::FileNotFound(_))));
    assert!(!result.unwrap_err().is_fatal());
    assert_eq!(x.phase(), NodePhase::LinkedToPeer);

    // The same link still carries a real file afterwards
    let source = source_dir.path().join("after.bin");
    fs::write(&source, b"still here").unwrap();
    assert_eq!(x.send_file(&source).unwrap(), 10);
    let received = y.wait_for_transfer(WAIT).unwrap().unwrap();
    assert_eq!(received.name, "after.bin");
}

#[test]
fn test_peer_listeners_close_once_linked() {
    let settings = test_settings();
    let (_a, _b, a_nodes, b_nodes) = linked_routers(&settings);
    let (x, _x_dir) = attach(a_nodes, &settings, "127.0.0.14");
    let (y, _y_dir) = attach(b_nodes, &settings, "127.0.0.15");
    x.discover_and_link("127.0.0.15".parse().unwrap()).unwrap();
    assert!(y.wait_for_phase(NodePhase::LinkedToPeer, WAIT));
    let y_peer = y.peer_address();
    assert!(y_peer.is_some());

    // A third party can no longer dial either node
    assert!(wait_until(|| TcpStream::connect(y.peer_listen_addr()).is_err()));
    assert!(wait_until(|| TcpStream::connect(x.peer_listen_addr()).is_err()));
    assert_eq!(y.peer_address(), y_peer);
    assert_eq!(y.phase(), NodePhase::LinkedToPeer);
    assert_eq!(x.phase(), NodePhase::LinkedToPeer);
}

#[test]
fn test_inbound_peer_without_discovery() {
    let settings = test_settings();
    let (_a, b, _, b_nodes) = linked_routers(&settings);
    let (y, y_dir) = attach(b_nodes, &settings, "127.0.0.16");
    assert!(b.table().find_node("127.0.0.16").is_some());

    let mut sender = TcpStream::connect(y.peer_listen_addr()).unwrap();
    assert!(y.wait_for_phase(NodePhase::LinkedToPeer, WAIT));
    assert_eq!(y.peer_address(), Some(sender.local_addr().unwrap()));
    assert!(!y.is_attached_to_router());
    assert!(wait_until(|| b.table().find_node("127.0.0.16").is_none()));

    let header = TransferHeader {
        name: "hello.txt".to_string(),
        size: 2,
    };
    header.write_to(&mut sender).unwrap();
    sender.write_all(b"hi").unwrap();

    let received = y.wait_for_transfer(WAIT).unwrap().unwrap();
    assert_eq!(received.path, y_dir.path().join("hello.txt"));
    assert_eq!(fs::read(&received.path).unwrap(), b"hi");
}
