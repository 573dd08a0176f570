//! Test utilities for overlay testing

use crate::config::Settings;
use crate::error::Result;
use crate::protocol::DiscoveryMessage;
use crate::router::{ClientRouter, Router, ServerRouter};
use crate::routing::LinkId;
use std::io::{BufRead, BufReader, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::time::{Duration, Instant};
use tempfile::TempDir;

pub const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Ask the OS for a port that is free right now
pub fn free_port() -> u16 {
    let probe = TcpListener::bind((LOOPBACK, 0)).unwrap();
    probe.local_addr().unwrap().port()
}

/// Settings for a test deployment: loopback only, ephemeral router ports,
/// one shared peer port, and a short settle timeout
pub fn loopback_settings() -> Settings {
    Settings {
        bind_address: LOOPBACK,
        router_port: 0,
        node_port: 0,
        peer_port: free_port(),
        table_capacity: Some(16),
        settle_timeout_ms: 300,
        download_dir: ".".into(),
    }
}

/// Two routers linked to each other, both accepting nodes
pub struct RouterPair {
    pub server: ServerRouter,
    pub client: ClientRouter,
    /// Where nodes of the server's cluster attach
    pub server_nodes: SocketAddr,
    /// Where nodes of the client's cluster attach
    pub client_nodes: SocketAddr,
}

/// Start a server router and a client router on loopback and link them
pub fn start_router_pair(settings: &Settings) -> Result<RouterPair> {
    let server = ServerRouter::bind(settings.clone())?;

    let mut client_settings = settings.clone();
    client_settings.router_port = server.router_listen_addr().port();
    let client = ClientRouter::new(client_settings);

    // The listener is already bound, so the connect completes before accept
    client.connect_to_router(LOOPBACK)?;
    server.listen_for_router()?;

    let server_nodes = server.spawn_node_listener()?;
    let client_nodes = client.spawn_node_listener()?;
    Ok(RouterPair {
        server,
        client,
        server_nodes: SocketAddr::new(LOOPBACK, server_nodes.port()),
        client_nodes: SocketAddr::new(LOOPBACK, client_nodes.port()),
    })
}

/// Node settings writing received files into a fresh temporary directory
pub fn node_settings(base: &Settings) -> (Settings, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = base.clone();
    settings.download_dir = dir.path().to_path_buf();
    (settings, dir)
}

/// A hand-driven node link: attach as `identity` and return the stream,
/// a reader over it and the link id the router assigned
pub fn raw_attach(
    router: SocketAddr,
    identity: &str,
) -> (TcpStream, BufReader<TcpStream>, LinkId) {
    let mut stream = TcpStream::connect(router).unwrap();
    let hello = DiscoveryMessage::node_attach(identity, &router.ip().to_string());
    send_line(&mut stream, &hello.to_line());

    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let link_id = read_line(&mut reader).parse().unwrap();
    (stream, reader, link_id)
}

pub fn send_line(stream: &mut TcpStream, line: &str) {
    stream.write_all(format!("{line}\n").as_bytes()).unwrap();
}

pub fn read_line(reader: &mut BufReader<TcpStream>) -> String {
    let mut line = String::new();
    reader.read_line(&mut line).unwrap();
    line.trim_end().to_string()
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// Whether the router's table still holds a node entry for `identity`
pub fn has_node<R: Router>(router: &R, identity: &str) -> bool {
    router.table().find_node(identity).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::PEER_ROUTER_INDEX;

    #[test]
    fn test_router_pair_is_linked() {
        let pair = start_router_pair(&loopback_settings()).unwrap();

        assert!(pair.server.is_peer_linked());
        assert!(pair.client.is_peer_linked());
        assert!(pair.server.is_listening_for_nodes());
        assert!(pair.client.is_listening_for_nodes());

        let server_peer = pair.server.table().get(PEER_ROUTER_INDEX).unwrap();
        let client_peer = pair.client.table().get(PEER_ROUTER_INDEX).unwrap();
        assert!(server_peer.is_peer_router());
        assert!(client_peer.is_peer_router());
        assert!(server_peer
            .link
            .descriptor()
            .same_link(&client_peer.link.descriptor()));
    }

    #[test]
    fn test_raw_attach_records_node() {
        let pair = start_router_pair(&loopback_settings()).unwrap();
        let (_stream, _reader, link_id) = raw_attach(pair.server_nodes, "127.0.0.20");

        assert_eq!(link_id, LinkId::new(1));
        assert!(has_node(&pair.server, "127.0.0.20"));
        assert!(!has_node(&pair.client, "127.0.0.20"));
    }
}
