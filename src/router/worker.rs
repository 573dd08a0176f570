//! Router link workers
//!
//! One worker thread runs per routing-table entry. It reads discovery lines
//! from its link and dispatches them:
//!
//! | sender | type       | action                                                  |
//! |--------|------------|---------------------------------------------------------|
//! | node   | request    | forward as `router:request` to the peer router          |
//! | router | request    | look the destination up, answer `router:response`       |
//! | router | response   | write the bare `YES`/`NO` to the originating node       |
//! | node   | disconnect | remove the named link from the table, stop              |
//!
//! Anything else is a malformed-protocol fault and is reported as fatal.

use crate::error::{OverlayError, Result};
use crate::protocol::{DiscoveryMessage, MessageType, SenderType, Verdict};
use crate::routing::{Link, LinkDescriptor, LinkId, RoutingTable, NODE_LINK_LABEL};
use log::{debug, error, info, warn};
use std::io::{BufRead, BufReader, ErrorKind};
use std::net::{IpAddr, TcpStream};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// What a worker needs from its router
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub(crate) table: Arc<RoutingTable>,
    pub(crate) settle_timeout: Duration,
    pub(crate) fatal: Sender<OverlayError>,
}

impl WorkerContext {
    fn report_fatal(&self, err: OverlayError) {
        error!("Fatal router error: {err}");
        if self.fatal.send(err).is_err() {
            debug!("Router is no longer waiting for fatal errors");
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum WorkerExit {
    /// The far end closed the link
    Closed,
    /// A node asked to be removed
    Disconnected,
}

/// Start the worker for the router-to-router link
pub(crate) fn spawn_peer_router_worker(ctx: WorkerContext, link: Arc<Link>) -> Result<()> {
    let reader = link.reader()?;
    thread::Builder::new()
        .name("peer-router-link".to_string())
        .spawn(move || {
            let result = run_link(&ctx, &link, reader);
            let err = match result {
                Ok(_) => OverlayError::BrokenLink(format!(
                    "peer router at {} closed the link",
                    link.descriptor().remote
                )),
                Err(e) => e,
            };
            ctx.report_fatal(err);
        })?;
    Ok(())
}

/// Run the attach handshake for a freshly accepted node connection, then
/// serve its link until it disconnects or closes.
pub(crate) fn serve_node(ctx: WorkerContext, stream: TcpStream) {
    let link = match Link::new(stream) {
        Ok(link) => Arc::new(link),
        Err(e) => {
            warn!("Dropping node connection: {e}");
            return;
        }
    };
    let descriptor = link.descriptor();

    let reader = match attach_node(&ctx, &link) {
        Ok(reader) => reader,
        Err(e) => {
            warn!("Node at {} failed to attach: {e}", descriptor.remote);
            link.close();
            return;
        }
    };

    match run_link(&ctx, &link, reader) {
        Ok(WorkerExit::Disconnected) => {}
        Ok(WorkerExit::Closed) => {
            info!("Node link {descriptor} closed without a disconnect");
            ctx.table.remove_by_descriptor(&descriptor);
        }
        Err(e) if e.is_fatal() => {
            ctx.table.remove_by_descriptor(&descriptor);
            ctx.report_fatal(e);
        }
        Err(e) => {
            warn!("Node link {descriptor} stopped: {e}");
            ctx.table.remove_by_descriptor(&descriptor);
        }
    }
}

/// Expect `node:attach:<identity>:<router>`, record the node, and answer
/// with its link id. Returns the reader positioned after the attach line.
fn attach_node(ctx: &WorkerContext, link: &Arc<Link>) -> Result<BufReader<TcpStream>> {
    let mut reader = link.reader()?;
    let line = read_line(&mut reader)?.ok_or_else(|| {
        OverlayError::BrokenLink("closed before sending an attach line".to_string())
    })?;

    let msg: DiscoveryMessage = line.parse()?;
    if (msg.sender, msg.kind) != (SenderType::Node, MessageType::Attach) {
        return Err(OverlayError::MalformedProtocol(format!(
            "expected an attach line, got {line:?}"
        )));
    }
    msg.origin.parse::<IpAddr>().map_err(|e| {
        OverlayError::MalformedProtocol(format!("invalid node address {:?}: {e}", msg.origin))
    })?;

    let index = ctx
        .table
        .insert(&msg.origin, Arc::clone(link), NODE_LINK_LABEL)?;
    let link_id = LinkId::new(index);
    link.send_line(&link_id.to_string())?;

    info!(
        "Node {} attached from {} as {link_id}",
        msg.origin,
        link.descriptor().remote
    );
    Ok(reader)
}

fn read_line(reader: &mut BufReader<TcpStream>) -> Result<Option<String>> {
    let mut line = String::new();
    match reader.read_line(&mut line) {
        Ok(0) => Ok(None),
        Ok(_) => Ok(Some(line.trim_end_matches(['\r', '\n']).to_string())),
        Err(e) if e.kind() == ErrorKind::InvalidData => Err(OverlayError::MalformedProtocol(
            format!("line is not UTF-8: {e}"),
        )),
        Err(e) => Err(OverlayError::BrokenLink(format!("read failed: {e}"))),
    }
}

fn run_link(
    ctx: &WorkerContext,
    link: &Arc<Link>,
    mut reader: BufReader<TcpStream>,
) -> Result<WorkerExit> {
    let descriptor = link.descriptor();
    while let Some(line) = read_line(&mut reader)? {
        info!("Router received {line:?} on {descriptor}");
        let msg: DiscoveryMessage = line.parse()?;

        match (msg.sender, msg.kind) {
            (SenderType::Node, MessageType::Request) => forward_request(ctx, &msg)?,
            (SenderType::Router, MessageType::Request) => answer_request(ctx, &msg)?,
            (SenderType::Router, MessageType::Response) => relay_response(ctx, &msg),
            (SenderType::Node, MessageType::Disconnect) => {
                disconnect(ctx, link, &msg)?;
                return Ok(WorkerExit::Disconnected);
            }
            _ => {
                return Err(OverlayError::MalformedProtocol(format!(
                    "unexpected {} {} message: {line:?}",
                    msg.sender, msg.kind
                )))
            }
        }
    }
    Ok(WorkerExit::Closed)
}

fn peer_router(ctx: &WorkerContext) -> Result<Arc<Link>> {
    ctx.table
        .peer_router()
        .map(|entry| entry.link)
        .ok_or_else(|| OverlayError::NotLinked("no peer router in the routing table".to_string()))
}

/// A node asks for a destination: pass the question to the peer router
fn forward_request(ctx: &WorkerContext, msg: &DiscoveryMessage) -> Result<()> {
    let forwarded = DiscoveryMessage::router_request(&msg.origin, &msg.destination);
    peer_router(ctx)?.send_line(&forwarded.to_line())?;
    info!("Forwarded {forwarded} to the peer router");
    Ok(())
}

/// The peer router asks whether a destination is in this cluster.
///
/// The lookup may wait up to the settle timeout, so it runs on its own
/// thread and the router-to-router link keeps flowing meanwhile.
fn answer_request(ctx: &WorkerContext, msg: &DiscoveryMessage) -> Result<()> {
    let ctx = ctx.clone();
    let msg = msg.clone();
    thread::Builder::new()
        .name(format!("lookup-{}", msg.destination))
        .spawn(move || {
            if let Err(e) = lookup_and_answer(&ctx, &msg) {
                ctx.report_fatal(e);
            }
        })?;
    Ok(())
}

fn lookup_and_answer(ctx: &WorkerContext, msg: &DiscoveryMessage) -> Result<()> {
    let found = ctx
        .table
        .wait_for_node(&msg.destination, ctx.settle_timeout)
        .is_some();
    if found {
        info!("Found destination {} in this cluster", msg.destination);
    } else {
        info!("Destination {} is not in this cluster", msg.destination);
    }

    let response =
        DiscoveryMessage::router_response(&msg.origin, &msg.destination, Verdict::from(found));
    peer_router(ctx)?.send_line(&response.to_line())
}

/// The peer router answered: hand the verdict to the node that asked
fn relay_response(ctx: &WorkerContext, msg: &DiscoveryMessage) {
    let verdict = msg.result.unwrap_or(Verdict::No);
    let Some(entry) = ctx.table.find_node(&msg.origin) else {
        warn!(
            "No node {} attached to relay {verdict} for {}",
            msg.origin, msg.destination
        );
        return;
    };

    match entry.link.send_line(&verdict.to_string()) {
        Ok(()) => info!("Relayed {verdict} for {} to {}", msg.destination, msg.origin),
        Err(e) => {
            warn!("Failed to relay to {}: {e}", msg.origin);
            ctx.table.remove_by_link_id(entry.link_id);
        }
    }
}

/// `destination` names the link to drop, either as a link id or as an
/// endpoint descriptor taken from either end of the link.
fn disconnect(ctx: &WorkerContext, link: &Arc<Link>, msg: &DiscoveryMessage) -> Result<()> {
    info!("Disconnecting {} from this router", msg.origin);
    let removed = if let Ok(link_id) = msg.destination.parse::<LinkId>() {
        ctx.table.remove_by_link_id(link_id)
    } else {
        let descriptor = msg.destination.parse::<LinkDescriptor>()?;
        ctx.table.remove_by_descriptor(&descriptor)
    };

    let own = link.descriptor();
    match removed {
        Some(entry) if entry.link.descriptor() == own => {}
        Some(entry) => {
            warn!(
                "{} disconnected {} which is not its own link",
                msg.origin, entry.link_id
            );
            ctx.table.remove_by_descriptor(&own);
        }
        None => {
            warn!("No routing entry matches {}", msg.destination);
            ctx.table.remove_by_descriptor(&own);
        }
    }
    link.close();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::Router;
    use crate::testnet::{
        has_node, loopback_settings, raw_attach, read_line, send_line, start_router_pair,
        wait_until,
    };
    use std::net::TcpStream;

    const SETTLE: Duration = Duration::from_secs(5);

    #[test]
    fn test_unknown_destination_is_answered_no() {
        let pair = start_router_pair(&loopback_settings()).unwrap();
        let (mut stream, mut reader, _) = raw_attach(pair.client_nodes, "127.0.0.31");

        send_line(&mut stream, "node:request:127.0.0.31:127.0.0.99");
        assert_eq!(read_line(&mut reader), "NO");
        assert!(has_node(&pair.client, "127.0.0.31"));
    }

    #[test]
    fn test_known_destination_is_answered_yes() {
        let pair = start_router_pair(&loopback_settings()).unwrap();
        let (mut stream, mut reader, _) = raw_attach(pair.client_nodes, "127.0.0.32");
        let (_dest, _dest_reader, _) = raw_attach(pair.server_nodes, "127.0.0.33");

        send_line(&mut stream, "node:request:127.0.0.32:127.0.0.33");
        assert_eq!(read_line(&mut reader), "YES");
    }

    #[test]
    fn test_slow_lookup_does_not_hold_up_other_answers() {
        let mut settings = loopback_settings();
        settings.settle_timeout_ms = 3000;
        let pair = start_router_pair(&settings).unwrap();
        let (mut stream, mut reader, _) = raw_attach(pair.client_nodes, "127.0.0.41");
        let (_dest, _dest_reader, _) = raw_attach(pair.server_nodes, "127.0.0.42");

        let started = std::time::Instant::now();
        send_line(&mut stream, "node:request:127.0.0.41:127.0.0.97");
        send_line(&mut stream, "node:request:127.0.0.41:127.0.0.42");

        assert_eq!(read_line(&mut reader), "YES");
        assert!(started.elapsed() < Duration::from_millis(2500));
        assert_eq!(read_line(&mut reader), "NO");
    }

    #[test]
    fn test_disconnect_by_descriptor_removes_entry() {
        let pair = start_router_pair(&loopback_settings()).unwrap();
        let (mut stream, mut reader, _) = raw_attach(pair.server_nodes, "127.0.0.34");
        let descriptor = LinkDescriptor::of(&stream).unwrap();

        send_line(&mut stream, &format!("node:disconnect:127.0.0.34:{descriptor}"));
        assert!(wait_until(SETTLE, || !has_node(&pair.server, "127.0.0.34")));
        assert_eq!(pair.server.table().find_by_identity("127.0.0.34"), None);
        // The router closes its end
        assert_eq!(read_line(&mut reader), "");
    }

    #[test]
    fn test_disconnect_by_link_id_removes_entry() {
        let pair = start_router_pair(&loopback_settings()).unwrap();
        let (mut stream, _reader, link_id) = raw_attach(pair.server_nodes, "127.0.0.35");

        send_line(&mut stream, &format!("node:disconnect:127.0.0.35:{link_id}"));
        assert!(wait_until(SETTLE, || pair.server.table().get(link_id.raw()).is_none()));
        assert!(pair.server.table().peer_router().is_some());
    }

    #[test]
    fn test_closed_node_link_is_cleaned_up() {
        let pair = start_router_pair(&loopback_settings()).unwrap();
        let (stream, reader, _) = raw_attach(pair.client_nodes, "127.0.0.36");
        assert!(has_node(&pair.client, "127.0.0.36"));

        drop(reader);
        drop(stream);
        assert!(wait_until(SETTLE, || !has_node(&pair.client, "127.0.0.36")));
    }

    #[test]
    fn test_missing_attach_line_is_rejected() {
        let pair = start_router_pair(&loopback_settings()).unwrap();
        let mut stream = TcpStream::connect(pair.server_nodes).unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());

        send_line(&mut stream, "node:request:127.0.0.37:127.0.0.38");
        assert_eq!(read_line(&mut reader), "");
        assert_eq!(pair.server.table().len(), 1);
    }

    #[test]
    fn test_malformed_line_is_fatal() {
        let pair = start_router_pair(&loopback_settings()).unwrap();
        let (mut stream, _reader, _) = raw_attach(pair.server_nodes, "127.0.0.39");

        send_line(&mut stream, "node:hello:127.0.0.39:127.0.0.1");
        let err = pair.server.wait_for_fatal();
        assert!(matches!(err, OverlayError::MalformedProtocol(_)));
        assert!(!has_node(&pair.server, "127.0.0.39"));
    }

    #[test]
    fn test_lost_peer_router_is_fatal() {
        let pair = start_router_pair(&loopback_settings()).unwrap();
        pair.client.table().close_all();

        let err = pair.server.wait_for_fatal();
        assert!(matches!(err, OverlayError::BrokenLink(_)));
    }
}
