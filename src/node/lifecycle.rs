//! Node lifecycle: attach, discover, link, transfer, terminate.

use crate::config::Settings;
use crate::error::{OverlayError, Result};
use crate::node::listener;
use crate::node::session;
use crate::node::state::{DiscoveryOutcome, NodePhase, NodeState, PeerLink, RouterAttachment};
use crate::protocol::{self, DiscoveryMessage, ReceivedFile, Verdict};
use crate::routing::{Link, LinkId};
use log::{error, info, warn};
use std::io::{BufRead, BufReader, ErrorKind};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Sequence numbers handed to nodes created by this process
static NODE_COUNT: AtomicUsize = AtomicUsize::new(0);

/// State shared between a node and its worker threads
pub(crate) struct NodeShared {
    pub(crate) id: usize,
    pub(crate) local_address: IpAddr,
    pub(crate) settings: Settings,
    pub(crate) listener_addr: SocketAddr,
    state: Mutex<NodeState>,
    phase_changed: Condvar,
    listener_stop: AtomicBool,
    transfer_tx: Mutex<Sender<Result<ReceivedFile>>>,
}

impl NodeShared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("Node {} state lock was poisoned", self.id);
            poisoned.into_inner()
        })
    }

    fn set_phase(&self, state: &mut NodeState, phase: NodePhase) {
        if state.phase != phase {
            info!("Node {} is now {phase}", self.id);
            state.phase = phase;
            self.phase_changed.notify_all();
        }
    }

    /// Tell the router to drop this node's entry, then close the router link
    fn detach_router(&self, state: &mut NodeState) {
        let Some(attachment) = state.router.take() else {
            return;
        };
        let goodbye = DiscoveryMessage::node_disconnect(
            &self.local_address.to_string(),
            &attachment.link_id.to_string(),
        );
        if let Err(e) = attachment.link.send_line(&goodbye.to_line()) {
            warn!("Node {} could not say goodbye to its router: {e}", self.id);
        }
        attachment.link.close();
        info!(
            "Node {} detached from the router at {}",
            self.id, attachment.router_addr
        );
    }

    /// Adopt `stream` as the peer link: start receiving, leave the router,
    /// and move to `LinkedToPeer`.
    pub(crate) fn link_peer(self: &Arc<Self>, state: &mut NodeState, stream: TcpStream) -> Result<()> {
        let remote = stream.peer_addr()?;
        let receive_stream = stream.try_clone()?;
        state.peer = Some(PeerLink { stream, remote });
        session::spawn_receive_worker(Arc::clone(self), receive_stream)?;
        self.detach_router(state);
        self.set_phase(state, NodePhase::LinkedToPeer);
        self.listener_stop.store(true, Ordering::SeqCst);
        info!("Node {} is linked to the peer at {remote}", self.id);
        Ok(())
    }

    pub(crate) fn listener_stopped(&self) -> bool {
        self.listener_stop.load(Ordering::SeqCst)
    }

    /// Stop the peer listener by flagging it and waking its blocked accept
    fn stop_listener(&self) {
        self.listener_stop.store(true, Ordering::SeqCst);
        if let Err(e) = TcpStream::connect(self.listener_addr) {
            // Already gone once its thread has returned
            log::debug!("Peer listener wake-up for node {}: {e}", self.id);
        }
    }

    /// The peer link failed: drop it and the router link, and stop
    pub(crate) fn peer_lost(&self) {
        let mut state = self.lock();
        if let Some(peer) = state.peer.take() {
            let _ = peer.stream.shutdown(Shutdown::Both);
            warn!("Node {} lost its peer link to {}", self.id, peer.remote);
        }
        if let Some(attachment) = state.router.take() {
            attachment.link.close();
        }
        self.set_phase(&mut state, NodePhase::Terminated);
    }

    pub(crate) fn report_transfer(&self, result: Result<ReceivedFile>) {
        match self.transfer_tx.lock() {
            Ok(tx) => {
                if tx.send(result).is_err() {
                    warn!("Node {} dropped a transfer report", self.id);
                }
            }
            Err(e) => error!("Node {} transfer channel poisoned: {e}", self.id),
        }
    }
}

/// A client of the overlay.
///
/// A node attaches to a router when it is created, may discover and link to
/// one peer in the other cluster, exchanges files with it, and closes every
/// link it still holds when terminated or dropped.
pub struct Node {
    shared: Arc<NodeShared>,
    transfers: Mutex<Receiver<Result<ReceivedFile>>>,
}

impl Node {
    /// Attach to the router at `router_addr`.
    ///
    /// The node's identity is `local` when given, otherwise the local address
    /// of the router connection. Its peer listener binds that address on the
    /// configured peer port. Any failure yields `NotConnectedToRouter`.
    pub fn attach(router_addr: SocketAddr, settings: Settings, local: Option<IpAddr>) -> Result<Node> {
        let id = NODE_COUNT.fetch_add(1, Ordering::SeqCst) + 1;
        let not_connected = |what: &str, e: String| {
            OverlayError::NotConnectedToRouter(format!("{what} ({router_addr}): {e}"))
        };

        let stream = TcpStream::connect(router_addr)
            .map_err(|e| not_connected("could not reach the router", e.to_string()))?;
        let local_address = match local {
            Some(addr) => addr,
            None => stream
                .local_addr()
                .map_err(|e| not_connected("no local address", e.to_string()))?
                .ip(),
        };

        let listener = TcpListener::bind(SocketAddr::new(local_address, settings.peer_port))
            .map_err(|e| not_connected("could not listen for peers", e.to_string()))?;
        let listener_addr = listener
            .local_addr()
            .map_err(|e| not_connected("could not listen for peers", e.to_string()))?;

        let link = Link::new(stream).map_err(|e| not_connected("router link", e.to_string()))?;
        let mut reader = link.reader().map_err(|e| not_connected("router link", e.to_string()))?;
        let hello = DiscoveryMessage::node_attach(&local_address.to_string(), &router_addr.ip().to_string());
        link.send_line(&hello.to_line())
            .map_err(|e| not_connected("attach failed", e.to_string()))?;
        let link_id = read_reply(&mut reader)
            .and_then(|line| line.parse::<LinkId>())
            .map_err(|e| not_connected("router did not accept the node", e.to_string()))?;

        let attachment = RouterAttachment {
            link,
            reader,
            link_id,
            router_addr,
        };
        let (transfer_tx, transfer_rx) = mpsc::channel();
        let shared = Arc::new(NodeShared {
            id,
            local_address,
            settings,
            listener_addr,
            state: Mutex::new(NodeState::attached(attachment)),
            phase_changed: Condvar::new(),
            listener_stop: AtomicBool::new(false),
            transfer_tx: Mutex::new(transfer_tx),
        });

        listener::spawn_peer_listener(Arc::clone(&shared), listener)
            .map_err(|e| not_connected("could not start the peer listener", e.to_string()))?;

        info!(
            "Node {id} at {local_address} is attached to the router at {router_addr} as {link_id}"
        );
        Ok(Node {
            shared,
            transfers: Mutex::new(transfer_rx),
        })
    }

    /// Ask the router whether `destination` is reachable and, if so, open a
    /// direct link to it and leave the router.
    ///
    /// Errors other than `NotConnectedToRouter` are fatal to the node.
    pub fn discover_and_link(&self, destination: IpAddr) -> Result<DiscoveryOutcome> {
        let shared = &self.shared;
        let mut state = shared.lock();
        match state.phase {
            NodePhase::LinkedToPeer => {
                info!("Node {} can only link to one peer at a time", shared.id);
                return Ok(DiscoveryOutcome::AlreadyLinked);
            }
            NodePhase::Terminated => {
                return Err(OverlayError::NotConnectedToRouter(format!(
                    "node {} has terminated",
                    shared.id
                )))
            }
            NodePhase::AttachedToRouter => {}
        }

        let attachment = state.router.as_mut().ok_or_else(|| {
            OverlayError::NotConnectedToRouter(format!("node {} has no router link", shared.id))
        })?;
        let request =
            DiscoveryMessage::node_request(&shared.local_address.to_string(), &destination.to_string());
        attachment.link.send_line(&request.to_line())?;
        info!(
            "Node {} asked {} for {destination}",
            shared.id, attachment.router_addr
        );

        let verdict: Verdict = read_reply(&mut attachment.reader)?.parse()?;
        if verdict == Verdict::No {
            info!("Node {} cannot reach {destination}", shared.id);
            return Ok(DiscoveryOutcome::Unreachable);
        }

        let peer_addr = SocketAddr::new(destination, shared.settings.peer_port);
        let stream = TcpStream::connect(peer_addr).map_err(|e| {
            OverlayError::BrokenLink(format!("could not open a direct link to {peer_addr}: {e}"))
        })?;
        shared.link_peer(&mut state, stream)?;
        drop(state);

        shared.stop_listener();
        Ok(DiscoveryOutcome::Linked)
    }

    /// Send one file to the linked peer.
    ///
    /// `FileNotFound` is raised before anything is written and leaves the
    /// link untouched. Any later failure leaves the receiver mid-session, so
    /// the peer link is dropped and the node terminates.
    pub fn send_file(&self, path: &Path) -> Result<u64> {
        let mut stream = {
            let state = self.shared.lock();
            match (&state.phase, &state.peer) {
                (NodePhase::LinkedToPeer, Some(peer)) => peer.stream.try_clone()?,
                _ => return Err(OverlayError::NoPeerLink),
            }
        };

        match protocol::send_file(&mut stream, path) {
            Ok(sent) => Ok(sent),
            Err(e @ OverlayError::FileNotFound(_)) => {
                warn!("Node {} cannot send {}: {e}", self.shared.id, path.display());
                Err(e)
            }
            Err(e) => {
                error!("Node {} abandoned a session: {e}", self.shared.id);
                self.shared.peer_lost();
                Err(e)
            }
        }
    }

    /// Leave the router if still attached, close the peer link and the peer
    /// listener. Safe to call more than once.
    pub fn terminate(&self) {
        let shared = &self.shared;
        {
            let mut state = shared.lock();
            shared.detach_router(&mut state);
            if let Some(peer) = state.peer.take() {
                let _ = peer.stream.shutdown(Shutdown::Both);
                info!("Node {} closed its peer link to {}", shared.id, peer.remote);
            }
            shared.set_phase(&mut state, NodePhase::Terminated);
        }
        if !shared.listener_stopped() {
            shared.stop_listener();
        }
    }

    pub fn id(&self) -> usize {
        self.shared.id
    }

    /// The node's identity as known to routers
    pub fn local_address(&self) -> IpAddr {
        self.shared.local_address
    }

    /// Address the peer listener is bound to
    pub fn peer_listen_addr(&self) -> SocketAddr {
        self.shared.listener_addr
    }

    pub fn phase(&self) -> NodePhase {
        self.shared.lock().phase
    }

    pub fn is_attached_to_router(&self) -> bool {
        self.shared.lock().router.is_some()
    }

    pub fn is_linked_to_peer(&self) -> bool {
        self.phase() == NodePhase::LinkedToPeer
    }

    /// The link id the router assigned, while attached
    pub fn link_id(&self) -> Option<LinkId> {
        self.shared.lock().router.as_ref().map(|r| r.link_id)
    }

    pub fn peer_address(&self) -> Option<SocketAddr> {
        self.shared.lock().peer.as_ref().map(|p| p.remote)
    }

    /// Block until the node reaches `phase` or `timeout` passes
    pub fn wait_for_phase(&self, phase: NodePhase, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();
        while state.phase != phase {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = match self.shared.phase_changed.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }

    /// The outcome of the next completed or failed receive, if one arrives in time
    pub fn wait_for_transfer(&self, timeout: Duration) -> Option<Result<ReceivedFile>> {
        let rx = self.transfers.lock().ok()?;
        match rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Read one reply line from the router
fn read_reply(reader: &mut BufReader<TcpStream>) -> Result<String> {
    let mut line = String::new();
    match reader.read_line(&mut line) {
        Ok(0) => Err(OverlayError::BrokenLink(
            "the router closed the link before answering".to_string(),
        )),
        Ok(_) => Ok(line.trim_end_matches(['\r', '\n']).to_string()),
        Err(e) if e.kind() == ErrorKind::InvalidData => Err(OverlayError::MalformedProtocol(
            format!("reply is not UTF-8: {e}"),
        )),
        Err(e) => Err(OverlayError::BrokenLink(format!(
            "failed to read the router's reply: {e}"
        ))),
    }
}
