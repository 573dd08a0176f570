//! The node's peer listener.
//!
//! Bound when the node attaches, it accepts a single inbound peer while the
//! node is still attached to its router. Discovery is asymmetric: the node
//! being looked for never asks its router anything, it is simply dialed.
//! Nothing on the direct link proves the caller was authorized by a router,
//! so each accepted peer is logged as unverified.

use crate::error::Result;
use crate::node::lifecycle::NodeShared;
use crate::node::state::NodePhase;
use log::{debug, error, info, warn};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

pub(crate) fn spawn_peer_listener(shared: Arc<NodeShared>, listener: TcpListener) -> Result<()> {
    info!(
        "Node {} is listening for peers on {}",
        shared.id, shared.listener_addr
    );
    thread::Builder::new()
        .name(format!("peer-listener-{}", shared.id))
        .spawn(move || run(shared, listener))?;
    Ok(())
}

fn run(shared: Arc<NodeShared>, listener: TcpListener) {
    for stream in listener.incoming() {
        if shared.listener_stopped() {
            break;
        }
        match stream {
            Ok(stream) => {
                if accept_peer(&shared, stream) {
                    break;
                }
            }
            Err(e) => {
                warn!("Node {} failed to accept a peer: {e}", shared.id);
            }
        }
    }
    debug!("Node {} stopped listening for peers", shared.id);
}

/// Returns true once a peer has been adopted
fn accept_peer(shared: &Arc<NodeShared>, stream: TcpStream) -> bool {
    let remote = match stream.peer_addr() {
        Ok(addr) => addr,
        Err(e) => {
            warn!("Node {} dropped a peer with no address: {e}", shared.id);
            return false;
        }
    };

    let mut state = shared.lock();
    if state.phase != NodePhase::AttachedToRouter {
        warn!(
            "Node {} is {} and refuses the peer at {remote}",
            shared.id, state.phase
        );
        return state.phase == NodePhase::Terminated;
    }

    warn!(
        "Node {} accepted an unverified peer at {remote}",
        shared.id
    );
    match shared.link_peer(&mut state, stream) {
        Ok(()) => true,
        Err(e) => {
            error!("Node {} could not adopt the peer at {remote}: {e}", shared.id);
            false
        }
    }
}
