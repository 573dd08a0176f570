use crate::routing::{Link, LinkId};
use std::fmt;
use std::io::BufReader;
use std::net::{SocketAddr, TcpStream};

/// Where a node is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodePhase {
    AttachedToRouter,
    LinkedToPeer,
    Terminated,
}

impl fmt::Display for NodePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodePhase::AttachedToRouter => write!(f, "attached to router"),
            NodePhase::LinkedToPeer => write!(f, "linked to peer"),
            NodePhase::Terminated => write!(f, "terminated"),
        }
    }
}

/// Result of asking the router for a destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    /// The destination was found and a direct link is open
    Linked,
    /// The peer router does not know the destination
    Unreachable,
    /// The node already holds a peer link; nothing was sent
    AlreadyLinked,
}

/// The node's link to its router
pub(crate) struct RouterAttachment {
    pub(crate) link: Link,
    pub(crate) reader: BufReader<TcpStream>,
    pub(crate) link_id: LinkId,
    pub(crate) router_addr: SocketAddr,
}

/// The node's direct link to a peer
pub(crate) struct PeerLink {
    pub(crate) stream: TcpStream,
    pub(crate) remote: SocketAddr,
}

pub(crate) struct NodeState {
    pub(crate) phase: NodePhase,
    pub(crate) router: Option<RouterAttachment>,
    pub(crate) peer: Option<PeerLink>,
}

impl NodeState {
    pub(crate) fn attached(router: RouterAttachment) -> Self {
        Self {
            phase: NodePhase::AttachedToRouter,
            router: Some(router),
            peer: None,
        }
    }
}
