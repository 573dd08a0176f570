//! # Cluster Link - My Two-Router Overlay
//!
//! This is a small overlay I built so nodes in two separate clusters can
//! find each other and swap files directly. When I come back to this code,
//! here's what I need to remember:
//!
//! ## What I Built
//! - **Routers**: one per cluster, linked to each other over a single TCP link
//! - **Routing Table**: every router records its peer router and its attached nodes
//! - **Discovery**: a colon-delimited text protocol that asks "is this node over there?"
//! - **Nodes**: attach to a router, discover one peer, then drop the router and link directly
//! - **Peer Sessions**: a tiny binary framing for sending one file at a time
//!
//! ## How I Organized My Code
//! - `routing/`: links, link ids and the routing table
//! - `protocol/`: discovery lines and file-transfer framing
//! - `router/`: server and client routers plus their link workers
//! - `node/`: the node state machine, its peer listener and receive worker
//! - `config/`: ports, bind address and download directory
//! - `cli/`: argument parsing, the node menu and the router console
//!
//! ## Key Design Decisions I Made
//! - Plain blocking sockets with one thread per link, nothing async
//! - A node only counts as attached once its router has answered with a link id,
//!   so the router can never be asked about a node it hasn't recorded yet
//! - Routers wait a bounded time for a destination instead of sleeping blindly
//! - Nodes disconnect by link id rather than by comparing socket strings
//!
//! ## When I Need to Understand Something
//! 1. Start with `main.rs` to see how routers and nodes are started
//! 2. Look at `router/worker.rs` for how discovery lines are dispatched
//! 3. Check `node/lifecycle.rs` for the attach → discover → link flow
//! 4. Review `protocol/transfer.rs` for the file framing

pub mod cli;
pub mod config;
pub mod error;
pub mod node;
pub mod protocol;
pub mod router;
pub mod routing;

#[cfg(test)]
pub mod testnet;

// Re-export commonly used types for convenience
pub use cli::{Command, MenuChoice, Opt};
pub use config::{Config, Settings, GLOBAL_CONFIG};
pub use error::{OverlayError, Result};
pub use node::{DiscoveryOutcome, Node, NodePhase};
pub use protocol::{DiscoveryMessage, MessageType, ReceivedFile, SenderType, TransferHeader, Verdict};
pub use router::{ClientRouter, Router, RouterRole, ServerRouter};
pub use routing::{EntrySummary, Link, LinkDescriptor, LinkId, RoutingEntry, RoutingTable};
