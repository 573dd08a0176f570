//! Routing state
//!
//! A router records every link attached to it (its peer router at index 0,
//! then its nodes) in a `RoutingTable`. Each record holds a shared `Link`
//! handle so any worker can write to any attached peer.

pub mod link;
pub mod table;

pub use link::{Link, LinkDescriptor, LinkId};
pub use table::{
    EntrySummary, RoutingEntry, RoutingTable, NODE_LINK_LABEL, PEER_ROUTER_INDEX,
    PEER_ROUTER_LABEL,
};
