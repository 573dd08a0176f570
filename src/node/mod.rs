//! Nodes
//!
//! A node walks one state machine:
//! `attach → AttachedToRouter → (discover | dialed) → LinkedToPeer → Terminated`.
//! The two ways into `LinkedToPeer` are the active discovery round-trip
//! (`Node::discover_and_link`) and the passive path taken by the peer
//! listener when another node dials in.

pub mod lifecycle;
pub(crate) mod listener;
pub(crate) mod session;
pub mod state;

pub use lifecycle::Node;
pub use state::{DiscoveryOutcome, NodePhase};
