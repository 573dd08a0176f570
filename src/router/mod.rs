//! Routers
//!
//! A router owns a routing table, one link to its peer router and any number
//! of node links. The two roles differ only in how the router-to-router link
//! is made: `ServerRouter` waits for it, `ClientRouter` dials it. Everything
//! else lives behind the shared `Router` trait.

pub mod client;
pub mod core;
pub mod server;
pub(crate) mod worker;

pub use self::core::{Router, RouterCore, RouterRole};
pub use client::ClientRouter;
pub use server::ServerRouter;
