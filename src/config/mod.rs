//! Configuration management
//!
//! This module holds the well-known ports, bind address and transfer settings
//! shared by routers and nodes, loaded from an optional TOML file and the
//! environment.

pub mod settings;

pub use settings::{
    Config, Settings, DEFAULT_NODE_PORT, DEFAULT_PEER_PORT, DEFAULT_ROUTER_PORT, GLOBAL_CONFIG,
};
