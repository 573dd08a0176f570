//! Command-line interface
//!
//! This module contains the CLI arguments, the node's interactive menu and
//! the router console.

pub mod commands;
pub mod menu;

pub use commands::{Command, Opt};
pub use menu::{run_node_menu, run_router_console, MenuChoice};
