//! Testnet Framework for Overlay Testing
//!
//! This module starts linked router pairs on loopback and provides small
//! helpers for driving them with raw sockets or real nodes.

pub mod test_utils;

pub use test_utils::*;
