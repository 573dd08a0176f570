//! Error handling for the overlay
//!
//! This module provides the error taxonomy shared by routers, nodes and peer sessions.

use std::fmt;

/// Result type alias for overlay operations
pub type Result<T> = std::result::Result<T, OverlayError>;

/// Error types for router, node and peer-session operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlayError {
    /// Operation invoked on the wrong router role
    RouterRole(String),
    /// Router operation requires an established router-to-router link first
    NotLinked(String),
    /// Node failed to attach to (or is no longer attached to) its router
    NotConnectedToRouter(String),
    /// Routing table already holds its maximum number of live entries
    CapacityExceeded { capacity: usize },
    /// Unparseable or unexpected discovery message
    MalformedProtocol(String),
    /// Connection closed or failed mid-session
    BrokenLink(String),
    /// Send requested for a file that cannot be opened
    FileNotFound(String),
    /// Received byte count does not match the declared size
    Integrity { expected: u64, written: u64 },
    /// Send requested while the node holds no peer link
    NoPeerLink,
    /// Configuration errors
    Config(String),
    /// File I/O errors
    Io(String),
}

impl OverlayError {
    /// Whether this error ends the worker (and the owning process) when it
    /// surfaces during steady-state operation.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OverlayError::MalformedProtocol(_) | OverlayError::BrokenLink(_) | OverlayError::Io(_)
        )
    }
}

impl fmt::Display for OverlayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverlayError::RouterRole(msg) => write!(f, "Router role error: {msg}"),
            OverlayError::NotLinked(msg) => write!(f, "Router not linked: {msg}"),
            OverlayError::NotConnectedToRouter(msg) => {
                write!(f, "Not connected to a router: {msg}")
            }
            OverlayError::CapacityExceeded { capacity } => {
                write!(f, "Routing table is full (capacity {capacity})")
            }
            OverlayError::MalformedProtocol(msg) => write!(f, "Malformed protocol message: {msg}"),
            OverlayError::BrokenLink(msg) => write!(f, "Broken link: {msg}"),
            OverlayError::FileNotFound(name) => write!(f, "File not found: {name}"),
            OverlayError::Integrity { expected, written } => {
                write!(
                    f,
                    "Integrity fault: expected {expected} bytes, wrote {written}"
                )
            }
            OverlayError::NoPeerLink => write!(f, "Not linked to a peer"),
            OverlayError::Config(msg) => write!(f, "Configuration error: {msg}"),
            OverlayError::Io(msg) => write!(f, "I/O error: {msg}"),
        }
    }
}

impl std::error::Error for OverlayError {}

impl From<std::io::Error> for OverlayError {
    fn from(err: std::io::Error) -> Self {
        OverlayError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for OverlayError {
    fn from(err: toml::de::Error) -> Self {
        OverlayError::Config(err.to_string())
    }
}
