//! Wire protocols
//!
//! Two protocols travel over the overlay's links:
//! - `discovery`: the colon-delimited text lines nodes and routers exchange
//!   to attach, ask for reachability, answer and detach
//! - `transfer`: the binary file-transfer framing used on a direct peer link

pub mod discovery;
pub mod transfer;

pub use discovery::{DiscoveryMessage, MessageType, SenderType, Verdict};
pub use transfer::{receive_file, send_file, ReceivedFile, TransferHeader};
