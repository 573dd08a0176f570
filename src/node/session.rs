//! File-receive worker for a direct peer link.
//!
//! Runs exactly one Peer Session: reads one file into the download
//! directory, reports the outcome, and exits. A broken link also tears the
//! node's remaining links down.

use crate::error::{OverlayError, Result};
use crate::node::lifecycle::NodeShared;
use crate::protocol;
use log::{error, info};
use std::net::TcpStream;
use std::sync::Arc;
use std::thread;

pub(crate) fn spawn_receive_worker(shared: Arc<NodeShared>, stream: TcpStream) -> Result<()> {
    thread::Builder::new()
        .name(format!("file-receiver-{}", shared.id))
        .spawn(move || receive_one(shared, stream))?;
    Ok(())
}

fn receive_one(shared: Arc<NodeShared>, mut stream: TcpStream) {
    let result = protocol::receive_file(&mut stream, &shared.settings.download_dir);
    match &result {
        Ok(file) => info!(
            "Node {} saved {} ({} bytes) from its peer",
            shared.id, file.name, file.size
        ),
        Err(OverlayError::BrokenLink(reason)) => {
            error!("Node {} lost its peer mid-session: {reason}", shared.id);
            shared.peer_lost();
        }
        Err(e) => error!("Node {} failed to receive a file: {e}", shared.id),
    }
    shared.report_transfer(result);
}
