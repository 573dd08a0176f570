//! Interactive surfaces: the node's menu and the router console.
//!
//! Both read from any `BufRead` and write to any `Write`, so `main` hands
//! them stdin/stdout and tests hand them byte buffers.

use crate::error::{OverlayError, Result};
use crate::node::{DiscoveryOutcome, Node, NodePhase};
use crate::routing::RoutingTable;
use std::io::{BufRead, Write};
use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// One entry of the node menu
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    ConnectToPeer,
    SendFile,
    Quit,
}

impl FromStr for MenuChoice {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1" | "connect" => Ok(MenuChoice::ConnectToPeer),
            "2" | "send" => Ok(MenuChoice::SendFile),
            "3" | "quit" | "q" => Ok(MenuChoice::Quit),
            other => Err(format!(
                "Invalid choice: {other}. Valid options: 1 (connect), 2 (send), 3 (quit)"
            )),
        }
    }
}

/// Read one trimmed line, `None` at end of input
fn read_input<R: BufRead>(input: &mut R) -> Result<Option<String>> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

fn ask<R: BufRead, W: Write>(input: &mut R, out: &mut W, question: &str) -> Result<Option<String>> {
    write!(out, "{question}")?;
    out.flush()?;
    read_input(input)
}

/// Print every file received since the last prompt
fn report_transfers<W: Write>(node: &Node, out: &mut W) -> Result<()> {
    while let Some(result) = node.wait_for_transfer(Duration::ZERO) {
        match result {
            Ok(file) => writeln!(
                out,
                "Received {} ({} bytes) into {}",
                file.name,
                file.size,
                file.path.display()
            )?,
            Err(e) => writeln!(out, "A transfer failed: {e}")?,
        }
    }
    Ok(())
}

/// Drive a node from a text menu until the user quits or input ends.
///
/// Recoverable failures are printed and the menu continues; fatal ones
/// terminate the node and are returned.
pub fn run_node_menu<R: BufRead, W: Write>(node: &Node, input: &mut R, out: &mut W) -> Result<()> {
    loop {
        report_transfers(node, out)?;
        writeln!(out, "\nNode {} ({})", node.local_address(), node.phase())?;
        writeln!(out, "  1) Connect to a peer")?;
        writeln!(out, "  2) Send a file")?;
        writeln!(out, "  3) Quit")?;

        let Some(line) = ask(input, out, "> ")? else {
            node.terminate();
            return Ok(());
        };
        if line.is_empty() {
            continue;
        }
        let choice = match line.parse::<MenuChoice>() {
            Ok(choice) => choice,
            Err(msg) => {
                writeln!(out, "{msg}")?;
                continue;
            }
        };

        match choice {
            MenuChoice::ConnectToPeer => connect(node, input, out)?,
            MenuChoice::SendFile => send(node, input, out)?,
            MenuChoice::Quit => {
                node.terminate();
                writeln!(out, "Goodbye")?;
                return Ok(());
            }
        }
    }
}

fn connect<R: BufRead, W: Write>(node: &Node, input: &mut R, out: &mut W) -> Result<()> {
    let Some(answer) = ask(input, out, "Peer address: ")? else {
        return Ok(());
    };
    let destination = match answer.parse::<IpAddr>() {
        Ok(ip) => ip,
        Err(e) => {
            writeln!(out, "Invalid address {answer:?}: {e}")?;
            return Ok(());
        }
    };

    match node.discover_and_link(destination) {
        Ok(DiscoveryOutcome::Linked) => match node.peer_address() {
            Some(peer) => writeln!(out, "Linked to {destination} at {peer}")?,
            None => writeln!(out, "Linked to {destination}, but the link already closed")?,
        },
        Ok(DiscoveryOutcome::Unreachable) => writeln!(out, "{destination} is not reachable")?,
        Ok(DiscoveryOutcome::AlreadyLinked) => {
            writeln!(out, "Already linked to a peer, only one link is allowed")?
        }
        Err(e @ OverlayError::NotConnectedToRouter(_)) => writeln!(out, "{e}")?,
        Err(e) => {
            node.terminate();
            return Err(e);
        }
    }
    Ok(())
}

fn send<R: BufRead, W: Write>(node: &Node, input: &mut R, out: &mut W) -> Result<()> {
    let Some(answer) = ask(input, out, "File to send: ")? else {
        return Ok(());
    };
    match node.send_file(Path::new(&answer)) {
        Ok(size) => writeln!(out, "Sent {answer} ({size} bytes)")?,
        Err(e) if e.is_fatal() || node.phase() == NodePhase::Terminated => {
            node.terminate();
            return Err(e);
        }
        Err(e) => writeln!(out, "{e}")?,
    }
    Ok(())
}

/// Router console: `status` prints the routing table as JSON, `quit` returns.
/// End of input behaves like `quit`.
pub fn run_router_console<R: BufRead, W: Write>(
    table: &RoutingTable,
    input: &mut R,
    out: &mut W,
) -> Result<()> {
    while let Some(line) = ask(input, out, "router> ")? {
        match line.as_str() {
            "" => {}
            "status" => {
                let json = serde_json::to_string_pretty(&table.snapshot())
                    .map_err(|e| OverlayError::Io(format!("Failed to render status: {e}")))?;
                writeln!(out, "{json}")?;
            }
            "quit" | "exit" => return Ok(()),
            other => writeln!(out, "Unknown command {other:?}. Try 'status' or 'quit'")?,
        }
    }
    Ok(())
}
