use crate::config::Settings;
use crate::error::{OverlayError, Result};
use crate::router::worker::{self, WorkerContext};
use crate::routing::{Link, RoutingTable, PEER_ROUTER_INDEX, PEER_ROUTER_LABEL};
use log::{error, info};
use std::fmt;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

/// Which side of the router-to-router link a router plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterRole {
    /// Listens for the peer router
    Server,
    /// Connects to the peer router
    Client,
}

impl FromStr for RouterRole {
    type Err = OverlayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "server" => Ok(RouterRole::Server),
            "client" => Ok(RouterRole::Client),
            _ => Err(OverlayError::RouterRole(format!(
                "a router role can only be 'server' or 'client', got '{s}'"
            ))),
        }
    }
}

impl fmt::Display for RouterRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouterRole::Server => write!(f, "server"),
            RouterRole::Client => write!(f, "client"),
        }
    }
}

/// State shared by both router roles
pub struct RouterCore {
    role: RouterRole,
    settings: Settings,
    table: Arc<RoutingTable>,
    peer_linked: AtomicBool,
    listening_for_nodes: AtomicBool,
    fatal_tx: Mutex<Sender<OverlayError>>,
    fatal_rx: Mutex<Receiver<OverlayError>>,
}

impl RouterCore {
    pub(crate) fn new(role: RouterRole, settings: Settings) -> Self {
        let (fatal_tx, fatal_rx) = mpsc::channel();
        Self {
            role,
            table: Arc::new(RoutingTable::new(settings.table_capacity)),
            settings,
            peer_linked: AtomicBool::new(false),
            listening_for_nodes: AtomicBool::new(false),
            fatal_tx: Mutex::new(fatal_tx),
            fatal_rx: Mutex::new(fatal_rx),
        }
    }

    pub fn role(&self) -> RouterRole {
        self.role
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn table(&self) -> &Arc<RoutingTable> {
        &self.table
    }

    pub fn is_peer_linked(&self) -> bool {
        self.peer_linked.load(Ordering::SeqCst)
    }

    pub fn is_listening_for_nodes(&self) -> bool {
        self.listening_for_nodes.load(Ordering::SeqCst)
    }

    pub(crate) fn worker_context(&self) -> Result<WorkerContext> {
        let fatal = self
            .fatal_tx
            .lock()
            .map_err(|e| OverlayError::Io(format!("fatal channel lock poisoned: {e}")))?
            .clone();
        Ok(WorkerContext {
            table: Arc::clone(&self.table),
            settle_timeout: self.settings.settle_timeout(),
            fatal,
        })
    }

    /// Record the router-to-router link at index 0 and start its worker
    pub(crate) fn link_peer_router(&self, stream: TcpStream) -> Result<()> {
        if self.is_peer_linked() {
            return Err(OverlayError::RouterRole(
                "this router is already linked to a peer router".to_string(),
            ));
        }

        let link = Arc::new(Link::new(stream)?);
        let identity = link.descriptor().remote.ip().to_string();
        let index = self
            .table
            .insert(&identity, Arc::clone(&link), PEER_ROUTER_LABEL)?;
        if index != PEER_ROUTER_INDEX {
            self.table.remove(index);
            return Err(OverlayError::RouterRole(format!(
                "peer router must occupy index {PEER_ROUTER_INDEX}, got {index}"
            )));
        }

        worker::spawn_peer_router_worker(self.worker_context()?, link)?;
        self.peer_linked.store(true, Ordering::SeqCst);
        info!("{} router linked to its peer router at {identity}", self.role);
        Ok(())
    }

    fn bind_node_listener(&self) -> Result<TcpListener> {
        if !self.is_peer_linked() {
            return Err(OverlayError::NotLinked(
                "the router must be linked to another router before it can listen for nodes"
                    .to_string(),
            ));
        }
        let addr = SocketAddr::new(self.settings.bind_address, self.settings.node_port);
        let listener = TcpListener::bind(addr)
            .map_err(|e| OverlayError::Io(format!("Failed to bind to {addr}: {e}")))?;
        self.listening_for_nodes.store(true, Ordering::SeqCst);
        info!(
            "{} router is listening for nodes on {}",
            self.role,
            listener.local_addr()?
        );
        Ok(listener)
    }

    pub fn listen_for_nodes(&self) -> Result<()> {
        let listener = self.bind_node_listener()?;
        accept_nodes(listener, self.worker_context()?);
        Ok(())
    }

    pub fn spawn_node_listener(&self) -> Result<SocketAddr> {
        let listener = self.bind_node_listener()?;
        let addr = listener.local_addr()?;
        let ctx = self.worker_context()?;
        thread::Builder::new()
            .name("node-listener".to_string())
            .spawn(move || accept_nodes(listener, ctx))?;
        Ok(addr)
    }

    pub fn wait_for_fatal(&self) -> OverlayError {
        let rx = match self.fatal_rx.lock() {
            Ok(rx) => rx,
            Err(poisoned) => poisoned.into_inner(),
        };
        rx.recv()
            .unwrap_or_else(|_| OverlayError::BrokenLink("router workers are gone".to_string()))
    }
}

/// Accept node connections forever, one worker thread per connection
fn accept_nodes(listener: TcpListener, ctx: WorkerContext) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let peer_addr = stream
                    .peer_addr()
                    .map(|a| a.to_string())
                    .unwrap_or_else(|_| "unknown".to_string());
                info!("A node connected from {peer_addr}");

                let ctx = ctx.clone();
                let spawned = thread::Builder::new()
                    .name(format!("node-link-{peer_addr}"))
                    .spawn(move || worker::serve_node(ctx, stream));
                if let Err(e) = spawned {
                    error!("Failed to spawn worker for {peer_addr}: {e}");
                }
            }
            Err(e) => {
                error!("Error accepting node connection: {e}");
            }
        }
    }
}

/// Capabilities every router has, whatever its role
pub trait Router {
    fn core(&self) -> &RouterCore;

    fn role(&self) -> RouterRole {
        self.core().role()
    }

    fn table(&self) -> &Arc<RoutingTable> {
        self.core().table()
    }

    fn is_peer_linked(&self) -> bool {
        self.core().is_peer_linked()
    }

    fn is_listening_for_nodes(&self) -> bool {
        self.core().is_listening_for_nodes()
    }

    /// Bind the node port and accept nodes forever on the calling thread.
    /// Fails with `NotLinked` until the router-to-router link exists.
    fn listen_for_nodes(&self) -> Result<()> {
        self.core().listen_for_nodes()
    }

    /// Bind the node port and accept nodes on a background thread,
    /// returning the bound address.
    fn spawn_node_listener(&self) -> Result<SocketAddr> {
        self.core().spawn_node_listener()
    }

    /// Block until a worker reports a fatal error
    fn wait_for_fatal(&self) -> OverlayError {
        self.core().wait_for_fatal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing() {
        assert_eq!("Server".parse::<RouterRole>().unwrap(), RouterRole::Server);
        assert_eq!("client".parse::<RouterRole>().unwrap(), RouterRole::Client);
        assert!(matches!(
            "relay".parse::<RouterRole>(),
            Err(OverlayError::RouterRole(_))
        ));
    }

    #[test]
    fn test_listen_for_nodes_requires_peer_link() {
        let mut settings = Settings::default();
        settings.node_port = 0;
        let core = RouterCore::new(RouterRole::Client, settings);

        assert!(matches!(
            core.listen_for_nodes(),
            Err(OverlayError::NotLinked(_))
        ));
        assert!(matches!(
            core.spawn_node_listener(),
            Err(OverlayError::NotLinked(_))
        ));
        assert!(!core.is_listening_for_nodes());
    }
}
