use crate::config::Settings;
use crate::error::{OverlayError, Result};
use crate::router::core::{Router, RouterCore, RouterRole};
use log::info;
use std::net::{SocketAddr, TcpListener};
use std::sync::Mutex;

/// Router that binds the router-to-router port and waits for its peer
pub struct ServerRouter {
    core: RouterCore,
    router_addr: SocketAddr,
    router_listener: Mutex<Option<TcpListener>>,
}

impl ServerRouter {
    /// Bind the router-to-router listener
    pub fn bind(settings: Settings) -> Result<Self> {
        let addr = SocketAddr::new(settings.bind_address, settings.router_port);
        let listener = TcpListener::bind(addr)
            .map_err(|e| OverlayError::Io(format!("Failed to bind to {addr}: {e}")))?;
        let router_addr = listener.local_addr()?;
        info!("Server router bound to {router_addr}");

        Ok(Self {
            core: RouterCore::new(RouterRole::Server, settings),
            router_addr,
            router_listener: Mutex::new(Some(listener)),
        })
    }

    /// Address the peer router must connect to
    pub fn router_listen_addr(&self) -> SocketAddr {
        self.router_addr
    }

    /// Block until exactly one router connects, then link to it.
    /// The listener is released afterwards.
    pub fn listen_for_router(&self) -> Result<()> {
        let listener = self
            .router_listener
            .lock()
            .map_err(|e| OverlayError::Io(format!("router listener lock poisoned: {e}")))?
            .take()
            .ok_or_else(|| {
                OverlayError::RouterRole("this router has already accepted its peer".to_string())
            })?;

        info!("Server router is listening for its peer on {}", self.router_addr);
        let (stream, peer) = listener.accept()?;
        info!("Peer router connected from {peer}");
        self.core.link_peer_router(stream)
    }

    /// Close every link in the routing table. Returns how many were closed.
    pub fn shutdown(&self) -> usize {
        let closed = self.core.table().close_all();
        info!("Server router shut down {closed} links");
        closed
    }
}

impl Router for ServerRouter {
    fn core(&self) -> &RouterCore {
        &self.core
    }
}
