use crate::config::Settings;
use crate::error::{OverlayError, Result};
use crate::router::core::{Router, RouterCore, RouterRole};
use log::info;
use std::net::{IpAddr, SocketAddr, TcpStream};

/// Router that dials the server router's well-known port
pub struct ClientRouter {
    core: RouterCore,
}

impl ClientRouter {
    pub fn new(settings: Settings) -> Self {
        Self {
            core: RouterCore::new(RouterRole::Client, settings),
        }
    }

    /// Connect to the peer router at `remote` on the configured router port
    pub fn connect_to_router(&self, remote: IpAddr) -> Result<()> {
        let addr = SocketAddr::new(remote, self.core.settings().router_port);
        let stream = TcpStream::connect(addr).map_err(|e| {
            OverlayError::NotLinked(format!("failed to reach the peer router at {addr}: {e}"))
        })?;
        info!(
            "Client router connected to its peer at {addr} from {}",
            stream.local_addr()?
        );
        self.core.link_peer_router(stream)
    }
}

impl Router for ClientRouter {
    fn core(&self) -> &RouterCore {
        &self.core
    }
}
