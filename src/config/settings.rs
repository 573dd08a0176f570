use crate::error::{OverlayError, Result};
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::env;
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;

pub static GLOBAL_CONFIG: Lazy<Config> = Lazy::new(Config::new);

/// Router-to-router listening port
pub const DEFAULT_ROUTER_PORT: u16 = 5555;
/// Router-to-node listening port
pub const DEFAULT_NODE_PORT: u16 = 5557;
/// Node-to-node listening port
pub const DEFAULT_PEER_PORT: u16 = 5558;

const DEFAULT_TABLE_CAPACITY: usize = 100;
const DEFAULT_SETTLE_TIMEOUT_MS: u64 = 2000;

const BIND_ADDRESS_KEY: &str = "CLUSTER_BIND_ADDRESS";
const ROUTER_PORT_KEY: &str = "CLUSTER_ROUTER_PORT";
const NODE_PORT_KEY: &str = "CLUSTER_NODE_PORT";
const PEER_PORT_KEY: &str = "CLUSTER_PEER_PORT";
const DOWNLOAD_DIR_KEY: &str = "CLUSTER_DOWNLOAD_DIR";

/// Settings shared by every router and node of one deployment
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Address routers bind their listeners to
    pub bind_address: IpAddr,
    /// Port the server router listens on for its peer router
    pub router_port: u16,
    /// Port routers listen on for nodes
    pub node_port: u16,
    /// Port nodes listen on for a direct peer link
    pub peer_port: u16,
    /// Maximum number of live routing entries, `None` for unbounded
    pub table_capacity: Option<usize>,
    /// How long a router waits for a destination to appear before answering NO
    pub settle_timeout_ms: u64,
    /// Directory received files are written to
    pub download_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            router_port: DEFAULT_ROUTER_PORT,
            node_port: DEFAULT_NODE_PORT,
            peer_port: DEFAULT_PEER_PORT,
            table_capacity: Some(DEFAULT_TABLE_CAPACITY),
            settle_timeout_ms: DEFAULT_SETTLE_TIMEOUT_MS,
            download_dir: PathBuf::from("."),
        }
    }
}

impl Settings {
    /// Parse settings from TOML text; missing keys keep their defaults
    pub fn from_toml_str(text: &str) -> Result<Settings> {
        Ok(toml::from_str(text)?)
    }

    /// Load settings from a TOML file
    pub fn from_file(path: &Path) -> Result<Settings> {
        let text = fs::read_to_string(path).map_err(|e| {
            OverlayError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Apply `CLUSTER_*` environment overrides on top of these settings
    pub fn with_env_overrides(mut self) -> Result<Settings> {
        if let Ok(addr) = env::var(BIND_ADDRESS_KEY) {
            self.bind_address = addr
                .parse()
                .map_err(|e| OverlayError::Config(format!("{BIND_ADDRESS_KEY}={addr}: {e}")))?;
        }
        if let Some(port) = port_from_env(ROUTER_PORT_KEY)? {
            self.router_port = port;
        }
        if let Some(port) = port_from_env(NODE_PORT_KEY)? {
            self.node_port = port;
        }
        if let Some(port) = port_from_env(PEER_PORT_KEY)? {
            self.peer_port = port;
        }
        if let Ok(dir) = env::var(DOWNLOAD_DIR_KEY) {
            self.download_dir = PathBuf::from(dir);
        }
        Ok(self)
    }

    pub fn settle_timeout(&self) -> Duration {
        Duration::from_millis(self.settle_timeout_ms)
    }
}

fn port_from_env(key: &str) -> Result<Option<u16>> {
    match env::var(key) {
        Ok(value) => value
            .parse::<u16>()
            .map(Some)
            .map_err(|e| OverlayError::Config(format!("{key}={value}: {e}"))),
        Err(_) => Ok(None),
    }
}

/// Process-wide holder of the active settings
pub struct Config {
    inner: RwLock<Settings>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Config {
        let settings = match Settings::default().with_env_overrides() {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Ignoring environment overrides: {e}");
                Settings::default()
            }
        };
        Config {
            inner: RwLock::new(settings),
        }
    }

    /// Replace the active settings with the contents of a TOML file (env still wins)
    pub fn load_file(&self, path: &Path) -> Result<()> {
        let settings = Settings::from_file(path)?.with_env_overrides()?;
        self.replace(settings)
    }

    pub fn replace(&self, settings: Settings) -> Result<()> {
        let mut inner = self
            .inner
            .write()
            .map_err(|e| OverlayError::Config(format!("Failed to acquire config lock: {e}")))?;
        *inner = settings;
        Ok(())
    }

    pub fn settings(&self) -> Settings {
        match self.inner.read() {
            Ok(inner) => inner.clone(),
            Err(_) => {
                log::error!("Failed to acquire read lock on config");
                Settings::default()
            }
        }
    }
}
