use crate::error::{OverlayError, Result};
use log::debug;
use std::fmt;
use std::io::{BufReader, ErrorKind, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::str::FromStr;
use std::sync::Mutex;

const LINK_ID_PREFIX: &str = "link-";

/// Opaque identifier a router assigns to every link it records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(usize);

impl LinkId {
    pub fn new(raw: usize) -> Self {
        LinkId(raw)
    }

    pub fn raw(&self) -> usize {
        self.0
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{LINK_ID_PREFIX}{}", self.0)
    }
}

impl FromStr for LinkId {
    type Err = OverlayError;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .strip_prefix(LINK_ID_PREFIX)
            .and_then(|n| n.parse::<usize>().ok())
            .map(LinkId)
            .ok_or_else(|| OverlayError::MalformedProtocol(format!("invalid link id: {s:?}")))
    }
}

/// The endpoint pair of one TCP connection as seen from one side.
///
/// Text form is `localIp/localPort-remoteIp/remotePort`, which keeps colons
/// out of discovery lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkDescriptor {
    pub local: SocketAddr,
    pub remote: SocketAddr,
}

impl LinkDescriptor {
    pub fn of(stream: &TcpStream) -> Result<Self> {
        Ok(Self {
            local: stream.local_addr()?,
            remote: stream.peer_addr()?,
        })
    }

    /// True when both descriptors name the same physical link, whether they
    /// were taken from the same side or from opposite sides.
    pub fn same_link(&self, other: &LinkDescriptor) -> bool {
        self == other || (self.local == other.remote && self.remote == other.local)
    }
}

impl fmt::Display for LinkDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}-{}/{}",
            self.local.ip(),
            self.local.port(),
            self.remote.ip(),
            self.remote.port()
        )
    }
}

impl FromStr for LinkDescriptor {
    type Err = OverlayError;

    fn from_str(s: &str) -> Result<Self> {
        let malformed = || OverlayError::MalformedProtocol(format!("invalid link descriptor: {s:?}"));
        let parse_end = |end: &str| -> Result<SocketAddr> {
            let (ip, port) = end.split_once('/').ok_or_else(malformed)?;
            let ip = ip.parse().map_err(|_| malformed())?;
            let port = port.parse().map_err(|_| malformed())?;
            Ok(SocketAddr::new(ip, port))
        };

        let (local, remote) = s.trim().split_once('-').ok_or_else(malformed)?;
        Ok(Self {
            local: parse_end(local)?,
            remote: parse_end(remote)?,
        })
    }
}

/// Shared handle on one line-oriented TCP link.
///
/// Writes are serialized so that lines from concurrent workers never
/// interleave; reads go through a separate cloned stream owned by the worker.
pub struct Link {
    writer: Mutex<TcpStream>,
    descriptor: LinkDescriptor,
}

impl Link {
    pub fn new(stream: TcpStream) -> Result<Self> {
        let descriptor = LinkDescriptor::of(&stream)?;
        Ok(Self {
            writer: Mutex::new(stream),
            descriptor,
        })
    }

    pub fn descriptor(&self) -> LinkDescriptor {
        self.descriptor
    }

    /// A buffered reader over a clone of the underlying stream
    pub fn reader(&self) -> Result<BufReader<TcpStream>> {
        let writer = self
            .writer
            .lock()
            .map_err(|e| OverlayError::BrokenLink(format!("link lock poisoned: {e}")))?;
        Ok(BufReader::new(writer.try_clone()?))
    }

    /// Write one line, appending the newline
    pub fn send_line(&self, line: &str) -> Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|e| OverlayError::BrokenLink(format!("link lock poisoned: {e}")))?;
        let mut framed = String::with_capacity(line.len() + 1);
        framed.push_str(line);
        framed.push('\n');
        writer
            .write_all(framed.as_bytes())
            .and_then(|_| writer.flush())
            .map_err(|e| {
                OverlayError::BrokenLink(format!("failed to write to {}: {e}", self.descriptor))
            })
    }

    /// Shut the connection down in both directions, waking any blocked reader
    pub fn close(&self) {
        let writer = match self.writer.lock() {
            Ok(writer) => writer,
            Err(poisoned) => poisoned.into_inner(),
        };
        match writer.shutdown(Shutdown::Both) {
            Ok(()) => debug!("Closed link {}", self.descriptor),
            Err(e) if e.kind() == ErrorKind::NotConnected => {}
            Err(e) => debug!("Error closing link {}: {e}", self.descriptor),
        }
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("descriptor", &self.descriptor)
            .finish()
    }
}
