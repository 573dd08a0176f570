//! Discovery protocol messages
//!
//! Every message is one line of the form
//! `senderType:messageType:origin:destination[:result]`, where `result`
//! (`YES`/`NO`) appears only on responses. Addresses are IPv4 dotted quads
//! since the field separator is a colon.

use crate::error::{OverlayError, Result};
use std::fmt;
use std::str::FromStr;

const FIELD_SEPARATOR: char = ':';

/// Who wrote the message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderType {
    Node,
    Router,
}

/// What the message asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// First line a node writes to its router
    Attach,
    Request,
    Response,
    Disconnect,
}

/// Reachability answer carried by responses and relayed to nodes as a bare token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Yes,
    No,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryMessage {
    pub sender: SenderType,
    pub kind: MessageType,
    /// Address of the node that started the exchange
    pub origin: String,
    /// Address being asked for, or the link being torn down on disconnect
    pub destination: String,
    pub result: Option<Verdict>,
}

impl DiscoveryMessage {
    fn new(sender: SenderType, kind: MessageType, origin: &str, destination: &str) -> Self {
        Self {
            sender,
            kind,
            origin: origin.to_string(),
            destination: destination.to_string(),
            result: None,
        }
    }

    /// `node:attach:<identity>:<router>`
    pub fn node_attach(identity: &str, router: &str) -> Self {
        Self::new(SenderType::Node, MessageType::Attach, identity, router)
    }

    /// `node:request:<origin>:<destination>`
    pub fn node_request(origin: &str, destination: &str) -> Self {
        Self::new(SenderType::Node, MessageType::Request, origin, destination)
    }

    /// `node:disconnect:<origin>:<link>`
    pub fn node_disconnect(origin: &str, link: &str) -> Self {
        Self::new(SenderType::Node, MessageType::Disconnect, origin, link)
    }

    /// `router:request:<origin>:<destination>`
    pub fn router_request(origin: &str, destination: &str) -> Self {
        Self::new(SenderType::Router, MessageType::Request, origin, destination)
    }

    /// `router:response:<origin>:<destination>:<YES|NO>`
    pub fn router_response(origin: &str, destination: &str, verdict: Verdict) -> Self {
        let mut msg = Self::new(SenderType::Router, MessageType::Response, origin, destination);
        msg.result = Some(verdict);
        msg
    }

    /// Serialize to a wire line, without the trailing newline
    pub fn to_line(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for DiscoveryMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.sender, self.kind, self.origin, self.destination
        )?;
        if let Some(verdict) = self.result {
            write!(f, ":{verdict}")?;
        }
        Ok(())
    }
}

impl FromStr for DiscoveryMessage {
    type Err = OverlayError;

    fn from_str(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let fields: Vec<&str> = line.split(FIELD_SEPARATOR).collect();
        if fields.len() != 4 && fields.len() != 5 {
            return Err(OverlayError::MalformedProtocol(format!(
                "expected 4 or 5 fields, got {}: {line:?}",
                fields.len()
            )));
        }

        let sender = fields[0].parse::<SenderType>()?;
        let kind = fields[1].parse::<MessageType>()?;
        let (origin, destination) = (fields[2], fields[3]);
        if origin.is_empty() || destination.is_empty() {
            return Err(OverlayError::MalformedProtocol(format!(
                "empty address field: {line:?}"
            )));
        }

        let result = match (kind, fields.get(4)) {
            (MessageType::Response, Some(token)) => Some(token.parse::<Verdict>()?),
            (MessageType::Response, None) => {
                return Err(OverlayError::MalformedProtocol(format!(
                    "response without a result: {line:?}"
                )))
            }
            (_, Some(_)) => {
                return Err(OverlayError::MalformedProtocol(format!(
                    "only responses carry a result: {line:?}"
                )))
            }
            (_, None) => None,
        };

        Ok(DiscoveryMessage {
            sender,
            kind,
            origin: origin.to_string(),
            destination: destination.to_string(),
            result,
        })
    }
}

impl fmt::Display for SenderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SenderType::Node => write!(f, "node"),
            SenderType::Router => write!(f, "router"),
        }
    }
}

impl FromStr for SenderType {
    type Err = OverlayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "node" => Ok(SenderType::Node),
            "router" => Ok(SenderType::Router),
            _ => Err(OverlayError::MalformedProtocol(format!(
                "unknown sender type: {s}"
            ))),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Attach => write!(f, "attach"),
            MessageType::Request => write!(f, "request"),
            MessageType::Response => write!(f, "response"),
            MessageType::Disconnect => write!(f, "disconnect"),
        }
    }
}

impl FromStr for MessageType {
    type Err = OverlayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "attach" => Ok(MessageType::Attach),
            "request" => Ok(MessageType::Request),
            "response" => Ok(MessageType::Response),
            "disconnect" => Ok(MessageType::Disconnect),
            _ => Err(OverlayError::MalformedProtocol(format!(
                "unknown message type: {s}"
            ))),
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Yes => write!(f, "YES"),
            Verdict::No => write!(f, "NO"),
        }
    }
}

impl FromStr for Verdict {
    type Err = OverlayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "YES" => Ok(Verdict::Yes),
            "NO" => Ok(Verdict::No),
            _ => Err(OverlayError::MalformedProtocol(format!(
                "expected YES or NO, got {s:?}"
            ))),
        }
    }
}

impl From<bool> for Verdict {
    fn from(found: bool) -> Self {
        if found {
            Verdict::Yes
        } else {
            Verdict::No
        }
    }
}
