//! Electrum peers and random peer selection

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::error::{ElectrumClientError, ElectrumClientResult};
use crate::transport::TransportKind;

/// One candidate Electrum server endpoint.
///
/// Written in the usual Electrum server notation `host:port:kind`, where `kind` is `t`
/// (plain TCP), `s` (TLS), `ws` or `wss`. A missing kind means TLS.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Peer {
    pub host: String,
    pub port: u16,
    pub transport: TransportKind,
}

impl Peer {
    pub fn new(host: impl Into<String>, port: u16, transport: TransportKind) -> Self {
        Self {
            host: host.into(),
            port,
            transport,
        }
    }

    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::new(host, port, TransportKind::Tcp)
    }

    pub fn tls(host: impl Into<String>, port: u16) -> Self {
        Self::new(host, port, TransportKind::Tls)
    }

    /// `host:port`, as handed to the socket layer
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// `ws://host:port/` style endpoint for WebSocket peers
    pub fn websocket_url(&self) -> String {
        let scheme = match self.transport {
            TransportKind::Wss => "wss",
            _ => "ws",
        };
        format!("{}://{}:{}/", scheme, self.host, self.port)
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.host, self.port, self.transport.suffix())
    }
}

impl FromStr for Peer {
    type Err = ElectrumClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split(':');
        let host = parts
            .next()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ElectrumClientError::config(format!("peer '{}' has no host", s)))?;
        let port = parts
            .next()
            .ok_or_else(|| ElectrumClientError::config(format!("peer '{}' has no port", s)))?
            .parse::<u16>()
            .map_err(|e| ElectrumClientError::config(format!("peer '{}' has a bad port: {}", s, e)))?;
        let transport = match parts.next() {
            Some(kind) => kind.parse()?,
            None => TransportKind::Tls,
        };
        if parts.next().is_some() {
            return Err(ElectrumClientError::config(format!(
                "peer '{}' has trailing components",
                s
            )));
        }

        Ok(Peer::new(host, port, transport))
    }
}

impl TryFrom<String> for Peer {
    type Error = ElectrumClientError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Peer> for String {
    fn from(peer: Peer) -> Self {
        peer.to_string()
    }
}

/// Uniform random choice over a fixed, non-empty peer set
#[derive(Debug, Clone)]
pub struct PeerSelector {
    peers: Vec<Peer>,
}

impl PeerSelector {
    pub fn new(peers: Vec<Peer>) -> ElectrumClientResult<Self> {
        if peers.is_empty() {
            return Err(ElectrumClientError::config("peer set is empty"));
        }
        Ok(Self { peers })
    }

    /// Pick one configured peer at random
    pub fn pick_peer(&self) -> &Peer {
        let index = (rand::random::<f64>() * self.peers.len() as f64) as usize;
        // clamp: index must stay below len
        let peer = &self.peers[index.min(self.peers.len() - 1)];
        debug!(peer = %peer, "Picked peer");
        peer
    }

    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
