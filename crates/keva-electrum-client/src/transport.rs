//! Transport layer for the Electrum client
//!
//! A transport moves raw bytes to and from one peer. It knows nothing about framing or
//! JSON-RPC: outbound text is written as-is, inbound data is surfaced as
//! [`TransportEvent::Data`] chunks of arbitrary size.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{ElectrumClientError, ElectrumClientResult};
use crate::peer::Peer;

pub mod stream;
#[cfg(feature = "websocket")]
pub mod websocket;

pub use stream::StreamTransport;
#[cfg(feature = "websocket")]
pub use websocket::WebSocketTransport;

/// Transport kind of a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Plain TCP
    Tcp,
    /// TLS over TCP
    Tls,
    /// WebSocket
    Ws,
    /// WebSocket over TLS
    Wss,
}

impl TransportKind {
    /// Suffix used in `host:port:kind` peer notation
    pub fn suffix(&self) -> &'static str {
        match self {
            TransportKind::Tcp => "t",
            TransportKind::Tls => "s",
            TransportKind::Ws => "ws",
            TransportKind::Wss => "wss",
        }
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, TransportKind::Tls | TransportKind::Wss)
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Tcp => write!(f, "TCP"),
            TransportKind::Tls => write!(f, "TLS"),
            TransportKind::Ws => write!(f, "WebSocket"),
            TransportKind::Wss => write!(f, "WebSocket+TLS"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = ElectrumClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "t" | "tcp" => Ok(TransportKind::Tcp),
            "s" | "ssl" | "tls" => Ok(TransportKind::Tls),
            "w" | "ws" => Ok(TransportKind::Ws),
            "wss" => Ok(TransportKind::Wss),
            other => Err(ElectrumClientError::config(format!(
                "unknown transport kind '{}'",
                other
            ))),
        }
    }
}

/// Events produced by an open transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A chunk of inbound data; may hold part of a frame or several frames
    Data(Bytes),
    /// The peer closed the connection
    Closed,
    /// The transport failed; it is closed afterwards
    Error(String),
}

/// Event receiver for inbound transport events
pub type EventReceiver = tokio::sync::mpsc::UnboundedReceiver<TransportEvent>;

/// Transport connection information
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Transport kind
    pub kind: TransportKind,
    /// Connection endpoint
    pub endpoint: String,
    /// Connection state
    pub connected: bool,
}

/// Transport statistics for monitoring
#[derive(Debug, Clone, Default)]
pub struct TransportStatistics {
    /// Number of writes (frames) sent
    pub frames_sent: u64,
    /// Number of bytes written
    pub bytes_sent: u64,
    /// Number of inbound chunks
    pub chunks_received: u64,
    /// Number of inbound bytes
    pub bytes_received: u64,
    /// Number of errors encountered
    pub errors: u64,
    /// Last error message
    pub last_error: Option<String>,
}

/// Transport trait defining the interface for all transport implementations
#[async_trait]
pub trait Transport: Send + Sync {
    /// Get transport kind
    fn kind(&self) -> TransportKind;

    /// Open the underlying socket. Resolves once the transport is writable.
    async fn connect(&mut self) -> ElectrumClientResult<()>;

    /// Close the underlying socket
    async fn disconnect(&mut self) -> ElectrumClientResult<()>;

    /// Check if connected
    fn is_connected(&self) -> bool;

    /// Write text to the peer exactly as given
    async fn send_text(&mut self, text: &str) -> ElectrumClientResult<()>;

    /// Start reading from the peer. May be called once per successful `connect`.
    async fn start_event_listener(&mut self) -> ElectrumClientResult<EventReceiver>;

    /// Get connection information
    fn connection_info(&self) -> ConnectionInfo;

    /// Get transport statistics
    fn statistics(&self) -> TransportStatistics {
        TransportStatistics::default()
    }
}

/// Type alias for a boxed transport
pub type BoxedTransport = Box<dyn Transport>;

/// Creates transports for peers.
///
/// The session asks its factory for a fresh transport on every (re)connect.
pub trait TransportFactory: Send + Sync {
    fn create(&self, peer: &Peer) -> ElectrumClientResult<BoxedTransport>;
}

/// Builds the transport matching the peer's [`TransportKind`]
#[derive(Debug, Clone, Default)]
pub struct DefaultTransportFactory;

impl TransportFactory for DefaultTransportFactory {
    fn create(&self, peer: &Peer) -> ElectrumClientResult<BoxedTransport> {
        match peer.transport {
            TransportKind::Tcp => Ok(Box::new(StreamTransport::tcp(peer))),
            TransportKind::Tls => tls_transport(peer),
            TransportKind::Ws | TransportKind::Wss => websocket_transport(peer),
        }
    }
}

#[cfg(feature = "tls")]
fn tls_transport(peer: &Peer) -> ElectrumClientResult<BoxedTransport> {
    Ok(Box::new(StreamTransport::tls(peer)))
}

#[cfg(not(feature = "tls"))]
fn tls_transport(peer: &Peer) -> ElectrumClientResult<BoxedTransport> {
    Err(crate::error::TransportError::Unsupported(format!(
        "{} (built without the tls feature)",
        peer
    ))
    .into())
}

#[cfg(feature = "websocket")]
fn websocket_transport(peer: &Peer) -> ElectrumClientResult<BoxedTransport> {
    Ok(Box::new(WebSocketTransport::new(peer)))
}

#[cfg(not(feature = "websocket"))]
fn websocket_transport(peer: &Peer) -> ElectrumClientResult<BoxedTransport> {
    Err(crate::error::TransportError::Unsupported(format!(
        "{} (built without the websocket feature)",
        peer
    ))
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_kind_parsing() {
        assert_eq!("t".parse::<TransportKind>().unwrap(), TransportKind::Tcp);
        assert_eq!("ssl".parse::<TransportKind>().unwrap(), TransportKind::Tls);
        assert_eq!("wss".parse::<TransportKind>().unwrap(), TransportKind::Wss);
        assert!("udp".parse::<TransportKind>().is_err());
        assert!(TransportKind::Tls.is_encrypted());
        assert!(!TransportKind::Ws.is_encrypted());
    }

    #[test]
    fn test_transport_factory() {
        let factory = DefaultTransportFactory;
        let transport = factory.create(&Peer::tcp("127.0.0.1", 50001)).unwrap();
        assert_eq!(transport.kind(), TransportKind::Tcp);
        assert!(!transport.is_connected());
        assert_eq!(transport.connection_info().endpoint, "127.0.0.1:50001");
    }
}
