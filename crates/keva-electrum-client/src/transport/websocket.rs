//! WebSocket transport. Each WebSocket message is surfaced as one data chunk;
//! newline framing still applies on top.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::error::{ElectrumClientResult, TransportError};
use crate::peer::Peer;
use crate::transport::{
    ConnectionInfo, EventReceiver, Transport, TransportEvent, TransportKind, TransportStatistics,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport (`ws://` or `wss://`)
pub struct WebSocketTransport {
    kind: TransportKind,
    url: String,
    sink: Option<SplitSink<WsStream, Message>>,
    stream: Option<SplitStream<WsStream>>,
    connected: Arc<AtomicBool>,
    stats: Arc<parking_lot::Mutex<TransportStatistics>>,
    reader_handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("url", &self.url)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl WebSocketTransport {
    pub fn new(peer: &Peer) -> Self {
        let kind = match peer.transport {
            TransportKind::Wss => TransportKind::Wss,
            _ => TransportKind::Ws,
        };
        Self {
            kind,
            url: peer.websocket_url(),
            sink: None,
            stream: None,
            connected: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(parking_lot::Mutex::new(TransportStatistics::default())),
            reader_handle: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn record_error(&self, message: String) {
        let mut stats = self.stats.lock();
        stats.errors += 1;
        stats.last_error = Some(message);
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn connect(&mut self) -> ElectrumClientResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        debug!(url = %self.url, "Opening WebSocket");

        let (ws_stream, _) = match connect_async(self.url.as_str()).await {
            Ok(connected) => connected,
            Err(e) => {
                self.record_error(e.to_string());
                return Err(TransportError::WebSocket(format!("{}: {}", self.url, e)).into());
            }
        };

        let (sink, stream) = ws_stream.split();
        self.sink = Some(sink);
        self.stream = Some(stream);
        self.connected.store(true, Ordering::SeqCst);

        info!(url = %self.url, "WebSocket transport connected");
        Ok(())
    }

    async fn disconnect(&mut self) -> ElectrumClientResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(mut sink) = self.sink.take() {
            if let Err(e) = sink.close().await {
                debug!(error = %e, "WebSocket close failed");
            }
        }
        if let Some(handle) = self.reader_handle.take() {
            handle.abort();
        }
        self.stream = None;

        info!(url = %self.url, "WebSocket transport disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send_text(&mut self, text: &str) -> ElectrumClientResult<()> {
        if !self.is_connected() {
            return Err(TransportError::Closed.into());
        }
        let sink = self.sink.as_mut().ok_or(TransportError::Closed)?;

        match sink.send(Message::Text(text.to_string().into())).await {
            Ok(()) => {
                let mut stats = self.stats.lock();
                stats.frames_sent += 1;
                stats.bytes_sent += text.len() as u64;
                Ok(())
            }
            Err(e) => {
                warn!(url = %self.url, error = %e, "WebSocket send failed");
                self.connected.store(false, Ordering::SeqCst);
                self.record_error(e.to_string());
                Err(TransportError::WebSocket(e.to_string()).into())
            }
        }
    }

    async fn start_event_listener(&mut self) -> ElectrumClientResult<EventReceiver> {
        let mut stream = self.stream.take().ok_or_else(|| {
            TransportError::ConnectionFailed("WebSocket is not open".to_string())
        })?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let connected = Arc::clone(&self.connected);
        let stats = Arc::clone(&self.stats);
        let url = self.url.clone();

        let handle = tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let chunk = match message {
                    Ok(Message::Text(text)) => Bytes::copy_from_slice(text.as_bytes()),
                    Ok(Message::Binary(data)) => Bytes::from(data),
                    Ok(Message::Close(_)) => {
                        debug!(url = %url, "Server closed the WebSocket");
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(url = %url, error = %e, "WebSocket read failed");
                        connected.store(false, Ordering::SeqCst);
                        {
                            let mut stats = stats.lock();
                            stats.errors += 1;
                            stats.last_error = Some(e.to_string());
                        }
                        sender.send(TransportEvent::Error(e.to_string())).ok();
                        return;
                    }
                };

                {
                    let mut stats = stats.lock();
                    stats.chunks_received += 1;
                    stats.bytes_received += chunk.len() as u64;
                }
                if sender.send(TransportEvent::Data(chunk)).is_err() {
                    return;
                }
            }

            connected.store(false, Ordering::SeqCst);
            sender.send(TransportEvent::Closed).ok();
        });

        self.reader_handle = Some(handle);
        Ok(receiver)
    }

    fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            kind: self.kind,
            endpoint: self.url.clone(),
            connected: self.is_connected(),
        }
    }

    fn statistics(&self) -> TransportStatistics {
        self.stats.lock().clone()
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.reader_handle.take() {
            handle.abort();
        }
    }
}
