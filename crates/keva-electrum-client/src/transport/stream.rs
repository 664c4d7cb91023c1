//! Byte-stream transport: plain TCP, TLS over TCP, or any caller-supplied duplex stream

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{ElectrumClientResult, TransportError};
use crate::peer::Peer;
use crate::transport::{
    ConnectionInfo, EventReceiver, Transport, TransportEvent, TransportKind, TransportStatistics,
};

const READ_BUFFER_SIZE: usize = 16 * 1024;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

enum StreamTarget {
    Tcp {
        host: String,
        port: u16,
    },
    #[cfg(feature = "tls")]
    Tls {
        host: String,
        port: u16,
    },
    /// Stream handed over by the caller; usable for a single connect
    Prepared(parking_lot::Mutex<Option<(BoxedReader, BoxedWriter)>>),
}

/// Transport over an ordered byte stream
pub struct StreamTransport {
    kind: TransportKind,
    endpoint: String,
    target: StreamTarget,
    reader: parking_lot::Mutex<Option<BoxedReader>>,
    writer: parking_lot::Mutex<Option<BoxedWriter>>,
    connected: Arc<AtomicBool>,
    stats: Arc<parking_lot::Mutex<TransportStatistics>>,
    reader_handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for StreamTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTransport")
            .field("kind", &self.kind)
            .field("endpoint", &self.endpoint)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl StreamTransport {
    fn with_target(kind: TransportKind, endpoint: String, target: StreamTarget) -> Self {
        Self {
            kind,
            endpoint,
            target,
            reader: parking_lot::Mutex::new(None),
            writer: parking_lot::Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(parking_lot::Mutex::new(TransportStatistics::default())),
            reader_handle: None,
        }
    }

    /// Plain TCP transport to the peer
    pub fn tcp(peer: &Peer) -> Self {
        Self::with_target(
            TransportKind::Tcp,
            peer.address(),
            StreamTarget::Tcp {
                host: peer.host.clone(),
                port: peer.port,
            },
        )
    }

    /// TLS transport to the peer, verified against the webpki root set
    #[cfg(feature = "tls")]
    pub fn tls(peer: &Peer) -> Self {
        Self::with_target(
            TransportKind::Tls,
            peer.address(),
            StreamTarget::Tls {
                host: peer.host.clone(),
                port: peer.port,
            },
        )
    }

    /// Wrap an already-established stream, e.g. one end of `tokio::io::duplex`
    pub fn from_stream<S>(kind: TransportKind, endpoint: impl Into<String>, stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let halves: (BoxedReader, BoxedWriter) = (Box::new(reader), Box::new(writer));
        Self::with_target(
            kind,
            endpoint.into(),
            StreamTarget::Prepared(parking_lot::Mutex::new(Some(halves))),
        )
    }

    /// Update statistics
    fn update_stats<F>(&self, update_fn: F)
    where
        F: FnOnce(&mut TransportStatistics),
    {
        let mut stats = self.stats.lock();
        update_fn(&mut stats);
    }

    async fn open_tcp(host: &str, port: u16) -> ElectrumClientResult<TcpStream> {
        let stream = TcpStream::connect((host, port)).await.map_err(|e| {
            TransportError::ConnectionFailed(format!("{}:{}: {}", host, port, e))
        })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }
        Ok(stream)
    }

    async fn open(&mut self) -> ElectrumClientResult<(BoxedReader, BoxedWriter)> {
        match &mut self.target {
            StreamTarget::Tcp { host, port } => {
                let stream = Self::open_tcp(host, *port).await?;
                let (reader, writer) = tokio::io::split(stream);
                Ok((Box::new(reader), Box::new(writer)))
            }
            #[cfg(feature = "tls")]
            StreamTarget::Tls { host, port } => {
                let stream = Self::open_tcp(host, *port).await?;
                let stream = tls::connect(host, stream).await?;
                let (reader, writer) = tokio::io::split(stream);
                Ok((Box::new(reader), Box::new(writer)))
            }
            StreamTarget::Prepared(slot) => slot.get_mut().take().ok_or_else(|| {
                TransportError::ConnectionFailed("prepared stream already used".to_string())
                    .into()
            }),
        }
    }
}

#[async_trait]
impl Transport for StreamTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn connect(&mut self) -> ElectrumClientResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        debug!(endpoint = %self.endpoint, kind = %self.kind, "Opening stream");

        let (reader, writer) = match self.open().await {
            Ok(halves) => halves,
            Err(e) => {
                self.update_stats(|stats| {
                    stats.errors += 1;
                    stats.last_error = Some(e.to_string());
                });
                return Err(e);
            }
        };

        *self.reader.get_mut() = Some(reader);
        *self.writer.get_mut() = Some(writer);
        self.connected.store(true, Ordering::SeqCst);

        info!(endpoint = %self.endpoint, kind = %self.kind, "Stream transport connected");
        Ok(())
    }

    async fn disconnect(&mut self) -> ElectrumClientResult<()> {
        debug!(endpoint = %self.endpoint, "Disconnecting stream transport");
        self.connected.store(false, Ordering::SeqCst);

        if let Some(mut writer) = self.writer.get_mut().take() {
            if let Err(e) = writer.shutdown().await {
                debug!(error = %e, "Stream shutdown failed");
            }
        }
        if let Some(handle) = self.reader_handle.take() {
            handle.abort();
        }
        self.reader.get_mut().take();

        info!(endpoint = %self.endpoint, "Stream transport disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send_text(&mut self, text: &str) -> ElectrumClientResult<()> {
        if !self.is_connected() {
            return Err(TransportError::Closed.into());
        }
        let writer = self
            .writer
            .get_mut()
            .as_mut()
            .ok_or(TransportError::Closed)?;

        let written = async {
            writer.write_all(text.as_bytes()).await?;
            writer.flush().await
        }
        .await;

        match written {
            Ok(()) => {
                self.update_stats(|stats| {
                    stats.frames_sent += 1;
                    stats.bytes_sent += text.len() as u64;
                });
                Ok(())
            }
            Err(e) => {
                warn!(endpoint = %self.endpoint, error = %e, "Stream write failed");
                self.connected.store(false, Ordering::SeqCst);
                self.update_stats(|stats| {
                    stats.errors += 1;
                    stats.last_error = Some(e.to_string());
                });
                Err(TransportError::Io(e).into())
            }
        }
    }

    async fn start_event_listener(&mut self) -> ElectrumClientResult<EventReceiver> {
        let mut reader = self
            .reader
            .get_mut()
            .take()
            .ok_or_else(|| TransportError::ConnectionFailed("stream is not open".to_string()))?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let connected = Arc::clone(&self.connected);
        let stats = Arc::clone(&self.stats);
        let endpoint = self.endpoint.clone();

        let handle = tokio::spawn(async move {
            let mut buffer = vec![0u8; READ_BUFFER_SIZE];
            loop {
                match reader.read(&mut buffer).await {
                    Ok(0) => {
                        debug!(endpoint = %endpoint, "Peer closed the stream");
                        connected.store(false, Ordering::SeqCst);
                        sender.send(TransportEvent::Closed).ok();
                        break;
                    }
                    Ok(n) => {
                        {
                            let mut stats = stats.lock();
                            stats.chunks_received += 1;
                            stats.bytes_received += n as u64;
                        }
                        let chunk = Bytes::copy_from_slice(&buffer[..n]);
                        if sender.send(TransportEvent::Data(chunk)).is_err() {
                            debug!("Event receiver closed, stopping stream reader");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(endpoint = %endpoint, error = %e, "Stream read failed");
                        connected.store(false, Ordering::SeqCst);
                        {
                            let mut stats = stats.lock();
                            stats.errors += 1;
                            stats.last_error = Some(e.to_string());
                        }
                        sender.send(TransportEvent::Error(e.to_string())).ok();
                        break;
                    }
                }
            }
        });

        self.reader_handle = Some(handle);
        Ok(receiver)
    }

    fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            kind: self.kind,
            endpoint: self.endpoint.clone(),
            connected: self.is_connected(),
        }
    }

    fn statistics(&self) -> TransportStatistics {
        self.stats.lock().clone()
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.reader_handle.take() {
            handle.abort();
        }
    }
}

#[cfg(feature = "tls")]
mod tls {
    use std::sync::Arc;
    use tokio::net::TcpStream;
    use tokio_rustls::TlsConnector;
    use tokio_rustls::client::TlsStream;
    use tokio_rustls::rustls::pki_types::ServerName;
    use tokio_rustls::rustls::{self, ClientConfig, RootCertStore};

    use crate::error::{ElectrumClientResult, TransportError};

    pub(super) async fn connect(
        host: &str,
        stream: TcpStream,
    ) -> ElectrumClientResult<TlsStream<TcpStream>> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| TransportError::Tls(e.to_string()))?
            .with_root_certificates(roots)
            .with_no_client_auth();

        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| TransportError::Tls(format!("invalid server name '{}': {}", host, e)))?;

        TlsConnector::from(Arc::new(config))
            .connect(server_name, stream)
            .await
            .map_err(|e| TransportError::Tls(format!("{}: {}", host, e)).into())
    }
}
