//! One duplex connection to one Electrum server
//!
//! A [`Connection`] owns a transport, a [`Dispatcher`] and a read loop. Inbound chunks go
//! through the [`FrameParser`]; each frame is classified and either settles pending calls or
//! is emitted on the [`NotificationBus`]. Outbound requests are written under the transport
//! lock, so wire ids appear in the order they were allocated.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use keva_electrum_json_rpc::{IncomingMessage, JsonRpcRequest};

use crate::dispatcher::{BatchEntry, Dispatcher};
use crate::error::{ElectrumClientError, ElectrumClientResult, ProtocolError};
use crate::framing::FrameParser;
use crate::notification::NotificationBus;
use crate::transport::{BoxedTransport, EventReceiver, TransportEvent, TransportStatistics};

/// Lifecycle state of a [`Connection`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

struct Shared {
    endpoint: String,
    transport: tokio::sync::Mutex<BoxedTransport>,
    state: parking_lot::Mutex<ConnectionState>,
    dispatcher: Dispatcher,
    notifications: Arc<NotificationBus>,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn set_state(&self, state: ConnectionState) -> ConnectionState {
        std::mem::replace(&mut *self.state.lock(), state)
    }

    fn handle_frame(&self, frame: Vec<u8>) {
        let text = match String::from_utf8(frame) {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    endpoint = %self.endpoint,
                    "{}",
                    ProtocolError::InvalidFrame(e.to_string())
                );
                return;
            }
        };
        let body = text.trim();
        if body.is_empty() {
            return;
        }
        trace!(endpoint = %self.endpoint, frame = %body, "Received frame");

        match IncomingMessage::parse(body) {
            Ok(IncomingMessage::Response(response)) => {
                self.dispatcher.settle_response(response);
            }
            Ok(IncomingMessage::Batch(responses)) => {
                self.dispatcher.settle_batch(responses);
            }
            Ok(IncomingMessage::Notification(notification)) => {
                let params = notification.params_value();
                let handled = self.notifications.emit(&notification.method, params);
                debug!(method = %notification.method, handlers = handled, "Notification");
            }
            Err(e) => {
                warn!(endpoint = %self.endpoint, error = %e, "Dropping invalid frame");
            }
        }
    }

    /// Transport went away underneath us
    async fn on_transport_closed(&self) {
        {
            let mut transport = self.transport.lock().await;
            self.set_state(ConnectionState::Disconnected);
            if let Err(e) = transport.disconnect().await {
                debug!(error = %e, "Transport disconnect after close failed");
            }
        }
        let failed = self
            .dispatcher
            .fail_all(|| ElectrumClientError::ConnectionClosed);
        info!(endpoint = %self.endpoint, failed_calls = failed, "Connection closed by transport");
    }
}

async fn read_loop(shared: Arc<Shared>, mut events: EventReceiver, max_frames_per_feed: usize) {
    let mut parser = FrameParser::new(max_frames_per_feed);

    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Data(chunk) => {
                parser.feed_with(&chunk, |frame| shared.handle_frame(frame));
                // frames held back by the per-feed limit
                while parser.has_complete_frame() {
                    tokio::task::yield_now().await;
                    parser.feed_with(&[], |frame| shared.handle_frame(frame));
                }
            }
            TransportEvent::Closed => {
                debug!(endpoint = %shared.endpoint, "Transport closed");
                break;
            }
            TransportEvent::Error(message) => {
                warn!(endpoint = %shared.endpoint, error = %message, "Transport error");
                break;
            }
        }
    }

    if parser.buffered_len() > 0 {
        debug!(
            endpoint = %shared.endpoint,
            bytes = parser.buffered_len(),
            "Discarding unterminated frame"
        );
    }
    shared.on_transport_closed().await;
}

/// A JSON-RPC connection to a single server
pub struct Connection {
    shared: Arc<Shared>,
    max_frames_per_feed: usize,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.shared.endpoint)
            .field("state", &self.state())
            .field("pending_calls", &self.pending_calls())
            .finish()
    }
}

impl Connection {
    /// Wrap a transport. Nothing is opened until [`Connection::connect`].
    pub fn new(
        transport: BoxedTransport,
        notifications: Arc<NotificationBus>,
        max_frames_per_feed: usize,
    ) -> Self {
        let endpoint = transport.connection_info().endpoint;
        Self {
            shared: Arc::new(Shared {
                endpoint,
                transport: tokio::sync::Mutex::new(transport),
                state: parking_lot::Mutex::new(ConnectionState::Disconnected),
                dispatcher: Dispatcher::new(),
                notifications,
            }),
            max_frames_per_feed,
            reader: parking_lot::Mutex::new(None),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.shared.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Outstanding settlements; a batch counts once
    pub fn pending_calls(&self) -> usize {
        self.shared.dispatcher.pending_count()
    }

    /// Last request id written, 0 before the first request
    pub fn last_request_id(&self) -> u64 {
        self.shared.dispatcher.last_id()
    }

    pub fn notifications(&self) -> &Arc<NotificationBus> {
        &self.shared.notifications
    }

    pub async fn statistics(&self) -> TransportStatistics {
        self.shared.transport.lock().await.statistics()
    }

    /// Open the transport and start reading. Resolves once the transport is open.
    pub async fn connect(&self) -> ElectrumClientResult<()> {
        let mut transport = self.shared.transport.lock().await;
        if self.state() == ConnectionState::Connected {
            return Ok(());
        }

        self.shared.set_state(ConnectionState::Connecting);
        debug!(endpoint = %self.shared.endpoint, "Connecting");

        let opened = async {
            transport.connect().await?;
            transport.start_event_listener().await
        }
        .await;

        let events = match opened {
            Ok(events) => events,
            Err(e) => {
                self.shared.set_state(ConnectionState::Disconnected);
                if let Err(close_error) = transport.disconnect().await {
                    debug!(error = %close_error, "Transport cleanup failed");
                }
                warn!(endpoint = %self.shared.endpoint, error = %e, "Connect failed");
                return Err(e);
            }
        };

        self.shared.set_state(ConnectionState::Connected);
        drop(transport);

        let handle = tokio::spawn(read_loop(
            Arc::clone(&self.shared),
            events,
            self.max_frames_per_feed,
        ));
        if let Some(previous) = self.reader.lock().replace(handle) {
            previous.abort();
        }

        info!(endpoint = %self.shared.endpoint, "Connected");
        Ok(())
    }

    /// Send one request and wait for its response.
    ///
    /// Fails with [`ElectrumClientError::NotConnected`] without writing anything when the
    /// connection is not open. There is no timeout; callers wrap the future if they need one.
    pub async fn request(&self, method: &str, params: Vec<Value>) -> ElectrumClientResult<Value> {
        if !self.is_connected() {
            return Err(ElectrumClientError::NotConnected);
        }

        let receiver = {
            let mut transport = self.shared.transport.lock().await;
            if !self.is_connected() {
                return Err(ElectrumClientError::NotConnected);
            }

            let id = self.shared.dispatcher.next_id();
            let request = JsonRpcRequest::new_with_array_params(id, method, params);
            let mut text = request.to_compact_string()?;
            text.push('\n');

            let receiver = self.shared.dispatcher.register_call(id);
            debug!(id = id, method = %method, "Sending request");
            if let Err(e) = transport.send_text(&text).await {
                self.shared.dispatcher.unregister(id);
                return Err(e);
            }
            receiver
        };

        receiver
            .await
            .map_err(|_| ElectrumClientError::ConnectionClosed)?
    }

    /// Send one request per element of `params` as a single array frame.
    ///
    /// Each request carries `[param]`, or `[param, extra]` when `extra` is given. The batch
    /// settles once; every entry carries the param it was produced by. An empty `params`
    /// resolves to an empty result without touching the wire.
    pub async fn request_batch(
        &self,
        method: &str,
        params: Vec<Value>,
        extra: Option<Value>,
    ) -> ElectrumClientResult<Vec<BatchEntry>> {
        if !self.is_connected() {
            return Err(ElectrumClientError::NotConnected);
        }
        if params.is_empty() {
            return Ok(Vec::new());
        }

        let receiver = {
            let mut transport = self.shared.transport.lock().await;
            if !self.is_connected() {
                return Err(ElectrumClientError::NotConnected);
            }

            let mut requests = Vec::with_capacity(params.len());
            let mut members = BTreeMap::new();
            for param in params {
                let id = self.shared.dispatcher.next_id();
                let args = match &extra {
                    Some(extra) => vec![param.clone(), extra.clone()],
                    None => vec![param.clone()],
                };
                requests.push(JsonRpcRequest::new_with_array_params(id, method, args));
                members.insert(id, param);
            }
            let mut text = serde_json::to_string(&requests)?;
            text.push('\n');

            let (key, receiver) = self.shared.dispatcher.register_batch(members)?;
            debug!(batch = key, size = requests.len(), method = %method, "Sending batch");
            if let Err(e) = transport.send_text(&text).await {
                self.shared.dispatcher.unregister(key);
                return Err(e);
            }
            receiver
        };

        receiver
            .await
            .map_err(|_| ElectrumClientError::ConnectionClosed)?
    }

    /// Close the connection and fail every pending call. Closing twice is a no-op.
    pub async fn close(&self) {
        let reader = self.reader.lock().take();
        let was_open = {
            let mut transport = self.shared.transport.lock().await;
            let previous = self.shared.set_state(ConnectionState::Disconnected);
            if let Some(handle) = &reader {
                handle.abort();
            }
            if previous != ConnectionState::Disconnected || transport.is_connected() {
                if let Err(e) = transport.disconnect().await {
                    debug!(error = %e, "Transport disconnect failed");
                }
                true
            } else {
                false
            }
        };

        let failed = self
            .shared
            .dispatcher
            .fail_all(|| ElectrumClientError::ConnectionClosed);
        if was_open {
            info!(endpoint = %self.shared.endpoint, failed_calls = failed, "Connection closed");
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(handle) = self.reader.get_mut().take() {
            handle.abort();
        }
    }
}
