//! Session: owns the current connection and keeps it alive
//!
//! An [`ElectrumSession`] picks a peer at random, opens a [`Connection`], performs the
//! `server.version` handshake and installs the connection as current. [`ElectrumSession::ping`]
//! checks liveness and, when the check fails, replaces the connection with exactly one
//! reconnect attempt before reporting the network as unavailable.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionState};
use crate::dispatcher::BatchEntry;
use crate::error::{ElectrumClientError, ElectrumClientResult, ProtocolError};
use crate::methods::ElectrumApi;
use crate::notification::NotificationBus;
use crate::peer::{Peer, PeerSelector};
use crate::transport::{DefaultTransportFactory, TransportFactory};
use crate::types::ServerVersion;

#[derive(Debug, Clone)]
struct SessionStatus {
    state: ConnectionState,
    connected: bool,
    ever_connected: bool,
    server_name: Option<String>,
    peer: Option<Peer>,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            connected: false,
            ever_connected: false,
            server_name: None,
            peer: None,
        }
    }
}

/// Where the session is connected to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub host: String,
    pub port: u16,
    pub peer: Peer,
    pub connected: bool,
    /// Software banner from the handshake
    pub server_name: Option<String>,
}

/// Owner of the current Electrum connection
pub struct ElectrumSession {
    config: ClientConfig,
    selector: PeerSelector,
    factory: Arc<dyn TransportFactory>,
    notifications: Arc<NotificationBus>,
    current: parking_lot::RwLock<Option<Arc<Connection>>>,
    status: parking_lot::Mutex<SessionStatus>,
}

impl std::fmt::Debug for ElectrumSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElectrumSession")
            .field("peers", &self.selector.peers())
            .field("status", &*self.status.lock())
            .finish()
    }
}

impl ElectrumSession {
    /// Session over the configured peers using the built-in transports
    pub fn new(config: ClientConfig) -> ElectrumClientResult<Self> {
        Self::with_transport_factory(config, Arc::new(DefaultTransportFactory))
    }

    pub fn with_transport_factory(
        config: ClientConfig,
        factory: Arc<dyn TransportFactory>,
    ) -> ElectrumClientResult<Self> {
        config.validate()?;
        let selector = PeerSelector::new(config.peers.clone())?;
        Ok(Self {
            config,
            selector,
            factory,
            notifications: Arc::new(NotificationBus::new()),
            current: parking_lot::RwLock::new(None),
            status: parking_lot::Mutex::new(SessionStatus::default()),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn peers(&self) -> &[Peer] {
        self.selector.peers()
    }

    /// Notification handlers registered here survive reconnects
    pub fn notifications(&self) -> &Arc<NotificationBus> {
        &self.notifications
    }

    /// Current connection, if one was installed
    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.current.read().clone()
    }

    /// Connected per the last handshake and the transport is still open
    pub fn is_connected(&self) -> bool {
        self.status.lock().connected && self.connection().is_some_and(|c| c.is_connected())
    }

    pub fn state(&self) -> ConnectionState {
        let state = self.status.lock().state;
        match state {
            ConnectionState::Connected if !self.is_connected() => ConnectionState::Disconnected,
            other => other,
        }
    }

    pub fn was_connected_at_least_once(&self) -> bool {
        self.status.lock().ever_connected
    }

    /// Server banner recorded by the last successful handshake
    pub fn server_name(&self) -> Option<String> {
        self.status.lock().server_name.clone()
    }

    fn mark_disconnected(&self) {
        let mut status = self.status.lock();
        status.connected = false;
        status.state = ConnectionState::Disconnected;
    }

    /// Pick a peer, connect, and run the `server.version` handshake.
    ///
    /// Any previous connection is closed first. On success the server's software banner is
    /// recorded and the session counts as connected.
    pub async fn connect_main(&self) -> ElectrumClientResult<ServerVersion> {
        let peer = self.selector.pick_peer().clone();
        {
            let mut status = self.status.lock();
            status.state = ConnectionState::Connecting;
            status.connected = false;
            status.peer = Some(peer.clone());
        }

        let previous = self.current.write().take();
        if let Some(previous) = previous {
            previous.close().await;
        }

        info!(peer = %peer, "Connecting to Electrum server");
        let transport = match self.factory.create(&peer) {
            Ok(transport) => transport,
            Err(e) => {
                self.mark_disconnected();
                return Err(e);
            }
        };
        let connection = Arc::new(Connection::new(
            transport,
            Arc::clone(&self.notifications),
            self.config.framing.max_frames_per_feed,
        ));
        *self.current.write() = Some(Arc::clone(&connection));

        match self.open_and_handshake(&connection).await {
            Ok(version) => {
                let mut status = self.status.lock();
                status.state = ConnectionState::Connected;
                status.connected = true;
                status.ever_connected = true;
                status.server_name = Some(version.software.clone());
                info!(
                    peer = %peer,
                    server = %version.software,
                    protocol = %version.protocol,
                    "Connected to Electrum server"
                );
                Ok(version)
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "Bad connection");
                self.mark_disconnected();
                connection.close().await;
                Err(e)
            }
        }
    }

    async fn open_and_handshake(&self, connection: &Connection) -> ElectrumClientResult<ServerVersion> {
        let timeouts = &self.config.timeouts;
        timeout(timeouts.connect, connection.connect())
            .await
            .map_err(|_| ElectrumClientError::timeout("connect"))??;

        let info = &self.config.client_info;
        let version = timeout(
            timeouts.handshake,
            connection.server_version(&info.name, &info.protocol_version),
        )
        .await
        .map_err(|_| ElectrumClientError::timeout("server.version handshake"))?
        .map_err(|e| match e {
            e @ ElectrumClientError::ServerError { .. } => {
                ElectrumClientError::Protocol(ProtocolError::HandshakeFailed(e.to_string()))
            }
            other => other,
        })?;

        if version.software.is_empty() {
            return Err(ProtocolError::HandshakeFailed("empty server name".to_string()).into());
        }
        Ok(version)
    }

    /// Liveness check.
    ///
    /// Sends `server.ping` bounded by the ping timeout. On failure the stale connection is
    /// force-closed and exactly one reconnect is attempted within the same timeout. Returns
    /// `true` when the ping or the reconnect succeeded, otherwise
    /// [`ElectrumClientError::NetworkUnavailable`].
    pub async fn ping(&self) -> ElectrumClientResult<bool> {
        let ping_timeout = self.config.timeouts.ping;

        let outcome = match self.connection() {
            Some(connection) => timeout(ping_timeout, connection.server_ping())
                .await
                .unwrap_or_else(|_| Err(ElectrumClientError::timeout("server.ping"))),
            None => Err(ElectrumClientError::NotConnected),
        };

        let cause = match outcome {
            Ok(()) => {
                debug!("Ping ok");
                return Ok(true);
            }
            Err(e) => e,
        };

        warn!(error = %cause, "Ping failed, reconnecting once");
        self.force_disconnect().await;

        match timeout(ping_timeout, self.connect_main()).await {
            Ok(Ok(_)) if self.is_connected() => {
                info!("Reconnected after failed ping");
                Ok(true)
            }
            Ok(Ok(_)) => Err(ElectrumClientError::NetworkUnavailable(
                "reconnect did not leave the session connected".to_string(),
            )),
            Ok(Err(e)) => Err(ElectrumClientError::NetworkUnavailable(format!(
                "reconnect failed: {}",
                e
            ))),
            Err(_) => {
                // connect_main was dropped mid-flight
                self.force_disconnect().await;
                Err(ElectrumClientError::NetworkUnavailable(
                    "reconnect timed out".to_string(),
                ))
            }
        }
    }

    /// Close the current connection, keeping it installed for [`ElectrumSession::server_info`]
    pub async fn force_disconnect(&self) {
        self.mark_disconnected();
        if let Some(connection) = self.connection() {
            connection.close().await;
        }
    }

    /// Close and drop the current connection
    pub async fn close(&self) {
        self.mark_disconnected();
        let connection = self.current.write().take();
        if let Some(connection) = connection {
            connection.close().await;
            info!(endpoint = %connection.endpoint(), "Session closed");
        }
    }

    /// Wait until another task has connected the session.
    ///
    /// Polls every `wait_connected_poll` and gives up after `wait_connected_attempts` polls.
    /// A session that was connected at least once and whose connection is open again counts
    /// as connected.
    pub async fn wait_till_connected(&self) -> ElectrumClientResult<()> {
        let poll = self.config.timeouts.wait_connected_poll;
        let attempts = self.config.timeouts.wait_connected_attempts;

        for attempt in 0..=attempts {
            if self.is_connected() {
                return Ok(());
            }
            let ever_connected = self.status.lock().ever_connected;
            if ever_connected && self.connection().is_some_and(|c| c.is_connected()) {
                let mut status = self.status.lock();
                status.connected = true;
                status.state = ConnectionState::Connected;
                return Ok(());
            }
            if attempt < attempts {
                tokio::time::sleep(poll).await;
            }
        }

        Err(ElectrumClientError::timeout("waiting for Electrum connection"))
    }

    /// Peer and handshake details of the current connection
    pub fn server_info(&self) -> ElectrumClientResult<ServerInfo> {
        let status = self.status.lock().clone();
        let peer = status.peer.ok_or(ElectrumClientError::NotConnected)?;
        let connected = status.connected && self.connection().is_some_and(|c| c.is_connected());
        Ok(ServerInfo {
            host: peer.host.clone(),
            port: peer.port,
            peer,
            connected,
            server_name: status.server_name,
        })
    }

    /// Probe a peer with a throwaway connection: connect, handshake, ping, close.
    ///
    /// Never touches the session's own connection.
    pub async fn test_connection(&self, peer: &Peer) -> bool {
        let transport = match self.factory.create(peer) {
            Ok(transport) => transport,
            Err(e) => {
                debug!(peer = %peer, error = %e, "Cannot build transport");
                return false;
            }
        };
        let connection = Connection::new(
            transport,
            Arc::new(NotificationBus::new()),
            self.config.framing.max_frames_per_feed,
        );

        let check = async {
            self.open_and_handshake(&connection).await?;
            timeout(self.config.timeouts.ping, connection.server_ping())
                .await
                .map_err(|_| ElectrumClientError::timeout("server.ping"))?
        };
        let result = check.await;
        connection.close().await;

        match result {
            Ok(()) => true,
            Err(e) => {
                debug!(peer = %peer, error = %e, "Peer test failed");
                false
            }
        }
    }

    fn require_connection(&self) -> ElectrumClientResult<Arc<Connection>> {
        self.connection().ok_or(ElectrumClientError::NotConnected)
    }
}

#[async_trait]
impl ElectrumApi for ElectrumSession {
    async fn request(&self, method: &str, params: Vec<Value>) -> ElectrumClientResult<Value> {
        self.require_connection()?.request(method, params).await
    }

    async fn request_batch(
        &self,
        method: &str,
        params: Vec<Value>,
        extra: Option<Value>,
    ) -> ElectrumClientResult<Vec<BatchEntry>> {
        self.require_connection()?
            .request_batch(method, params, extra)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{BoxedTransport, StreamTransport, TransportKind};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

    /// How a scripted in-memory server treats requests
    #[derive(Clone, Copy)]
    enum Behaviour {
        /// answer everything
        Healthy,
        /// answer the handshake, then go silent
        HangAfterHandshake,
        /// accept the stream and never answer
        Silent,
    }

    /// Hands out duplex transports, each served by a task with the next scripted behaviour
    struct ScriptedFactory {
        script: parking_lot::Mutex<VecDeque<Behaviour>>,
        created: parking_lot::Mutex<usize>,
    }

    impl ScriptedFactory {
        fn new(script: Vec<Behaviour>) -> Arc<Self> {
            Arc::new(Self {
                script: parking_lot::Mutex::new(script.into()),
                created: parking_lot::Mutex::new(0),
            })
        }
    }

    async fn serve(stream: DuplexStream, behaviour: Behaviour) {
        let (read, mut write) = tokio::io::split(stream);
        let mut lines = BufReader::new(read).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let request: Value = serde_json::from_str(&line).unwrap();
            let method = request["method"].as_str().unwrap_or_default().to_string();
            let answer = match (behaviour, method.as_str()) {
                (Behaviour::Silent, _) => continue,
                (Behaviour::HangAfterHandshake, "server.version") | (Behaviour::Healthy, "server.version") => {
                    json!(["FakeElectrum 1.0", "1.4"])
                }
                (Behaviour::HangAfterHandshake, _) => continue,
                (Behaviour::Healthy, _) => Value::Null,
            };
            let reply = json!({"jsonrpc": "2.0", "id": request["id"], "result": answer});
            let text = format!("{}\n", reply);
            if write.write_all(text.as_bytes()).await.is_err() {
                break;
            }
        }
    }

    impl TransportFactory for ScriptedFactory {
        fn create(&self, peer: &Peer) -> ElectrumClientResult<BoxedTransport> {
            let behaviour = self
                .script
                .lock()
                .pop_front()
                .ok_or_else(|| ElectrumClientError::config("script exhausted"))?;
            *self.created.lock() += 1;
            let (client, server) = tokio::io::duplex(16 * 1024);
            tokio::spawn(serve(server, behaviour));
            Ok(Box::new(StreamTransport::from_stream(
                TransportKind::Tcp,
                peer.address(),
                client,
            )))
        }
    }

    fn config() -> ClientConfig {
        let mut config = ClientConfig::with_peers(vec![Peer::tcp("fake.local", 50001)]);
        config.timeouts.connect = Duration::from_millis(200);
        config.timeouts.handshake = Duration::from_millis(200);
        config.timeouts.ping = Duration::from_millis(200);
        config.timeouts.wait_connected_poll = Duration::from_millis(10);
        config.timeouts.wait_connected_attempts = 3;
        config
    }

    fn session(script: Vec<Behaviour>) -> (ElectrumSession, Arc<ScriptedFactory>) {
        let factory = ScriptedFactory::new(script);
        let session = ElectrumSession::with_transport_factory(config(), factory.clone()).unwrap();
        (session, factory)
    }

    #[tokio::test]
    async fn test_connect_main_records_server_name() {
        let (session, _) = session(vec![Behaviour::Healthy]);
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(session.server_info().is_err());

        let version = session.connect_main().await.unwrap();
        assert_eq!(version.software, "FakeElectrum 1.0");
        assert!(session.is_connected());
        assert!(session.was_connected_at_least_once());
        assert_eq!(session.state(), ConnectionState::Connected);

        let info = session.server_info().unwrap();
        assert_eq!(info.host, "fake.local");
        assert_eq!(info.port, 50001);
        assert!(info.connected);
        assert_eq!(info.server_name.as_deref(), Some("FakeElectrum 1.0"));
    }

    #[tokio::test]
    async fn test_handshake_timeout_leaves_session_disconnected() {
        let (session, _) = session(vec![Behaviour::Silent]);
        let error = session.connect_main().await.unwrap_err();
        assert!(matches!(error, ElectrumClientError::Timeout(_)));
        assert!(!session.is_connected());
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_ping_on_healthy_connection() {
        let (session, factory) = session(vec![Behaviour::Healthy]);
        session.connect_main().await.unwrap();

        assert!(session.ping().await.unwrap());
        assert_eq!(*factory.created.lock(), 1);
    }

    #[tokio::test]
    async fn test_ping_failure_reconnects_once() {
        let (session, factory) =
            session(vec![Behaviour::HangAfterHandshake, Behaviour::Healthy]);
        session.connect_main().await.unwrap();
        let first = session.connection().unwrap();

        assert!(session.ping().await.unwrap());
        assert_eq!(*factory.created.lock(), 2);
        assert!(!first.is_connected());
        assert!(session.is_connected());
        assert!(!Arc::ptr_eq(&first, &session.connection().unwrap()));
    }

    #[tokio::test]
    async fn test_ping_failure_with_failed_reconnect() {
        let (session, factory) =
            session(vec![Behaviour::HangAfterHandshake, Behaviour::Silent]);
        session.connect_main().await.unwrap();

        let error = session.ping().await.unwrap_err();
        assert!(matches!(error, ElectrumClientError::NetworkUnavailable(_)));
        assert_eq!(*factory.created.lock(), 2);
        assert!(!session.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_ping_timeout_bounds_both_steps() {
        let factory = ScriptedFactory::new(vec![Behaviour::HangAfterHandshake, Behaviour::Silent]);
        let config = ClientConfig::with_peers(vec![Peer::tcp("fake.local", 50001)]);
        let session = ElectrumSession::with_transport_factory(config, factory).unwrap();
        session.connect_main().await.unwrap();

        let started = tokio::time::Instant::now();
        let error = session.ping().await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(error, ElectrumClientError::NetworkUnavailable(_)));
        assert!(elapsed >= Duration::from_secs(10));
        assert!(elapsed < Duration::from_secs(11));
    }

    #[tokio::test]
    async fn test_ping_without_connection_tries_to_connect() {
        let (session, _) = session(vec![Behaviour::Healthy]);
        assert!(session.ping().await.unwrap());
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn test_request_without_connection_fails() {
        let (session, _) = session(vec![]);
        let result = session.request("server.ping", vec![]).await;
        assert!(matches!(result, Err(ElectrumClientError::NotConnected)));
    }

    #[tokio::test]
    async fn test_wait_till_connected() {
        let (session, _) = session(vec![Behaviour::Healthy]);
        assert!(session.wait_till_connected().await.is_err());

        session.connect_main().await.unwrap();
        session.wait_till_connected().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_till_connected_gives_up_after_last_check() {
        let (session, _) = session(vec![]);

        let started = tokio::time::Instant::now();
        let error = session.wait_till_connected().await.unwrap_err();

        assert!(matches!(error, ElectrumClientError::Timeout(_)));
        // 4 checks, 3 polls in between
        assert_eq!(started.elapsed(), Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_close_and_force_disconnect() {
        let (session, _) = session(vec![Behaviour::Healthy]);
        session.connect_main().await.unwrap();

        session.force_disconnect().await;
        assert!(!session.is_connected());
        assert!(session.connection().is_some());
        assert!(!session.server_info().unwrap().connected);

        session.close().await;
        assert!(session.connection().is_none());
        session.close().await;
    }

    #[tokio::test]
    async fn test_test_connection_uses_throwaway_connection() {
        let (session, _) = session(vec![Behaviour::Healthy, Behaviour::Silent]);
        let peer = Peer::tcp("other.local", 50001);

        assert!(session.test_connection(&peer).await);
        assert!(!session.test_connection(&peer).await);
        assert!(session.connection().is_none());
    }

    #[tokio::test]
    async fn test_notification_handlers_survive_reconnect() {
        let (session, _) = session(vec![Behaviour::Healthy, Behaviour::Healthy]);
        let mut headers = session.notifications().subscribe("blockchain.headers.subscribe");

        session.connect_main().await.unwrap();
        session.connect_main().await.unwrap();

        let bus = session.connection().unwrap().notifications().clone();
        assert!(Arc::ptr_eq(&bus, session.notifications()));
        bus.emit("blockchain.headers.subscribe", json!([{"height": 1}]));
        assert_eq!(headers.recv().await.unwrap(), json!([{"height": 1}]));
    }

    #[test]
    fn test_empty_peer_set_is_rejected() {
        let config = ClientConfig::with_peers(Vec::new());
        assert!(ElectrumSession::new(config).is_err());
    }
}
