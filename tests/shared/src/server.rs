//! Scripted fake Electrum server
//!
//! Listens on `127.0.0.1` over plain TCP and answers newline-framed JSON-RPC requests from a
//! reply table. Tests can silence methods, reorder batch replies, dribble responses out in
//! small chunks, push notifications, and drop or refuse connections.

use serde_json::{Value, json};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Software banner returned by the default `server.version` reply
pub const FAKE_SERVER_NAME: &str = "FakeElectrum 1.0";

type ReplyFn = Arc<dyn Fn(&[Value]) -> Reply + Send + Sync>;

/// How the server answers one method
#[derive(Clone)]
pub enum Reply {
    /// `{"id":..,"result":value}`
    Result(Value),
    /// `{"id":..,"error":{"code":..,"message":..}}`
    Error { code: i64, message: String },
    /// No answer at all
    Silent,
    /// Computed from the request params
    Dynamic(ReplyFn),
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reply::Result(value) => f.debug_tuple("Result").field(value).finish(),
            Reply::Error { code, message } => f
                .debug_struct("Error")
                .field("code", code)
                .field("message", message)
                .finish(),
            Reply::Silent => write!(f, "Silent"),
            Reply::Dynamic(_) => write!(f, "Dynamic"),
        }
    }
}

enum Command {
    Send(String),
    Close,
}

struct ServerState {
    replies: Mutex<HashMap<String, Reply>>,
    received: Mutex<Vec<Value>>,
    clients: Mutex<Vec<mpsc::UnboundedSender<Command>>>,
    accepted: AtomicUsize,
    reverse_batches: AtomicBool,
    chunk_size: AtomicUsize,
}

impl ServerState {
    fn reply_for(&self, method: &str) -> Reply {
        let replies = self.replies.lock().unwrap();
        match replies.get(method) {
            Some(reply) => reply.clone(),
            None => Reply::Error {
                code: -32601,
                message: format!("unknown method '{}'", method),
            },
        }
    }

    /// Answer one request object; `None` when the method is silenced
    fn answer(&self, request: &Value) -> Option<Value> {
        let id = request.get("id").cloned().unwrap_or(Value::Null);
        let method = request["method"].as_str().unwrap_or_default();
        let params = request["params"].as_array().cloned().unwrap_or_default();

        let mut reply = self.reply_for(method);
        if let Reply::Dynamic(compute) = &reply {
            reply = compute(&params);
        }

        match reply {
            Reply::Result(result) => Some(json!({"jsonrpc": "2.0", "id": id, "result": result})),
            Reply::Error { code, message } => Some(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": code, "message": message}
            })),
            Reply::Silent | Reply::Dynamic(_) => None,
        }
    }

    /// Answer one inbound frame; `None` when nothing should be written
    fn answer_frame(&self, frame: &str) -> Option<String> {
        let request: Value = match serde_json::from_str(frame) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Fake server got an invalid frame");
                return None;
            }
        };
        self.received.lock().unwrap().push(request.clone());

        match &request {
            Value::Array(items) => {
                let mut answers: Vec<Value> =
                    items.iter().filter_map(|item| self.answer(item)).collect();
                if answers.is_empty() {
                    return None;
                }
                if self.reverse_batches.load(Ordering::SeqCst) {
                    answers.reverse();
                }
                Some(Value::Array(answers).to_string())
            }
            other => self.answer(other).map(|answer| answer.to_string()),
        }
    }

    fn broadcast(&self, command: fn() -> Command) {
        let mut clients = self.clients.lock().unwrap();
        clients.retain(|client| client.send(command()).is_ok());
    }
}

/// In-process Electrum server for end-to-end tests
pub struct FakeElectrumServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    acceptor: Option<JoinHandle<()>>,
}

impl FakeElectrumServer {
    /// Bind an ephemeral port and start accepting connections
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let mut replies = HashMap::new();
        replies.insert(
            "server.version".to_string(),
            Reply::Result(json!([FAKE_SERVER_NAME, "1.4"])),
        );
        replies.insert("server.ping".to_string(), Reply::Result(Value::Null));

        let state = Arc::new(ServerState {
            replies: Mutex::new(replies),
            received: Mutex::new(Vec::new()),
            clients: Mutex::new(Vec::new()),
            accepted: AtomicUsize::new(0),
            reverse_batches: AtomicBool::new(false),
            chunk_size: AtomicUsize::new(0),
        });

        let acceptor = tokio::spawn(accept_loop(listener, Arc::clone(&state)));
        info!(addr = %addr, "Fake Electrum server listening");

        Ok(Self {
            addr,
            state,
            acceptor: Some(acceptor),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Electrum notation for a plain TCP peer: `127.0.0.1:port:t`
    pub fn peer_string(&self) -> String {
        format!("{}:{}:t", self.addr.ip(), self.addr.port())
    }

    /// Replace the reply for `method`
    pub fn set_reply(&self, method: &str, reply: Reply) {
        self.state
            .replies
            .lock()
            .unwrap()
            .insert(method.to_string(), reply);
    }

    pub fn respond(&self, method: &str, result: Value) {
        self.set_reply(method, Reply::Result(result));
    }

    pub fn respond_error(&self, method: &str, code: i64, message: &str) {
        self.set_reply(
            method,
            Reply::Error {
                code,
                message: message.to_string(),
            },
        );
    }

    /// Compute the reply from the request params
    pub fn respond_with<F>(&self, method: &str, compute: F)
    where
        F: Fn(&[Value]) -> Reply + Send + Sync + 'static,
    {
        self.set_reply(method, Reply::Dynamic(Arc::new(compute)));
    }

    /// Never answer `method`
    pub fn silence(&self, method: &str) {
        self.set_reply(method, Reply::Silent);
    }

    /// Answer batch elements in reverse order
    pub fn reverse_batches(&self, enabled: bool) {
        self.state.reverse_batches.store(enabled, Ordering::SeqCst);
    }

    /// Write replies in chunks of `size` bytes with a pause between them; 0 writes whole frames
    pub fn chunk_replies(&self, size: usize) {
        self.state.chunk_size.store(size, Ordering::SeqCst);
    }

    /// Push a notification to every connected client
    pub fn notify(&self, method: &str, params: Value) {
        let text = json!({"jsonrpc": "2.0", "method": method, "params": params}).to_string();
        let mut clients = self.state.clients.lock().unwrap();
        clients.retain(|client| client.send(Command::Send(text.clone())).is_ok());
    }

    /// Close every open client connection; new connections are still accepted
    pub fn disconnect_all(&self) {
        self.state.broadcast(|| Command::Close);
    }

    /// Stop accepting and close every client connection
    pub fn shutdown(&mut self) {
        if let Some(acceptor) = self.acceptor.take() {
            acceptor.abort();
        }
        self.disconnect_all();
    }

    /// Every frame received so far, parsed
    pub fn received(&self) -> Vec<Value> {
        self.state.received.lock().unwrap().clone()
    }

    /// Methods of every received request, batch elements flattened
    pub fn received_methods(&self) -> Vec<String> {
        self.received()
            .iter()
            .flat_map(|frame| match frame {
                Value::Array(items) => items.clone(),
                other => vec![other.clone()],
            })
            .filter_map(|request| request["method"].as_str().map(str::to_string))
            .collect()
    }

    /// Number of connections accepted so far
    pub fn connections_accepted(&self) -> usize {
        self.state.accepted.load(Ordering::SeqCst)
    }

    /// Wait until `count` connections were accepted
    pub async fn wait_for_connections(&self, count: usize, limit: Duration) -> bool {
        tokio::time::timeout(limit, async {
            while self.connections_accepted() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .is_ok()
    }

    /// Wait until at least `count` frames were received
    pub async fn wait_for_frames(&self, count: usize, limit: Duration) -> bool {
        tokio::time::timeout(limit, async {
            while self.received().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .is_ok()
    }
}

impl Drop for FakeElectrumServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn accept_loop(listener: TcpListener, state: Arc<ServerState>) {
    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                state.accepted.fetch_add(1, Ordering::SeqCst);
                debug!(remote = %remote, "Fake server accepted connection");
                let (sender, receiver) = mpsc::unbounded_channel();
                state.clients.lock().unwrap().push(sender.clone());
                tokio::spawn(serve_client(stream, Arc::clone(&state), sender, receiver));
            }
            Err(e) => {
                warn!(error = %e, "Fake server accept failed");
                break;
            }
        }
    }
}

async fn write_frame(
    writer: &mut tokio::net::tcp::OwnedWriteHalf,
    text: &str,
    chunk_size: usize,
) -> std::io::Result<()> {
    let mut bytes = text.as_bytes().to_vec();
    bytes.push(b'\n');
    if chunk_size == 0 {
        writer.write_all(&bytes).await?;
        return writer.flush().await;
    }
    for chunk in bytes.chunks(chunk_size) {
        writer.write_all(chunk).await?;
        writer.flush().await?;
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    Ok(())
}

async fn serve_client(
    stream: TcpStream,
    state: Arc<ServerState>,
    replies: mpsc::UnboundedSender<Command>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "Failed to set TCP_NODELAY");
    }
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(frame)) => {
                        if let Some(answer) = state.answer_frame(&frame) {
                            replies.send(Command::Send(answer)).ok();
                        }
                    }
                    Ok(None) | Err(_) => break,
                }
            }
            command = commands.recv() => {
                match command {
                    Some(Command::Send(text)) => {
                        let chunk_size = state.chunk_size.load(Ordering::SeqCst);
                        if write_frame(&mut write, &text, chunk_size).await.is_err() {
                            break;
                        }
                    }
                    Some(Command::Close) | None => break,
                }
            }
        }
    }
    debug!("Fake server connection closed");
}
