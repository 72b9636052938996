//! Test helpers for integration tests
//!
//! Provides in-memory transports for the gateway and REST boundaries, and a
//! fake platform served over real sockets.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chat_client::gateway::{Connector, Frame, FrameSink, FrameStream, TransportError};
use chat_client::protocol::{GatewayMessage, OpCode};
use chat_client::ratelimit::{RequestExecutor, RestRequest, RestResponse};
use chat_client::Session;
use chat_common::ClientResult;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use reqwest::Method;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How long helpers wait for the client before failing the test
pub const STEP_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// In-memory gateway
// ============================================================================

/// A frame the client wrote
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    Text(String),
    Close(u16),
}

/// Connector that hands the server side of every connection to the test
pub struct MockConnector {
    gateways: mpsc::UnboundedSender<MockGateway>,
    failures: AtomicUsize,
    connects: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

impl MockConnector {
    /// Create a connector and the queue its connections arrive on
    pub fn new() -> (Arc<Self>, GatewayQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            gateways: tx,
            failures: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
        });
        (connector, GatewayQueue { rx })
    }

    /// Fail the next `n` connection attempts
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Fail every connection attempt from now on
    pub fn fail_always(&self) {
        self.fail_next(usize::MAX);
    }

    /// Connection attempts so far, failed ones included
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// URLs of every connection attempt, in order
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        url: &str,
    ) -> Result<(Box<dyn FrameSink>, Box<dyn FrameStream>), TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().push(url.to_string());

        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
                0 => None,
                usize::MAX => Some(usize::MAX),
                n => Some(n - 1),
            })
            .is_ok();
        if failing {
            return Err(TransportError::Connect("connection refused".to_string()));
        }

        let (to_client, client_rx) = mpsc::unbounded_channel();
        let (client_tx, from_client) = mpsc::unbounded_channel();

        let gateway = MockGateway {
            to_client: Some(to_client),
            from_client,
            url: url.to_string(),
        };
        self.gateways
            .send(gateway)
            .map_err(|_| TransportError::Connect("test dropped the gateway queue".to_string()))?;

        Ok((
            Box::new(MockSink { tx: client_tx }),
            Box::new(MockStream { rx: client_rx }),
        ))
    }
}

struct MockSink {
    tx: mpsc::UnboundedSender<ClientFrame>,
}

#[async_trait]
impl FrameSink for MockSink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.tx
            .send(ClientFrame::Text(text))
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self, code: u16) -> Result<(), TransportError> {
        self.tx
            .send(ClientFrame::Close(code))
            .map_err(|_| TransportError::Closed)
    }
}

struct MockStream {
    rx: mpsc::UnboundedReceiver<Result<Frame, TransportError>>,
}

#[async_trait]
impl FrameStream for MockStream {
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        self.rx.recv().await
    }
}

/// Connections made through a [`MockConnector`], in order
pub struct GatewayQueue {
    rx: mpsc::UnboundedReceiver<MockGateway>,
}

impl GatewayQueue {
    /// Wait for the next connection
    pub async fn next(&mut self) -> Result<MockGateway> {
        tokio::time::timeout(STEP_TIMEOUT, self.rx.recv())
            .await
            .context("timed out waiting for a connection")?
            .ok_or_else(|| anyhow!("connector dropped"))
    }

    /// Check that no connection is pending right now
    pub fn is_empty(&mut self) -> bool {
        self.rx.try_recv().is_err()
    }
}

/// Server side of one in-memory gateway connection
pub struct MockGateway {
    to_client: Option<mpsc::UnboundedSender<Result<Frame, TransportError>>>,
    from_client: mpsc::UnboundedReceiver<ClientFrame>,
    pub url: String,
}

impl MockGateway {
    fn push(&self, frame: Result<Frame, TransportError>) {
        if let Some(tx) = &self.to_client {
            let _ = tx.send(frame);
        }
    }

    /// Send a raw text frame
    pub fn send_text(&self, text: impl Into<String>) {
        self.push(Ok(Frame::Text(text.into())));
    }

    pub fn send(&self, message: &GatewayMessage) {
        if let Ok(json) = message.to_json() {
            self.send_text(json);
        }
    }

    pub fn hello(&self, heartbeat_interval: u64) {
        self.send(&GatewayMessage::hello(heartbeat_interval));
    }

    /// Close the connection with `code`
    pub fn close(&self, code: u16) {
        self.push(Ok(Frame::Close(Some(code))));
    }

    /// Fail the connection with a transport error
    pub fn fail(&self) {
        self.push(Err(TransportError::Receive("connection reset".to_string())));
    }

    /// End the stream without a close frame
    pub fn hang_up(&mut self) {
        self.to_client = None;
    }

    /// Next frame the client wrote; `None` once the client released the sink
    pub async fn recv(&mut self) -> Result<Option<ClientFrame>> {
        tokio::time::timeout(STEP_TIMEOUT, self.from_client.recv())
            .await
            .context("timed out waiting for the client")
    }

    /// Wait for a command with `op`, acknowledging heartbeats on the way
    ///
    /// Other commands are skipped.
    pub async fn expect(&mut self, op: OpCode) -> Result<GatewayMessage> {
        loop {
            let frame = self
                .recv()
                .await?
                .ok_or_else(|| anyhow!("client hung up waiting for {op}"))?;

            let text = match frame {
                ClientFrame::Text(text) => text,
                ClientFrame::Close(code) => bail!("client closed with {code} waiting for {op}"),
            };
            let message = GatewayMessage::from_json(&text)?;

            if message.op == op {
                return Ok(message);
            }
            if message.op == OpCode::Heartbeat {
                self.send(&GatewayMessage::heartbeat_ack());
            }
        }
    }

    /// Wait for the client's close frame and return its code
    ///
    /// Commands still in flight are skipped. `None` means the client released
    /// the connection without a close frame.
    pub async fn expect_close(&mut self) -> Result<Option<u16>> {
        loop {
            match self.recv().await? {
                Some(ClientFrame::Close(code)) => return Ok(Some(code)),
                Some(ClientFrame::Text(_)) => {}
                None => return Ok(None),
            }
        }
    }

    /// Send Hello, take the Identify, answer with Ready
    pub async fn handshake(&mut self, session_id: &str) -> Result<GatewayMessage> {
        self.handshake_with(session_id, 45_000).await
    }

    /// [`handshake`](Self::handshake) with a custom heartbeat interval
    pub async fn handshake_with(
        &mut self,
        session_id: &str,
        heartbeat_interval: u64,
    ) -> Result<GatewayMessage> {
        self.hello(heartbeat_interval);
        let identify = self.expect(OpCode::Identify).await?;
        self.send(&crate::fixtures::ready(session_id, 1));
        Ok(identify)
    }
}

/// Open `session` against the next mock connection and wait for Ready
pub async fn open_session(
    session: &Session,
    gateways: &mut GatewayQueue,
    session_id: &str,
) -> Result<MockGateway> {
    open_session_with(session, gateways, session_id, 45_000).await
}

/// [`open_session`] with a custom heartbeat interval
pub async fn open_session_with(
    session: &Session,
    gateways: &mut GatewayQueue,
    session_id: &str,
    heartbeat_interval: u64,
) -> Result<MockGateway> {
    let opener = {
        let session = session.clone();
        tokio::spawn(async move { session.open().await })
    };

    let mut gateway = gateways.next().await?;
    gateway.handshake_with(session_id, heartbeat_interval).await?;
    opener.await??;

    session.wait_until_ready(STEP_TIMEOUT).await?;
    Ok(gateway)
}

/// Poll `check` until it holds
pub async fn eventually(mut check: impl FnMut() -> bool) -> Result<()> {
    tokio::time::timeout(STEP_TIMEOUT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .context("condition not met in time")
}

// ============================================================================
// In-memory REST
// ============================================================================

/// A request the executor saw
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    pub at: tokio::time::Instant,
}

/// Executor answering from per-path queues
///
/// `/gateway` answers with the mock gateway URL and anything unqueued with
/// 404 once its queue is empty.
pub struct MockExecutor {
    responses: Mutex<HashMap<String, VecDeque<RestResponse>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    latency: Mutex<Duration>,
}

impl MockExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            latency: Mutex::new(Duration::ZERO),
        })
    }

    /// Delay every response by `latency`
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Queue a response for `path`
    pub fn push(&self, path: &str, response: RestResponse) {
        self.responses
            .lock()
            .entry(path.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    /// Requests made to `path`
    pub fn count(&self, path: &str) -> usize {
        self.requests.lock().iter().filter(|r| r.path == path).count()
    }
}

#[async_trait]
impl RequestExecutor for MockExecutor {
    async fn execute(&self, request: &RestRequest) -> ClientResult<RestResponse> {
        self.requests.lock().push(RecordedRequest {
            method: request.method.clone(),
            path: request.path.clone(),
            body: request.body.clone(),
            at: tokio::time::Instant::now(),
        });

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let queued = self
            .responses
            .lock()
            .get_mut(&request.path)
            .and_then(VecDeque::pop_front);

        Ok(queued.unwrap_or_else(|| match request.path.as_str() {
            "/gateway" => RestResponse::new(200, json!({ "url": MOCK_GATEWAY_URL }).to_string()),
            _ => RestResponse::new(404, r#"{"message": "Unknown route", "code": 0}"#),
        }))
    }
}

/// Gateway URL the mock executor hands out
pub const MOCK_GATEWAY_URL: &str = "wss://gateway.mock";

// ============================================================================
// Fake platform over real sockets
// ============================================================================

/// Local HTTP + websocket server speaking the platform protocol
pub struct FakePlatform {
    pub addr: SocketAddr,
    state: PlatformState,
    _handle: JoinHandle<()>,
}

#[derive(Clone)]
struct PlatformState {
    token: String,
    ws_url: String,
    received: Arc<Mutex<Vec<GatewayMessage>>>,
}

impl FakePlatform {
    /// Start a platform that accepts `token`
    pub async fn start(token: &str) -> Result<Self> {
        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
        let addr = listener.local_addr()?;

        let state = PlatformState {
            token: token.to_string(),
            ws_url: format!("ws://{addr}/gateway"),
            received: Arc::new(Mutex::new(Vec::new())),
        };

        let app = Router::new()
            .route("/api/gateway", get(gateway_info))
            .route("/api/users/@me", get(current_user))
            .route("/gateway", get(gateway_socket))
            .with_state(state.clone());

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Ok(Self {
            addr,
            state,
            _handle: handle,
        })
    }

    /// REST base URL for client configuration
    pub fn api_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    /// Gateway commands received so far, heartbeats excluded
    pub fn received(&self) -> Vec<GatewayMessage> {
        self.state.received.lock().clone()
    }

    /// Wait until a command with `op` has been received
    pub async fn wait_for(&self, op: OpCode) -> Result<GatewayMessage> {
        tokio::time::timeout(STEP_TIMEOUT, async {
            loop {
                let found = self.received().into_iter().find(|m| m.op == op);
                if let Some(message) = found {
                    return message;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .with_context(|| format!("platform never received {op}"))
    }
}

fn authorized(state: &PlatformState, headers: &HeaderMap) -> bool {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bot {}", state.token))
}

async fn gateway_info(State(state): State<PlatformState>) -> impl IntoResponse {
    Json(json!({ "url": state.ws_url }))
}

async fn current_user(State(state): State<PlatformState>, headers: HeaderMap) -> impl IntoResponse {
    if !authorized(&state, &headers) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "401: Unauthorized", "code": 0 })),
        );
    }
    (StatusCode::OK, Json(crate::fixtures::user_json()))
}

async fn gateway_socket(
    State(state): State<PlatformState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_gateway(state, socket))
}

fn encode(message: &GatewayMessage) -> Option<Message> {
    message.to_json().ok().map(|json| Message::Text(json.into()))
}

async fn serve_gateway(state: PlatformState, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();

    let Some(hello) = encode(&GatewayMessage::hello(1_000)) else {
        return;
    };
    if sink.send(hello).await.is_err() {
        return;
    }

    let mut sequence = 0u64;
    while let Some(Ok(frame)) = stream.next().await {
        let text = match frame {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let Ok(message) = GatewayMessage::from_json(&text) else {
            continue;
        };

        let reply = match message.op {
            OpCode::Heartbeat => Some(GatewayMessage::heartbeat_ack()),
            OpCode::Identify => {
                let token_ok = message
                    .as_identify()
                    .is_some_and(|identify| identify.token == format!("Bot {}", state.token));
                if !token_ok {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: 4004,
                            reason: "Authentication failed.".into(),
                        })))
                        .await;
                    break;
                }
                sequence += 1;
                Some(crate::fixtures::ready("platform-session", sequence))
            }
            _ => None,
        };

        if message.op != OpCode::Heartbeat {
            state.received.lock().push(message);
        }

        if let Some(frame) = reply.as_ref().and_then(encode) {
            if sink.send(frame).await.is_err() {
                break;
            }
        }
    }

    tracing::debug!("Fake gateway connection ended");
}
