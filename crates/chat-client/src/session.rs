//! Client session
//!
//! A [`Session`] is the handle users hold: it owns the credential, the
//! connection state, the handler registry and the rate limiter, and starts
//! and stops the connection manager. Clones share the same session.

use crate::dispatch::EventDispatcher;
use crate::events::{Event, EventKind};
use crate::gateway::{
    establish, ConnectionState, Connector, GatewayHandle, Runner, SessionState, WsConnector,
    COMMAND_BUFFER_SIZE,
};
use crate::handlers::{HandlerRegistry, HandlerRemover};
use crate::protocol::{GatewayMessage, RequestGuildMembersPayload, UpdateStatusData};
use crate::ratelimit::{HttpExecutor, RateLimiter, RequestExecutor, RestRequest, RestResponse};
use chat_common::{ClientConfig, ClientError, ClientResult};
use chat_core::{EpochMsTime, User};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

pub(crate) struct SessionInner {
    config: ClientConfig,
    token: Option<String>,
    state: RwLock<SessionState>,
    /// Mirrors `SessionState::data_ready` for waiters
    ready: watch::Sender<bool>,
    registry: HandlerRegistry,
    dispatcher: EventDispatcher,
    limiter: Arc<RateLimiter>,
    connector: Arc<dyn Connector>,
    gateway: tokio::sync::Mutex<Option<GatewayHandle>>,
    /// Cancels the current open attempt and its connection manager
    cancel: parking_lot::Mutex<CancellationToken>,
    gateway_url: parking_lot::Mutex<Option<String>>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.cancel.get_mut().cancel();
    }
}

/// Handle to a chat platform session
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

/// Sessions are not events; handlers registered for them never run.
impl EventKind for Session {}

#[derive(Deserialize)]
struct GatewayResponse {
    url: String,
}

impl Session {
    /// Session with default configuration and the given credential
    pub fn new(token: impl Into<String>) -> Self {
        let config = ClientConfig::default().with_token(token);
        SessionBuilder::new().config(config).assemble()
    }

    /// Session without a credential
    ///
    /// Handlers can be registered and REST calls attempted; opening the
    /// gateway fails with [`ClientError::MissingToken`].
    pub fn unauthenticated() -> Self {
        SessionBuilder::new().assemble()
    }

    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    // === Internals shared with the connection manager ===

    pub(crate) fn downgrade(&self) -> Weak<SessionInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<SessionInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub(crate) fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub(crate) fn connector(&self) -> &Arc<dyn Connector> {
        &self.inner.connector
    }

    /// Mutate the session state under its write lock
    pub(crate) fn with_state_mut<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let (result, data_ready) = {
            let mut state = self.inner.state.write();
            let result = f(&mut *state);
            (result, state.data_ready)
        };

        self.inner.ready.send_if_modified(|ready| {
            let changed = *ready != data_ready;
            *ready = data_ready;
            changed
        });
        result
    }

    /// Copy of the current session state
    pub(crate) fn snapshot(&self) -> SessionState {
        self.inner.state.read().clone()
    }

    /// Hand an event to the dispatcher
    pub(crate) fn dispatch(&self, event: Event) -> usize {
        self.inner.dispatcher.handle(self, event)
    }

    pub(crate) fn handlers(&self) -> HandlerRegistry {
        self.inner.registry.clone()
    }

    // === State accessors ===

    pub fn state(&self) -> ConnectionState {
        self.inner.state.read().connection
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.state.read().session_id.clone()
    }

    /// Last dispatch sequence number received
    pub fn sequence(&self) -> Option<u64> {
        self.inner.state.read().sequence
    }

    /// True once Ready or Resumed has been dispatched on the current session
    pub fn data_ready(&self) -> bool {
        self.inner.state.read().data_ready
    }

    pub fn last_heartbeat_ack(&self) -> Option<DateTime<Utc>> {
        self.inner.state.read().last_heartbeat_ack
    }

    /// Round trip of the most recently acknowledged heartbeat
    pub fn heartbeat_latency(&self) -> Option<Duration> {
        self.inner.state.read().heartbeat_latency()
    }

    pub fn token(&self) -> Option<&str> {
        self.inner.token.as_deref()
    }

    /// Wait until the session is ready, for at most `timeout`
    pub async fn wait_until_ready(&self, timeout: Duration) -> ClientResult<()> {
        let mut ready = self.inner.ready.subscribe();

        let outcome = tokio::time::timeout(timeout, ready.wait_for(|ready| *ready))
            .await
            .map(|waited| waited.map(|_| ()));

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ClientError::Closed),
            Err(_) => Err(ClientError::handshake(format!(
                "session not ready after {}ms",
                timeout.as_millis()
            ))),
        }
    }

    // === Handlers ===

    /// Register a handler for events of type `E`
    ///
    /// `E` is a payload type such as [`MessageCreate`](crate::events::MessageCreate),
    /// or [`Event`] to receive every event. Any other [`EventKind`] registers
    /// successfully and is never invoked.
    pub fn add_handler<E, F>(&self, handler: F) -> HandlerRemover
    where
        E: EventKind,
        F: Fn(&Session, &E) + Send + Sync + 'static,
    {
        self.inner.registry.add(handler)
    }

    /// Register a handler that runs for the next matching event only
    pub fn add_handler_once<E, F>(&self, handler: F) -> HandlerRemover
    where
        E: EventKind,
        F: Fn(&Session, &E) + Send + Sync + 'static,
    {
        self.inner.registry.add_once(handler)
    }

    pub fn handler_count(&self) -> usize {
        self.inner.registry.handler_count()
    }

    // === REST ===

    /// Send a REST request through the rate limiter
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> ClientResult<RestResponse> {
        let mut request = RestRequest::new(method, path);
        request.body = body;
        self.inner.limiter.execute(request).await
    }

    /// Send a REST request and decode the JSON response
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> ClientResult<T> {
        self.request(method, path, body).await?.json()
    }

    /// Gateway URL from `GET /gateway`, cached for the life of the session
    pub async fn gateway_url(&self) -> ClientResult<String> {
        let cached = self.inner.gateway_url.lock().clone();
        if let Some(url) = cached {
            return Ok(url);
        }

        let response: GatewayResponse = self.request_json(Method::GET, "/gateway", None).await?;
        tracing::debug!(url = %response.url, "Gateway URL resolved");

        *self.inner.gateway_url.lock() = Some(response.url.clone());
        Ok(response.url)
    }

    /// The account the credential belongs to
    pub async fn current_user(&self) -> ClientResult<User> {
        self.request_json(Method::GET, "/users/@me", None).await
    }

    // === Gateway commands ===

    async fn send_command(&self, message: GatewayMessage) -> ClientResult<()> {
        if !self.state().accepts_commands() {
            return Err(ClientError::NotConnected);
        }

        let commands = self
            .inner
            .gateway
            .lock()
            .await
            .as_ref()
            .filter(|handle| handle.is_running())
            .map(|handle| handle.commands.clone())
            .ok_or(ClientError::NotConnected)?;

        commands
            .send(message)
            .await
            .map_err(|_| ClientError::NotConnected)
    }

    /// Send a presence update (op 3)
    pub async fn update_status(&self, status: UpdateStatusData) -> ClientResult<()> {
        self.send_command(GatewayMessage::presence_update(&status)?)
            .await
    }

    /// Show "Playing `name`", optionally idle since `idle_since`
    pub async fn update_game_status(
        &self,
        idle_since: Option<EpochMsTime>,
        name: &str,
    ) -> ClientResult<()> {
        self.update_status(UpdateStatusData::game(idle_since, name))
            .await
    }

    /// Ask for guild members; they arrive as `GUILD_MEMBERS_CHUNK` events
    pub async fn request_guild_members(
        &self,
        payload: RequestGuildMembersPayload,
    ) -> ClientResult<()> {
        self.send_command(GatewayMessage::request_guild_members(&payload)?)
            .await
    }

    // === Lifecycle ===

    /// Connect to the gateway and send the handshake
    ///
    /// Returns once Identify (or Resume) has been sent; Ready arrives as an
    /// event. Any failure up to that point is returned and leaves the
    /// session disconnected.
    pub async fn open(&self) -> ClientResult<()> {
        if self.inner.token.is_none() {
            return Err(ClientError::MissingToken);
        }

        let mut gateway = self.inner.gateway.lock().await;
        if gateway.as_ref().is_some_and(GatewayHandle::is_running) {
            return Err(ClientError::AlreadyConnected);
        }

        let cancel = CancellationToken::new();
        *self.inner.cancel.lock() = cancel.clone();

        self.with_state_mut(|state| {
            state.reset();
            state.connection = ConnectionState::Connecting;
        });
        tracing::info!("Opening gateway connection");

        let connection = async {
            let url = tokio::select! {
                () = cancel.cancelled() => return Err(ClientError::Closed),
                url = self.gateway_url() => url?,
            };
            establish(self, &url, &cancel).await
        }
        .await;

        let connection = match connection {
            Ok(connection) => connection,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to open gateway connection");
                self.with_state_mut(SessionState::reset);
                return Err(e);
            }
        };

        let (commands, receiver) = mpsc::channel(COMMAND_BUFFER_SIZE);
        let runner = Runner::new(self, cancel, receiver);
        let task = tokio::spawn(runner.run(connection));

        *gateway = Some(GatewayHandle { commands, task });
        Ok(())
    }

    /// Close the gateway connection
    ///
    /// Stops the connection manager, sends a normal close frame, clears the
    /// session and cancels pending rate-limit waits. Safe to call at any
    /// time, any number of times.
    pub async fn close(&self) -> ClientResult<()> {
        self.inner.cancel.lock().cancel();
        self.inner.limiter.cancel_pending();

        let handle = self.inner.gateway.lock().await.take();
        if let Some(GatewayHandle { commands, mut task }) = handle {
            self.with_state_mut(|state| state.connection = ConnectionState::Closing);
            drop(commands);

            let timeout = self.inner.config.close_timeout;
            if tokio::time::timeout(timeout, &mut task).await.is_err() {
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Connection manager did not stop in time, aborting"
                );
                task.abort();
            }
            tracing::info!("Gateway connection closed");
        }

        self.with_state_mut(SessionState::reset);
        Ok(())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("Session")
            .field("state", &state.connection)
            .field("session_id", &state.session_id)
            .field("sequence", &state.sequence)
            .field("handlers", &self.inner.registry)
            .finish_non_exhaustive()
    }
}

/// Builder for a [`Session`] with custom configuration or transports
#[derive(Default)]
pub struct SessionBuilder {
    config: Option<ClientConfig>,
    token: Option<String>,
    connector: Option<Arc<dyn Connector>>,
    executor: Option<Arc<dyn RequestExecutor>>,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Credential; overrides the one in the configuration
    #[must_use]
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Gateway transport; websockets by default
    #[must_use]
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// REST transport; reqwest by default
    #[must_use]
    pub fn executor(mut self, executor: Arc<dyn RequestExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Validate the configuration and build the session
    pub fn build(self) -> ClientResult<Session> {
        if let Some(config) = &self.config {
            config.validate()?;
        }
        Ok(self.assemble())
    }

    fn assemble(self) -> Session {
        let config = self.config.unwrap_or_default();
        let token = self
            .token
            .or_else(|| config.token.clone())
            .filter(|token| !token.is_empty());

        let executor = self.executor.unwrap_or_else(|| {
            Arc::new(HttpExecutor::new(&config, token.as_deref())) as Arc<dyn RequestExecutor>
        });
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(WsConnector) as Arc<dyn Connector>);

        let registry = HandlerRegistry::new();
        let (ready, _) = watch::channel(false);

        Session {
            inner: Arc::new(SessionInner {
                config,
                token,
                state: RwLock::new(SessionState::default()),
                ready,
                dispatcher: EventDispatcher::new(registry.clone()),
                registry,
                limiter: Arc::new(RateLimiter::new(executor)),
                connector,
                gateway: tokio::sync::Mutex::new(None),
                cancel: parking_lot::Mutex::new(CancellationToken::new()),
                gateway_url: parking_lot::Mutex::new(None),
            }),
        }
    }
}
