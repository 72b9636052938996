//! Gateway connection manager
//!
//! One runner task owns the gateway for an open session. It drives a single
//! `select!` loop over cancellation, the heartbeat timer, queued commands and
//! inbound frames; a writer task per connection owns the sink.

use super::backoff::Backoff;
use super::state::{ConnectionState, SessionState};
use super::transport::{FrameStream, Frame, TransportError};
use crate::dispatch::decode_event;
use crate::events::{Connect, Disconnect, Event, EventType, HeartbeatAck};
use crate::protocol::{
    CloseAction, CloseCode, GatewayMessage, IdentifyPayload, OpCode, ResumePayload,
};
use crate::ratelimit::authorization_header;
use crate::session::{Session, SessionInner};
use chat_common::{ClientError, ClientResult};
use chrono::Utc;
use rand::Rng;
use std::sync::Weak;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Outgoing frames buffered per connection
const WRITER_BUFFER_SIZE: usize = 100;

/// Gateway commands buffered while the runner is busy
pub(crate) const COMMAND_BUFFER_SIZE: usize = 32;

/// Wait before re-identifying after a non-resumable Invalid Session
const INVALID_SESSION_DELAY_MS: std::ops::RangeInclusive<u64> = 1_000..=5_000;

/// Handle to a running connection manager
pub(crate) struct GatewayHandle {
    pub(crate) commands: mpsc::Sender<GatewayMessage>,
    pub(crate) task: JoinHandle<()>,
}

impl GatewayHandle {
    pub(crate) fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

enum Outbound {
    Frame(GatewayMessage),
    Close(u16),
}

/// One live transport: the reader half plus a queue into the writer task
pub(crate) struct Connection {
    writer: mpsc::Sender<Outbound>,
    writer_task: JoinHandle<()>,
    stream: Box<dyn FrameStream>,
    heartbeat_interval: Duration,
}

impl Connection {
    async fn send(&self, message: GatewayMessage) -> ClientResult<()> {
        tracing::trace!(op = %message.op, "Queueing frame");
        self.writer
            .send(Outbound::Frame(message))
            .await
            .map_err(|_| TransportError::Closed.into())
    }

    /// Send a close frame with `code` and wait for the writer to finish
    async fn shutdown(self, code: u16, timeout: Duration) {
        // A full queue means the writer is stuck; dropping the sender ends it
        let _ = self.writer.try_send(Outbound::Close(code));
        drop(self.writer);

        let mut writer_task = self.writer_task;
        if tokio::time::timeout(timeout, &mut writer_task).await.is_err() {
            tracing::warn!(code, "Writer did not finish closing, aborting");
            writer_task.abort();
        }
    }
}

fn spawn_writer(
    mut sink: Box<dyn super::transport::FrameSink>,
) -> (mpsc::Sender<Outbound>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<Outbound>(WRITER_BUFFER_SIZE);

    let task = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            match outbound {
                Outbound::Frame(message) => {
                    let json = match message.to_json() {
                        Ok(json) => json,
                        Err(e) => {
                            tracing::warn!(op = %message.op, error = %e, "Failed to encode frame");
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(json).await {
                        tracing::warn!(error = %e, "Failed to send frame");
                        return;
                    }
                }
                Outbound::Close(code) => {
                    if let Err(e) = sink.close(code).await {
                        tracing::debug!(code, error = %e, "Close frame not delivered");
                    }
                    return;
                }
            }
        }

        // Every sender dropped without an explicit close
        let _ = sink.close(CloseCode::NORMAL).await;
    });

    (tx, task)
}

/// Build the connect URL for a gateway base URL
pub(crate) fn connect_url(base: &str, version: u8) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{base}{separator}v={version}&encoding=json")
}

/// Race `future` against `cancel`
async fn cancellable<T>(
    cancel: &CancellationToken,
    future: impl std::future::Future<Output = ClientResult<T>>,
) -> ClientResult<T> {
    tokio::select! {
        () = cancel.cancelled() => Err(ClientError::Closed),
        result = future => result,
    }
}

/// Connect, wait for Hello and send Identify or Resume
///
/// Resumes when the session still holds a session id and sequence, and
/// identifies from scratch otherwise.
pub(crate) async fn establish(
    session: &Session,
    base_url: &str,
    cancel: &CancellationToken,
) -> ClientResult<Connection> {
    let config = session.config();
    let token = session.token().ok_or(ClientError::MissingToken)?;
    let url = connect_url(base_url, config.gateway_version);

    session.with_state_mut(|state| state.connection = ConnectionState::Connecting);
    tracing::debug!(url = %url, "Connecting to gateway");

    let (sink, mut stream) = cancellable(cancel, async {
        session
            .connector()
            .connect(&url)
            .await
            .map_err(ClientError::from)
    })
    .await?;

    let (writer, writer_task) = spawn_writer(sink);

    let hello = cancellable(cancel, async {
        tokio::time::timeout(config.hello_timeout, wait_for_hello(stream.as_mut()))
            .await
            .map_err(|_| ClientError::handshake("timed out waiting for Hello"))?
    })
    .await;

    let heartbeat_interval = match hello {
        Ok(interval) => interval,
        Err(e) => {
            drop(writer);
            writer_task.abort();
            return Err(e);
        }
    };

    let connection = Connection {
        writer,
        writer_task,
        stream,
        heartbeat_interval,
    };

    session.dispatch(Event::Connect(Connect));

    if let Err(e) = send_handshake(session, &connection, &token).await {
        connection.shutdown(CloseCode::NORMAL, config.close_timeout).await;
        return Err(e);
    }

    Ok(connection)
}

async fn wait_for_hello(stream: &mut dyn FrameStream) -> ClientResult<Duration> {
    loop {
        match stream.next_frame().await {
            Some(Ok(Frame::Text(text))) => match GatewayMessage::from_json(&text) {
                Ok(message) => {
                    if let Some(hello) = message.as_hello() {
                        tracing::debug!(
                            heartbeat_interval = hello.heartbeat_interval,
                            "Hello received"
                        );
                        return Ok(Duration::from_millis(hello.heartbeat_interval));
                    }
                    tracing::debug!(op = %message.op, "Ignoring frame before Hello");
                }
                Err(e) => tracing::debug!(error = %e, "Discarding malformed frame before Hello"),
            },
            Some(Ok(Frame::Binary(_))) => tracing::debug!("Ignoring binary frame before Hello"),
            Some(Ok(Frame::Close(code))) => {
                return Err(ClientError::handshake(format!(
                    "connection closed before Hello (code {code:?})"
                )));
            }
            Some(Err(e)) => return Err(e.into()),
            None => return Err(ClientError::handshake("connection ended before Hello")),
        }
    }
}

/// Send Resume if the session can be resumed, Identify otherwise
async fn send_handshake(session: &Session, connection: &Connection, token: &str) -> ClientResult<()> {
    let snapshot = session.snapshot();

    let message = match (snapshot.session_id, snapshot.sequence) {
        (Some(session_id), Some(seq)) => {
            tracing::info!(session_id = %session_id, seq, "Resuming session");
            session.with_state_mut(|state| state.connection = ConnectionState::Resuming);
            GatewayMessage::resume(&ResumePayload {
                token: authorization_header(token),
                session_id,
                seq,
            })?
        }
        _ => {
            tracing::info!("Identifying");
            session.with_state_mut(|state| {
                state.invalidate_session();
                state.connection = ConnectionState::Identifying;
            });
            GatewayMessage::identify(&IdentifyPayload::new(
                authorization_header(token),
                session.config().intents,
            ))?
        }
    };

    connection.send(message).await
}

/// How a connection ended
enum ConnectionEnd {
    /// Close requested or the session was dropped
    Cancelled,
    /// Reconnect; `resume` is false when the session must be discarded
    Reconnect { resume: bool },
    /// Close code that rules out reconnecting
    Fatal(Option<u16>),
}

/// What the loop should do after a text frame
enum FrameOutcome {
    Continue,
    Acked,
    Reidentify,
    End(ConnectionEnd),
}

/// Connection manager task state
pub(crate) struct Runner {
    session: Weak<SessionInner>,
    cancel: CancellationToken,
    commands: mpsc::Receiver<GatewayMessage>,
    backoff: Backoff,
    failed_resumes: u32,
    max_reconnect_attempts: u32,
    max_resume_attempts: u32,
    close_timeout: Duration,
}

impl Runner {
    pub(crate) fn new(
        session: &Session,
        cancel: CancellationToken,
        commands: mpsc::Receiver<GatewayMessage>,
    ) -> Self {
        let config = session.config();
        Self {
            session: session.downgrade(),
            cancel,
            commands,
            backoff: Backoff::from_config(config),
            failed_resumes: 0,
            max_reconnect_attempts: config.max_reconnect_attempts,
            max_resume_attempts: config.max_resume_attempts,
            close_timeout: config.close_timeout,
        }
    }

    fn session(&self) -> Option<Session> {
        Session::upgrade(&self.session)
    }

    /// Drive the gateway until close, a fatal close code, or exhausted retries
    pub(crate) async fn run(mut self, connection: Connection) {
        let mut connection = connection;

        loop {
            match self.run_connection(connection).await {
                ConnectionEnd::Cancelled => {
                    tracing::debug!("Connection manager cancelled");
                    return;
                }
                ConnectionEnd::Fatal(code) => {
                    tracing::error!(
                        code = ?code,
                        reason = code
                            .and_then(CloseCode::from_u16)
                            .map_or("unknown", CloseCode::description),
                        "Gateway closed with a fatal code, not reconnecting"
                    );
                    if let Some(session) = self.session() {
                        session.with_state_mut(SessionState::reset);
                    }
                    return;
                }
                ConnectionEnd::Reconnect { resume } => {
                    if !resume {
                        if let Some(session) = self.session() {
                            session.with_state_mut(SessionState::invalidate_session);
                        }
                    }
                    match self.reconnect().await {
                        Some(next) => connection = next,
                        None => return,
                    }
                }
            }
        }
    }

    async fn run_connection(&mut self, mut connection: Connection) -> ConnectionEnd {
        let interval = connection.heartbeat_interval;
        let first_beat = interval.mul_f64(rand::thread_rng().gen_range(0.0..1.0));
        let mut heartbeat = tokio::time::interval_at(Instant::now() + first_beat, interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut awaiting_ack = false;
        let mut reidentify_at: Option<Instant> = None;

        let (end, close_code) = loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    connection.shutdown(CloseCode::NORMAL, self.close_timeout).await;
                    self.notify_disconnect(Some(CloseCode::NORMAL));
                    return ConnectionEnd::Cancelled;
                }

                _ = heartbeat.tick() => {
                    if awaiting_ack {
                        tracing::warn!("Heartbeat not acknowledged, reconnecting");
                        break (ConnectionEnd::Reconnect { resume: true }, None);
                    }
                    if !self.send_heartbeat(&connection).await {
                        break (ConnectionEnd::Reconnect { resume: true }, None);
                    }
                    awaiting_ack = true;
                }

                () = tokio::time::sleep_until(reidentify_at.unwrap_or_else(Instant::now)),
                    if reidentify_at.is_some() =>
                {
                    reidentify_at = None;
                    if !self.send_handshake(&connection).await {
                        break (ConnectionEnd::Reconnect { resume: false }, None);
                    }
                }

                Some(command) = self.commands.recv() => {
                    if connection.send(command).await.is_err() {
                        break (ConnectionEnd::Reconnect { resume: true }, None);
                    }
                }

                frame = connection.stream.next_frame() => match frame {
                    Some(Ok(Frame::Text(text))) => {
                        match self.handle_text(&connection, &text).await {
                            FrameOutcome::Continue => {}
                            FrameOutcome::Acked => awaiting_ack = false,
                            FrameOutcome::Reidentify => {
                                let delay = rand::thread_rng().gen_range(INVALID_SESSION_DELAY_MS);
                                reidentify_at = Some(Instant::now() + Duration::from_millis(delay));
                            }
                            FrameOutcome::End(end) => break (end, None),
                        }
                    }
                    Some(Ok(Frame::Binary(data))) => {
                        tracing::debug!(len = data.len(), "Discarding binary frame");
                    }
                    Some(Ok(Frame::Close(code))) => {
                        let end = match CloseCode::action_for(code) {
                            CloseAction::Resume => ConnectionEnd::Reconnect { resume: true },
                            CloseAction::Reidentify => ConnectionEnd::Reconnect { resume: false },
                            CloseAction::Stop => ConnectionEnd::Fatal(code),
                        };
                        tracing::info!(code = ?code, "Gateway closed the connection");
                        break (end, code);
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Gateway transport error");
                        break (ConnectionEnd::Reconnect { resume: true }, None);
                    }
                    None => {
                        tracing::warn!("Gateway stream ended");
                        break (ConnectionEnd::Reconnect { resume: true }, None);
                    }
                },
            }
        };

        // Closing with a non-1000 code keeps the session resumable
        connection.shutdown(CloseCode::RESUMABLE, self.close_timeout).await;
        self.notify_disconnect(close_code);
        end
    }

    async fn handle_text(&mut self, connection: &Connection, text: &str) -> FrameOutcome {
        let message = match GatewayMessage::from_json(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(error = %e, "Discarding malformed frame");
                return FrameOutcome::Continue;
            }
        };

        let Some(session) = self.session() else {
            return FrameOutcome::End(ConnectionEnd::Cancelled);
        };

        match message.op {
            OpCode::Dispatch => {
                self.handle_dispatch(&session, message);
                FrameOutcome::Continue
            }
            OpCode::Heartbeat => {
                tracing::debug!("Server requested a heartbeat");
                if self.send_heartbeat(connection).await {
                    FrameOutcome::Continue
                } else {
                    FrameOutcome::End(ConnectionEnd::Reconnect { resume: true })
                }
            }
            OpCode::HeartbeatAck => {
                session.dispatch(Event::HeartbeatAck(HeartbeatAck));
                FrameOutcome::Acked
            }
            OpCode::Reconnect => {
                tracing::info!("Server requested a reconnect");
                FrameOutcome::End(ConnectionEnd::Reconnect { resume: true })
            }
            OpCode::InvalidSession => {
                let resumable = message.as_invalid_session().unwrap_or(false);
                tracing::warn!(resumable, "Session invalidated by the server");

                if resumable {
                    if self.send_handshake(connection).await {
                        FrameOutcome::Continue
                    } else {
                        FrameOutcome::End(ConnectionEnd::Reconnect { resume: true })
                    }
                } else {
                    session.with_state_mut(SessionState::invalidate_session);
                    FrameOutcome::Reidentify
                }
            }
            OpCode::Hello => {
                tracing::debug!("Ignoring repeated Hello");
                FrameOutcome::Continue
            }
            op => {
                tracing::debug!(op = %op, "Ignoring client-only op code from server");
                FrameOutcome::Continue
            }
        }
    }

    fn handle_dispatch(&mut self, session: &Session, message: GatewayMessage) {
        if let Some(seq) = message.s {
            session.with_state_mut(|state| state.observe_sequence(seq));
        }

        let Some(name) = message.t else {
            tracing::debug!(seq = ?message.s, "Discarding dispatch without an event name");
            return;
        };

        let event = match decode_event(&name, message.d) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(event = %name, error = %e, "Discarding undecodable event");
                return;
            }
        };

        tracing::trace!(event = %name, seq = ?message.s, "Dispatch received");

        let event_type = event.event_type();
        session.dispatch(event);

        if matches!(event_type, EventType::Ready | EventType::Resumed) {
            self.backoff.reset();
            self.failed_resumes = 0;
        }
    }

    async fn send_heartbeat(&self, connection: &Connection) -> bool {
        let Some(session) = self.session() else {
            return false;
        };

        let sequence = session.sequence();
        session.with_state_mut(|state| state.last_heartbeat_sent = Some(Utc::now()));
        tracing::trace!(seq = ?sequence, "Sending heartbeat");

        connection
            .send(GatewayMessage::heartbeat(sequence))
            .await
            .is_ok()
    }

    async fn send_handshake(&self, connection: &Connection) -> bool {
        let Some(session) = self.session() else {
            return false;
        };
        let Some(token) = session.token() else {
            return false;
        };

        match send_handshake(&session, connection, &token).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to send handshake");
                false
            }
        }
    }

    fn notify_disconnect(&self, close_code: Option<u16>) {
        if let Some(session) = self.session() {
            session.dispatch(Event::Disconnect(Disconnect { close_code }));
        }
    }

    /// Back off and reconnect until a handshake is sent
    ///
    /// Returns `None` when cancelled or when attempts are exhausted; in the
    /// latter case the session is reset to disconnected.
    async fn reconnect(&mut self) -> Option<Connection> {
        loop {
            let session = self.session()?;

            if self.backoff.attempt() >= self.max_reconnect_attempts {
                tracing::error!(
                    attempts = self.backoff.attempt(),
                    "Reconnect attempts exhausted, giving up"
                );
                session.with_state_mut(SessionState::reset);
                return None;
            }

            session.with_state_mut(|state| {
                state.connection = ConnectionState::Reconnecting;
                state.data_ready = false;
            });
            let delay = self.backoff.next_delay();
            tracing::info!(
                attempt = self.backoff.attempt(),
                delay_ms = delay.as_millis() as u64,
                "Reconnecting to gateway"
            );
            drop(session);

            tokio::select! {
                () = self.cancel.cancelled() => return None,
                () = tokio::time::sleep(delay) => {}
            }

            let session = self.session()?;

            if self.failed_resumes >= self.max_resume_attempts {
                tracing::warn!(
                    failed_resumes = self.failed_resumes,
                    "Too many failed resumes, starting a new session"
                );
                session.with_state_mut(SessionState::invalidate_session);
                self.failed_resumes = 0;
            }

            let snapshot = session.snapshot();
            let resuming = snapshot.can_resume();
            let url = match snapshot.resume_gateway_url.filter(|_| resuming) {
                Some(url) => Ok(url),
                None => cancellable(&self.cancel, session.gateway_url()).await,
            };

            let result = match url {
                Ok(url) => establish(&session, &url, &self.cancel).await,
                Err(e) => Err(e),
            };

            if resuming {
                self.failed_resumes += 1;
            }

            match result {
                Ok(connection) => return Some(connection),
                Err(ClientError::Closed) => return None,
                Err(e) => tracing::warn!(error = %e, "Reconnect attempt failed"),
            }
        }
    }
}
