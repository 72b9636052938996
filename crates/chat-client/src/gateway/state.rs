//! Connection-derived session state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Gateway connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No connection manager running
    #[default]
    Disconnected,
    /// Resolving the gateway URL and opening the transport
    Connecting,
    /// Identify sent, waiting for Ready
    Identifying,
    /// Resume sent, waiting for Resumed
    Resuming,
    /// Ready or Resumed received
    Connected,
    /// Transport lost, waiting out the backoff
    Reconnecting,
    /// Close requested
    Closing,
}

impl ConnectionState {
    /// Check if a gateway transport is up and handshaken
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if gateway commands can be queued
    ///
    /// Commands are accepted while a handshake is in flight; they reach the
    /// wire after it on the same writer.
    #[must_use]
    pub const fn accepts_commands(self) -> bool {
        matches!(self, Self::Identifying | Self::Resuming | Self::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Identifying => "identifying",
            Self::Resuming => "resuming",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// Everything the connection manager knows about the current session
///
/// Guarded by a single lock on the session; only the connection manager and
/// the event dispatcher write to it.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub connection: ConnectionState,
    pub session_id: Option<String>,
    /// Last dispatch sequence received
    pub sequence: Option<u64>,
    /// True once Ready (or Resumed) has been dispatched
    pub data_ready: bool,
    pub last_heartbeat_ack: Option<DateTime<Utc>>,
    pub last_heartbeat_sent: Option<DateTime<Utc>>,
    /// URL announced by Ready for resuming
    pub resume_gateway_url: Option<String>,
}

impl SessionState {
    /// Record a dispatch sequence number; never moves backwards
    pub fn observe_sequence(&mut self, seq: u64) {
        self.sequence = Some(self.sequence.map_or(seq, |current| current.max(seq)));
    }

    /// Check whether a Resume can be attempted
    #[must_use]
    pub fn can_resume(&self) -> bool {
        self.session_id.is_some() && self.sequence.is_some()
    }

    /// Forget the session so the next handshake is a fresh Identify
    pub fn invalidate_session(&mut self) {
        self.session_id = None;
        self.sequence = None;
        self.resume_gateway_url = None;
        self.data_ready = false;
    }

    /// Clear every connection-derived field and mark the session disconnected
    pub fn reset(&mut self) {
        self.invalidate_session();
        self.connection = ConnectionState::Disconnected;
        self.last_heartbeat_ack = None;
        self.last_heartbeat_sent = None;
    }

    /// Round trip of the most recent acknowledged heartbeat
    #[must_use]
    pub fn heartbeat_latency(&self) -> Option<Duration> {
        let sent = self.last_heartbeat_sent?;
        let ack = self.last_heartbeat_ack?;
        (ack - sent).to_std().ok()
    }
}
