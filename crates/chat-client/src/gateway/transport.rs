//! Gateway transport boundary
//!
//! The connection manager talks to the gateway through these traits so the
//! websocket implementation can be swapped for an in-memory one in tests.

use async_trait::async_trait;
use chat_common::ClientError;

/// One inbound transport frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    /// Clean close, with the peer's close code if it sent one
    Close(Option<u16>),
}

/// Transport failures
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("receive failed: {0}")]
    Receive(String),

    #[error("connection closed")]
    Closed,
}

impl From<TransportError> for ClientError {
    fn from(err: TransportError) -> Self {
        ClientError::transport(err)
    }
}

/// Opens gateway connections
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(
        &self,
        url: &str,
    ) -> Result<(Box<dyn FrameSink>, Box<dyn FrameStream>), TransportError>;
}

/// Write half of a gateway connection
#[async_trait]
pub trait FrameSink: Send + 'static {
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Send a close frame with `code` and shut the write half
    async fn close(&mut self, code: u16) -> Result<(), TransportError>;
}

/// Read half of a gateway connection
#[async_trait]
pub trait FrameStream: Send + Sync + 'static {
    /// Next frame; `None` once the stream has ended
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>>;
}
