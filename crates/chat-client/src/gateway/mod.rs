//! Gateway connection management
//!
//! Transport boundary, connection state, reconnect backoff, and the runner
//! task that keeps a session connected.

mod backoff;
mod runner;
mod state;
mod transport;
mod ws;

pub use backoff::Backoff;
pub use state::{ConnectionState, SessionState};
pub use transport::{Connector, Frame, FrameSink, FrameStream, TransportError};
pub use ws::WsConnector;

pub(crate) use runner::{establish, GatewayHandle, Runner, COMMAND_BUFFER_SIZE};
