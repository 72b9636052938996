//! # chat-client
//!
//! Client for a real-time chat platform: a persistent gateway connection
//! with heartbeat, resume and reconnect, typed event handlers, and a
//! rate-limited REST path.
//!
//! ```no_run
//! use chat_client::{events::MessageCreate, Session};
//!
//! # async fn run() -> chat_common::ClientResult<()> {
//! let session = Session::new("token");
//! session.add_handler(|_: &Session, message: &MessageCreate| {
//!     println!("{}", message.content);
//! });
//! session.open().await?;
//! # Ok(())
//! # }
//! ```

pub mod dispatch;
pub mod events;
pub mod gateway;
pub mod handlers;
pub mod protocol;
pub mod ratelimit;
pub mod session;

pub use events::{Event, EventKind, EventType};
pub use gateway::ConnectionState;
pub use handlers::HandlerRemover;
pub use session::{Session, SessionBuilder};
