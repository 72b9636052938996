//! Inbound event dispatch
//!
//! Decodes dispatch frames into [`Event`](crate::events::Event)s and hands
//! them to the session, which observes the control events before the
//! handlers see them.

mod decoder;
mod dispatcher;

pub use decoder::decode_event;
pub use dispatcher::EventDispatcher;
