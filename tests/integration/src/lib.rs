//! Integration test utilities for the chat client
//!
//! In-memory gateway and REST doubles for driving a [`Session`] frame by
//! frame, plus a fake platform serving real HTTP and websockets.
//!
//! [`Session`]: chat_client::Session

pub mod helpers;

pub use fixtures::*;
pub use helpers::*;
