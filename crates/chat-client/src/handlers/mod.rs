//! Event handler registration

mod registry;

pub use registry::{HandlerRegistry, HandlerRemover};
