//! Typed handler registration keys

use super::{Event, EventType};

/// Bucket a handler is registered under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKey {
    /// Exactly one event type
    Event(EventType),
    /// Every event
    Any,
    /// Registered but never delivered to
    Unmatched,
}

/// A type a handler can be registered for
///
/// Each event payload type implements this with its own key and extracts
/// itself from a decoded [`Event`]. [`Event`] itself is the "any event" kind.
/// Types that keep the defaults register under [`HandlerKey::Unmatched`]:
/// registration succeeds, the remover works, and the handler never runs.
pub trait EventKind: Send + Sync + 'static {
    const KEY: HandlerKey = HandlerKey::Unmatched;

    /// Borrow `Self` out of an event of the matching kind
    fn from_event(_event: &Event) -> Option<&Self> {
        None
    }
}

impl EventKind for Event {
    const KEY: HandlerKey = HandlerKey::Any;

    fn from_event(event: &Event) -> Option<&Self> {
        Some(event)
    }
}
