//! Decoded gateway events

use super::kind::{EventKind, HandlerKey};
use super::payloads::*;
use super::EventType;
use serde_json::Value;

/// Declare the `Event` enum and wire each payload type to its variant
///
/// `dispatch` types decode from the `d` of a dispatch frame; `synthetic`
/// types are raised by the client itself.
macro_rules! gateway_events {
    (
        dispatch: [$($wire:ident),* $(,)?],
        synthetic: [$($synthetic:ident),* $(,)?] $(,)?
    ) => {
        /// Any event a handler can receive
        #[derive(Debug, Clone)]
        pub enum Event {
            $($wire($wire),)*
            $($synthetic($synthetic),)*
            /// Dispatch with a name the client does not model
            Unknown(RawEvent),
        }

        impl Event {
            /// Type of this event
            #[must_use]
            pub fn event_type(&self) -> EventType {
                match self {
                    $(Self::$wire(_) => EventType::$wire,)*
                    $(Self::$synthetic(_) => EventType::$synthetic,)*
                    Self::Unknown(_) => EventType::Unknown,
                }
            }

            /// Decode the payload of a dispatch event
            ///
            /// Synthetic types never arrive on the wire; asking for one yields
            /// an `Unknown` event carrying the data untouched.
            pub(crate) fn from_dispatch(
                event_type: EventType,
                data: Value,
            ) -> Result<Self, serde_json::Error> {
                Ok(match event_type {
                    $(EventType::$wire => Self::$wire(serde_json::from_value(data)?),)*
                    other => Self::Unknown(RawEvent {
                        name: other.as_str().to_string(),
                        data,
                    }),
                })
            }
        }

        $(
            impl EventKind for $wire {
                const KEY: HandlerKey = HandlerKey::Event(EventType::$wire);

                fn from_event(event: &Event) -> Option<&Self> {
                    match event {
                        Event::$wire(inner) => Some(inner),
                        _ => None,
                    }
                }
            }

            impl From<$wire> for Event {
                fn from(inner: $wire) -> Self {
                    Self::$wire(inner)
                }
            }
        )*

        $(
            impl EventKind for $synthetic {
                const KEY: HandlerKey = HandlerKey::Event(EventType::$synthetic);

                fn from_event(event: &Event) -> Option<&Self> {
                    match event {
                        Event::$synthetic(inner) => Some(inner),
                        _ => None,
                    }
                }
            }

            impl From<$synthetic> for Event {
                fn from(inner: $synthetic) -> Self {
                    Self::$synthetic(inner)
                }
            }
        )*
    };
}

gateway_events! {
    dispatch: [
        Ready,
        Resumed,
        GuildCreate,
        GuildUpdate,
        GuildDelete,
        GuildMemberAdd,
        GuildMemberUpdate,
        GuildMemberRemove,
        GuildMembersChunk,
        ChannelCreate,
        ChannelUpdate,
        ChannelDelete,
        MessageCreate,
        MessageUpdate,
        MessageDelete,
        MessageReactionAdd,
        MessageReactionRemove,
        PresenceUpdate,
        TypingStart,
        UserUpdate,
    ],
    synthetic: [Connect, Disconnect, HeartbeatAck],
}

impl EventKind for RawEvent {
    const KEY: HandlerKey = HandlerKey::Event(EventType::Unknown);

    fn from_event(event: &Event) -> Option<&Self> {
        match event {
            Event::Unknown(raw) => Some(raw),
            _ => None,
        }
    }
}

impl From<RawEvent> for Event {
    fn from(raw: RawEvent) -> Self {
        Self::Unknown(raw)
    }
}

impl Event {
    /// Wire name of this event; unknown events keep the name they arrived with
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Unknown(raw) => &raw.name,
            other => other.event_type().as_str(),
        }
    }

    /// Handler bucket this event is delivered to, besides `Any`
    #[must_use]
    pub fn handler_key(&self) -> HandlerKey {
        HandlerKey::Event(self.event_type())
    }
}
