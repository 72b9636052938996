//! Gateway events
//!
//! Event names, typed payloads, and the registration keys handlers use.

mod event;
mod event_types;
mod kind;
mod payloads;

pub use event::Event;
pub use event_types::EventType;
pub use kind::{EventKind, HandlerKey};
pub use payloads::{
    ChannelCreate, ChannelDelete, ChannelUpdate, Connect, Disconnect, GuildCreate, GuildDelete,
    GuildMemberAdd, GuildMemberRemove, GuildMemberUpdate, GuildMembersChunk, GuildUpdate,
    HeartbeatAck, MessageCreate, MessageDelete, MessageReactionAdd, MessageReactionRemove,
    MessageUpdate, PresenceUpdate, RawEvent, Reaction, ReactionEmoji, Ready, Resumed,
    TypingStart, UserUpdate,
};
