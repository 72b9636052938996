//! Event payload definitions
//!
//! One type per event. Entity-shaped events wrap the record from `chat_core`;
//! the rest carry just the fields the client models. Unknown fields are
//! ignored.

use chat_core::{
    Activity, Channel, Guild, Member, Message, Snowflake, UnavailableGuild, User,
};
use serde::{Deserialize, Serialize};
use std::ops::Deref;

/// Declare events whose payload is exactly an entity record
macro_rules! entity_events {
    ($($(#[$meta:meta])* $name:ident($inner:ty);)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
            #[serde(transparent)]
            pub struct $name(pub $inner);

            impl Deref for $name {
                type Target = $inner;

                fn deref(&self) -> &Self::Target {
                    &self.0
                }
            }
        )*
    };
}

entity_events! {
    /// A guild became available or the client joined one
    GuildCreate(Guild);
    GuildUpdate(Guild);
    GuildMemberAdd(Member);
    ChannelCreate(Channel);
    ChannelUpdate(Channel);
    ChannelDelete(Channel);
    MessageCreate(Message);
    /// Partial message; only the IDs are guaranteed
    MessageUpdate(Message);
    /// The connected account changed
    UserUpdate(User);
}

// === Connection Events ===

/// READY event payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ready {
    /// Gateway protocol version
    #[serde(default)]
    pub v: u8,
    pub user: User,
    #[serde(default)]
    pub guilds: Vec<UnavailableGuild>,
    pub session_id: String,
    /// URL to reconnect to when resuming
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_gateway_url: Option<String>,
}

/// RESUMED event payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resumed {}

// === Guild Events ===

/// GUILD_DELETE: left, kicked, or the guild went unavailable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GuildDelete(pub UnavailableGuild);

impl Deref for GuildDelete {
    type Target = UnavailableGuild;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// GUILD_MEMBER_UPDATE event payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildMemberUpdate {
    pub guild_id: Snowflake,
    pub user: User,
    #[serde(default)]
    pub roles: Vec<Snowflake>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nick: Option<String>,
}

/// GUILD_MEMBER_REMOVE event payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildMemberRemove {
    pub guild_id: Snowflake,
    pub user: User,
}

/// GUILD_MEMBERS_CHUNK event payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildMembersChunk {
    pub guild_id: Snowflake,
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub chunk_index: u32,
    #[serde(default)]
    pub chunk_count: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub not_found: Vec<Snowflake>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

// === Message Events ===

/// MESSAGE_DELETE event payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDelete {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<Snowflake>,
}

/// Emoji attached to a reaction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionEmoji {
    /// Custom emoji ID; unicode emoji have none
    #[serde(default)]
    pub id: Option<Snowflake>,
    #[serde(default)]
    pub name: Option<String>,
}

/// MESSAGE_REACTION_ADD / MESSAGE_REACTION_REMOVE body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub user_id: Snowflake,
    pub channel_id: Snowflake,
    pub message_id: Snowflake,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<Snowflake>,
    #[serde(default)]
    pub emoji: ReactionEmoji,
}

entity_events! {
    MessageReactionAdd(Reaction);
    MessageReactionRemove(Reaction);
}

// === Presence Events ===

/// PRESENCE_UPDATE event payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    /// Only `id` is guaranteed
    pub user: User,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<Snowflake>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub activities: Vec<Activity>,
}

/// TYPING_START event payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingStart {
    pub channel_id: Snowflake,
    pub user_id: Snowflake,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<Snowflake>,
    /// Unix time in seconds
    #[serde(default)]
    pub timestamp: u64,
}

// === Synthetic Events ===

/// The gateway transport connected
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Connect;

/// The gateway transport dropped
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Disconnect {
    /// Close code the server sent, if any
    pub close_code: Option<u16>,
}

/// A heartbeat was acknowledged
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeartbeatAck;

/// Dispatch whose name the client does not model
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub name: String,
    pub data: serde_json::Value,
}
