//! Gateway command payloads
//!
//! The `d` field of the frames the client sends, plus Hello.

use chat_core::{Activity, EpochMsTime, Intents, Snowflake};
use serde::{Deserialize, Serialize};

/// Payload for op 10 (Hello)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloPayload {
    /// Heartbeat interval in milliseconds
    pub heartbeat_interval: u64,
}

impl HelloPayload {
    #[must_use]
    pub fn with_interval(heartbeat_interval: u64) -> Self {
        Self { heartbeat_interval }
    }
}

/// Payload for op 2 (Identify)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyPayload {
    /// Credential, including the `Bot ` prefix
    pub token: String,
    pub properties: IdentifyProperties,
    #[serde(default)]
    pub compress: bool,
    /// Member count above which offline members are not sent in GUILD_CREATE
    #[serde(default = "default_large_threshold")]
    pub large_threshold: u32,
    pub intents: Intents,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence: Option<UpdateStatusData>,
}

fn default_large_threshold() -> u32 {
    250
}

impl IdentifyPayload {
    #[must_use]
    pub fn new(token: impl Into<String>, intents: Intents) -> Self {
        Self {
            token: token.into(),
            properties: IdentifyProperties::default(),
            compress: false,
            large_threshold: default_large_threshold(),
            intents,
            presence: None,
        }
    }

    /// Set the initial presence
    #[must_use]
    pub fn with_presence(mut self, presence: UpdateStatusData) -> Self {
        self.presence = Some(presence);
        self
    }
}

/// Client connection properties
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl Default for IdentifyProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: "chat-client".to_string(),
            device: "chat-client".to_string(),
        }
    }
}

/// Payload for op 6 (Resume)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumePayload {
    pub token: String,
    pub session_id: String,
    /// Last sequence number received
    pub seq: u64,
}

/// Online status shown to other users
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Online,
    Idle,
    Dnd,
    Invisible,
    Offline,
}

/// Payload for op 3 (Presence Update)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateStatusData {
    /// When the client went idle, or null if not idle
    pub since: Option<EpochMsTime>,
    #[serde(default)]
    pub activities: Vec<Activity>,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub afk: bool,
}

impl UpdateStatusData {
    /// Presence with a single "Playing {name}" activity
    ///
    /// A non-empty `idle_since` marks the client idle from that instant; an
    /// empty `name` clears the activity.
    #[must_use]
    pub fn game(idle_since: Option<EpochMsTime>, name: &str) -> Self {
        let activities = if name.is_empty() {
            Vec::new()
        } else {
            vec![Activity::game(name)]
        };

        Self {
            since: idle_since,
            activities,
            status: if idle_since.is_some() {
                Status::Idle
            } else {
                Status::Online
            },
            afk: false,
        }
    }
}

/// Payload for op 8 (Request Guild Members)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestGuildMembersPayload {
    pub guild_id: Snowflake,
    /// Username prefix to match; empty string with `limit = 0` requests all
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub presences: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_ids: Vec<Snowflake>,
    /// Echoed back in GUILD_MEMBERS_CHUNK
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

impl RequestGuildMembersPayload {
    /// Request members whose username starts with `query`
    #[must_use]
    pub fn by_query(guild_id: Snowflake, query: impl Into<String>, limit: u32) -> Self {
        Self {
            guild_id,
            query: Some(query.into()),
            limit,
            presences: false,
            user_ids: Vec::new(),
            nonce: None,
        }
    }

    /// Request specific members by ID
    #[must_use]
    pub fn by_ids(guild_id: Snowflake, user_ids: Vec<Snowflake>) -> Self {
        Self {
            guild_id,
            query: None,
            limit: 0,
            presences: false,
            user_ids,
            nonce: None,
        }
    }

    #[must_use]
    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }
}
