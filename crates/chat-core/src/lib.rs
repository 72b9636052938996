//! # chat-core
//!
//! Value objects and entity records shared by the gateway client.
//! This crate has no runtime or network dependencies.

pub mod models;
pub mod value_objects;

// Re-export commonly used types at crate root
pub use models::{
    Activity, ActivityType, Channel, Guild, Member, Message, Role, UnavailableGuild, User,
};
pub use value_objects::{EpochMsTime, Intents, Snowflake, SnowflakeParseError};
