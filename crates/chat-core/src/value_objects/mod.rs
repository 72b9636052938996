//! Value objects - immutable types that appear on the wire

mod intents;
mod snowflake;
mod timestamp;

pub use intents::Intents;
pub use snowflake::{Snowflake, SnowflakeParseError};
pub use timestamp::EpochMsTime;
