//! Millisecond epoch timestamps
//!
//! Some payload fields carry instants as a plain integer count of
//! milliseconds since the Unix epoch rather than an ISO-8601 string.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// An instant serialized as integer milliseconds since the Unix epoch.
///
/// Precision finer than one millisecond is dropped on construction, so a value
/// always survives an encode/decode round trip unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EpochMsTime(DateTime<Utc>);

impl EpochMsTime {
    /// Wrap an instant, truncating it to millisecond precision
    pub fn new(time: DateTime<Utc>) -> Self {
        Self::from_millis(time.timestamp_millis())
    }

    /// Current time, truncated to milliseconds
    pub fn now() -> Self {
        Self::new(Utc::now())
    }

    /// Build from raw milliseconds since the Unix epoch
    ///
    /// Out-of-range values clamp to the Unix epoch.
    pub fn from_millis(millis: i64) -> Self {
        Self(
            Utc.timestamp_millis_opt(millis)
                .single()
                .unwrap_or(DateTime::UNIX_EPOCH),
        )
    }

    /// Milliseconds since the Unix epoch
    #[inline]
    pub fn as_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// The wrapped instant
    #[inline]
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl From<DateTime<Utc>> for EpochMsTime {
    fn from(time: DateTime<Utc>) -> Self {
        Self::new(time)
    }
}

impl From<EpochMsTime> for DateTime<Utc> {
    fn from(time: EpochMsTime) -> Self {
        time.0
    }
}

impl fmt::Display for EpochMsTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl Serialize for EpochMsTime {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(self.as_millis())
    }
}

impl<'de> Deserialize<'de> for EpochMsTime {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = i64::deserialize(deserializer)?;
        Ok(Self::from_millis(millis))
    }
}
