//! Per-route rate limit state

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

pub(crate) const HEADER_LIMIT: &str = "x-ratelimit-limit";
pub(crate) const HEADER_REMAINING: &str = "x-ratelimit-remaining";
pub(crate) const HEADER_RESET_AFTER: &str = "x-ratelimit-reset-after";
pub(crate) const HEADER_GLOBAL: &str = "x-ratelimit-global";
pub(crate) const HEADER_RETRY_AFTER: &str = "retry-after";

/// Rate limit bucket for one route key
///
/// Starts with a single request allowed; server headers take over after the
/// first response. Until then the limiter sends one request at a time.
#[derive(Debug, Clone)]
pub struct Bucket {
    pub key: String,
    pub remaining: u32,
    pub limit: u32,
    /// When `remaining` refills to `limit`
    pub reset_at: Option<Instant>,
    /// Set once a response for this route has been seen
    pub seeded: bool,
}

impl Bucket {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            remaining: 1,
            limit: 1,
            reset_at: None,
            seeded: false,
        }
    }

    /// Instant the caller must wait for before using this bucket, if any
    pub fn wait_until(&self, now: Instant) -> Option<Instant> {
        match self.reset_at {
            Some(reset) if self.remaining == 0 && reset > now => Some(reset),
            _ => None,
        }
    }

    /// Take one request from the bucket, refilling it if the window passed
    ///
    /// Call only after any [`wait_until`](Self::wait_until) instant has passed.
    pub fn take(&mut self, now: Instant) {
        if self.remaining == 0 && self.reset_at.map_or(true, |reset| reset <= now) {
            self.remaining = self.limit.max(1);
            self.reset_at = None;
        }
        self.remaining = self.remaining.saturating_sub(1);
    }

    /// Apply `X-RateLimit-*` headers from a response
    pub fn update_from_headers(&mut self, headers: &HashMap<String, String>, now: Instant) {
        self.seeded = true;
        if let Some(limit) = header_parse::<u32>(headers, HEADER_LIMIT) {
            self.limit = limit;
        }
        if let Some(remaining) = header_parse::<u32>(headers, HEADER_REMAINING) {
            self.remaining = remaining;
        }
        if let Some(after) = header_parse::<f64>(headers, HEADER_RESET_AFTER) {
            self.reset_at = Some(now + secs_to_duration(after));
        }
    }

    /// Mark the bucket exhausted until `now + retry_after`
    pub fn exhaust(&mut self, retry_after: Duration, now: Instant) {
        self.remaining = 0;
        self.reset_at = Some(now + retry_after);
    }
}

pub(crate) fn header_parse<T: std::str::FromStr>(
    headers: &HashMap<String, String>,
    name: &str,
) -> Option<T> {
    headers.get(name).and_then(|v| v.trim().parse().ok())
}

/// Seconds as sent by the server, clamped to a non-negative duration
pub(crate) fn secs_to_duration(secs: f64) -> Duration {
    if secs.is_finite() && secs > 0.0 {
        Duration::from_secs_f64(secs)
    } else {
        Duration::ZERO
    }
}
