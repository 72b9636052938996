//! Client error types
//!
//! Unified error handling for the gateway client and its REST calls.

use crate::config::ConfigError;
use std::fmt;

/// Client-wide error type
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    // Session lifecycle errors
    #[error("No credential configured")]
    MissingToken,

    #[error("Gateway is not connected")]
    NotConnected,

    #[error("Gateway is already connected")]
    AlreadyConnected,

    #[error("Session closed")]
    Closed,

    // REST errors
    #[error("Unauthorized: the credential was rejected")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited (retry after {retry_after_ms} ms, global: {global})")]
    RateLimited { retry_after_ms: u64, global: bool },

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Request failed: {0}")]
    Request(String),

    // Gateway errors
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Failed to decode payload: {0}")]
    Decode(#[from] serde_json::Error),

    // Configuration errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    // Internal errors
    #[error("Internal error")]
    Internal(#[source] anyhow::Error),
}

impl ClientError {
    /// Get the HTTP status code for REST failures
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Unauthorized => Some(401),
            Self::Forbidden(_) => Some(403),
            Self::NotFound(_) => Some(404),
            Self::RateLimited { .. } => Some(429),
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Get a stable machine-readable error code
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MissingToken => "MISSING_TOKEN",
            Self::NotConnected => "NOT_CONNECTED",
            Self::AlreadyConnected => "ALREADY_CONNECTED",
            Self::Closed => "CLOSED",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::Http { .. } => "HTTP_ERROR",
            Self::Request(_) => "REQUEST_FAILED",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::Handshake(_) => "HANDSHAKE_FAILED",
            Self::Decode(_) => "DECODE_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Check whether retrying the same operation later may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Request(_) | Self::Transport(_) => true,
            Self::Http { status, .. } => (500..600).contains(status),
            _ => false,
        }
    }

    /// Create a transport error
    #[must_use]
    pub fn transport(msg: impl fmt::Display) -> Self {
        Self::Transport(msg.to_string())
    }

    /// Create a handshake error
    #[must_use]
    pub fn handshake(msg: impl fmt::Display) -> Self {
        Self::Handshake(msg.to_string())
    }

    /// Create an internal error from any error
    pub fn internal(err: impl Into<anyhow::Error>) -> Self {
        Self::Internal(err.into())
    }
}

/// Result type alias for client operations
pub type ClientResult<T> = Result<T, ClientError>;
