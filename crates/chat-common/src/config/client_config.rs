//! Client configuration
//!
//! Loads configuration from environment variables, with a `.env` file
//! honoured when present.

use chat_core::Intents;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Gateway client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Bot credential, without the `Bot ` prefix
    pub token: Option<String>,
    /// REST API base URL
    pub api_url: String,
    /// Gateway protocol version requested in the connect URL
    pub gateway_version: u8,
    /// Intents sent with Identify
    pub intents: Intents,
    /// Maximum wait for Hello after the transport connects
    pub hello_timeout: Duration,
    /// Maximum wait for the connection manager to stop on close
    pub close_timeout: Duration,
    /// Reconnect attempts before giving up
    pub max_reconnect_attempts: u32,
    /// Consecutive failed resumes before falling back to Identify
    pub max_resume_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Jitter applied to each backoff delay, as a fraction in [0, 1]
    pub backoff_jitter: f64,
    /// Per-request REST timeout
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_url: default_api_url(),
            gateway_version: 10,
            intents: Intents::default(),
            hello_timeout: Duration::from_millis(10_000),
            close_timeout: Duration::from_millis(5_000),
            max_reconnect_attempts: 10,
            max_resume_attempts: 3,
            backoff_base: Duration::from_millis(1_000),
            backoff_max: Duration::from_millis(60_000),
            backoff_jitter: 0.3,
            request_timeout: Duration::from_secs(20),
            user_agent: default_user_agent(),
        }
    }
}

// Default value functions
fn default_api_url() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_user_agent() -> String {
    format!(
        "DiscordBot (https://github.com/seung/chat-client, {})",
        env!("CARGO_PKG_VERSION")
    )
}

impl ClientConfig {
    /// Load configuration from environment variables
    ///
    /// Unset variables fall back to the defaults; set but unparsable
    /// variables are an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let intents = match lookup("CHAT_INTENTS") {
            Some(raw) => Intents::parse(&raw)
                .map_err(|e| ConfigError::InvalidValue("CHAT_INTENTS", e.to_string()))?,
            None => defaults.intents,
        };

        let config = Self {
            token: lookup("CHAT_TOKEN")
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
            api_url: lookup("CHAT_API_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_url),
            gateway_version: parse_var(&lookup, "CHAT_GATEWAY_VERSION")?
                .unwrap_or(defaults.gateway_version),
            intents,
            hello_timeout: parse_var(&lookup, "CHAT_HELLO_TIMEOUT_MS")?
                .map_or(defaults.hello_timeout, Duration::from_millis),
            close_timeout: parse_var(&lookup, "CHAT_CLOSE_TIMEOUT_MS")?
                .map_or(defaults.close_timeout, Duration::from_millis),
            max_reconnect_attempts: parse_var(&lookup, "CHAT_MAX_RECONNECT_ATTEMPTS")?
                .unwrap_or(defaults.max_reconnect_attempts),
            max_resume_attempts: parse_var(&lookup, "CHAT_MAX_RESUME_ATTEMPTS")?
                .unwrap_or(defaults.max_resume_attempts),
            backoff_base: parse_var(&lookup, "CHAT_BACKOFF_BASE_MS")?
                .map_or(defaults.backoff_base, Duration::from_millis),
            backoff_max: parse_var(&lookup, "CHAT_BACKOFF_MAX_MS")?
                .map_or(defaults.backoff_max, Duration::from_millis),
            backoff_jitter: parse_var(&lookup, "CHAT_BACKOFF_JITTER")?
                .unwrap_or(defaults.backoff_jitter),
            request_timeout: parse_var(&lookup, "CHAT_REQUEST_TIMEOUT_SECS")?
                .map_or(defaults.request_timeout, Duration::from_secs),
            user_agent: lookup("CHAT_USER_AGENT").unwrap_or(defaults.user_agent),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.backoff_jitter) {
            return Err(ConfigError::InvalidValue(
                "CHAT_BACKOFF_JITTER",
                format!("{} is outside [0, 1]", self.backoff_jitter),
            ));
        }
        if self.backoff_base > self.backoff_max {
            return Err(ConfigError::InvalidValue(
                "CHAT_BACKOFF_BASE_MS",
                "base delay exceeds CHAT_BACKOFF_MAX_MS".to_string(),
            ));
        }
        if self.hello_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "CHAT_HELLO_TIMEOUT_MS",
                "must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Set the credential
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Full URL for a REST path such as `/gateway`
    pub fn api_endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }
}

fn parse_var<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| ConfigError::InvalidValue(key, e.to_string()))
        })
        .transpose()
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}
