//! REST request execution boundary

use async_trait::async_trait;
use chat_common::{ClientConfig, ClientError, ClientResult};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;

/// A REST call relative to the API base URL
#[derive(Debug, Clone)]
pub struct RestRequest {
    pub method: Method,
    /// Path starting with `/`, optionally with a query string
    pub path: String,
    pub body: Option<Value>,
}

impl RestRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Raw response; any status, headers keyed in lowercase
#[derive(Debug, Clone, Default)]
pub struct RestResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl RestResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Map a non-2xx status to the matching error
    pub fn into_result(self) -> ClientResult<Self> {
        if self.is_success() {
            return Ok(self);
        }

        let message = self.error_message();
        Err(match self.status {
            401 => ClientError::Unauthorized,
            403 => ClientError::Forbidden(message),
            404 => ClientError::NotFound(message),
            status => ClientError::Http { status, message },
        })
    }

    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> ClientResult<T> {
        Ok(serde_json::from_str(&self.body)?)
    }

    /// `message` from a JSON error body, else the raw body
    fn error_message(&self) -> String {
        serde_json::from_str::<Value>(&self.body)
            .ok()
            .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| self.body.clone())
    }
}

/// Sends REST requests
///
/// Implementations return every response as-is, including error statuses;
/// only failures to get a response at all are errors.
#[async_trait]
pub trait RequestExecutor: Send + Sync + 'static {
    async fn execute(&self, request: &RestRequest) -> ClientResult<RestResponse>;
}

/// Production executor over reqwest
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: reqwest::Client,
    api_url: String,
    authorization: Option<String>,
}

impl HttpExecutor {
    /// Build the executor; no request is made until the first call
    ///
    /// Falls back to a default client, without the configured user agent and
    /// timeout, if the configured one cannot be built.
    pub fn new(config: &ClientConfig, token: Option<&str>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "HTTP client configuration rejected, using defaults");
                reqwest::Client::new()
            });

        Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            authorization: token.map(authorization_header),
        }
    }
}

/// `Authorization` value for a bot credential
pub(crate) fn authorization_header(token: &str) -> String {
    if token.starts_with("Bot ") || token.starts_with("Bearer ") {
        token.to_string()
    } else {
        format!("Bot {token}")
    }
}

#[async_trait]
impl RequestExecutor for HttpExecutor {
    async fn execute(&self, request: &RestRequest) -> ClientResult<RestResponse> {
        let url = format!("{}{}", self.api_url, request.path);
        let mut builder = self.client.request(request.method.clone(), &url);

        if let Some(auth) = &self.authorization {
            builder = builder.header(reqwest::header::AUTHORIZATION, auth);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        tracing::trace!(method = %request.method, url = %url, "Sending request");

        let response = builder
            .send()
            .await
            .map_err(|e| ClientError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| ClientError::Request(e.to_string()))?;

        tracing::debug!(method = %request.method, path = %request.path, status, "Request completed");

        Ok(RestResponse {
            status,
            headers,
            body,
        })
    }
}
