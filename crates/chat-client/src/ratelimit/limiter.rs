//! Per-route and global REST rate limiter

use super::bucket::{
    header_parse, secs_to_duration, Bucket, HEADER_GLOBAL, HEADER_RETRY_AFTER,
};
use super::executor::{RequestExecutor, RestRequest, RestResponse};
use super::route::route_key;
use chat_common::{ClientError, ClientResult};
use dashmap::DashMap;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Body of a 429 response
#[derive(Debug, Deserialize)]
struct RateLimitedBody {
    retry_after: f64,
    #[serde(default)]
    global: bool,
}

/// Rate limiter in front of a [`RequestExecutor`]
///
/// Every call waits out the global limit, then its route bucket, before it
/// is sent. Waits are cancellable through [`cancel_pending`](Self::cancel_pending).
pub struct RateLimiter {
    executor: Arc<dyn RequestExecutor>,
    buckets: DashMap<String, Arc<Mutex<Bucket>>>,
    /// Set while a global 429 is in force
    global_reset: Mutex<Option<Instant>>,
    cancel: parking_lot::Mutex<CancellationToken>,
}

impl RateLimiter {
    pub fn new(executor: Arc<dyn RequestExecutor>) -> Self {
        Self {
            executor,
            buckets: DashMap::new(),
            global_reset: Mutex::new(None),
            cancel: parking_lot::Mutex::new(CancellationToken::new()),
        }
    }

    /// Bucket for a route key, created on first use
    pub fn bucket(&self, key: &str) -> Arc<Mutex<Bucket>> {
        if let Some(bucket) = self.buckets.get(key) {
            return Arc::clone(bucket.value());
        }
        Arc::clone(
            self.buckets
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(Bucket::new(key))))
                .value(),
        )
    }

    /// Block every route until `after` has elapsed
    pub async fn set_global_limit(&self, after: Duration) {
        *self.global_reset.lock().await = Some(Instant::now() + after);
    }

    /// Cancel every wait in progress; later calls wait normally
    pub fn cancel_pending(&self) {
        let mut token = self.cancel.lock();
        token.cancel();
        *token = CancellationToken::new();
    }

    /// Send a request through the limiter
    ///
    /// A 429 is waited out and retried once; a second 429 is returned as
    /// [`ClientError::RateLimited`].
    pub async fn execute(&self, request: RestRequest) -> ClientResult<RestResponse> {
        let key = route_key(&request.method, &request.path);
        let bucket = self.bucket(&key);

        let response = self.attempt(&key, &bucket, &request).await?;
        let Some((retry_after, global)) = self.handle_rate_limited(&key, &bucket, &response).await
        else {
            return response.into_result();
        };

        tracing::warn!(
            route = %key,
            retry_after_ms = retry_after.as_millis() as u64,
            global,
            "Rate limited, retrying once"
        );

        let response = self.attempt(&key, &bucket, &request).await?;
        match self.handle_rate_limited(&key, &bucket, &response).await {
            Some((retry_after, global)) => Err(ClientError::RateLimited {
                retry_after_ms: retry_after.as_millis() as u64,
                global,
            }),
            None => response.into_result(),
        }
    }

    async fn attempt(
        &self,
        key: &str,
        bucket: &Mutex<Bucket>,
        request: &RestRequest,
    ) -> ClientResult<RestResponse> {
        let token = self.cancel.lock().clone();

        self.wait_global(&token).await?;

        let mut guard = bucket.lock().await;
        if let Some(until) = guard.wait_until(Instant::now()) {
            tracing::debug!(
                route = %key,
                wait_ms = until.saturating_duration_since(Instant::now()).as_millis() as u64,
                "Bucket exhausted, waiting for reset"
            );
            wait_until(until, &token).await?;
        }
        guard.take(Instant::now());

        // An unseeded bucket stays locked until its first headers arrive
        let response = if guard.seeded {
            drop(guard);
            let response = self.executor.execute(request).await?;
            bucket
                .lock()
                .await
                .update_from_headers(&response.headers, Instant::now());
            response
        } else {
            let response = self.executor.execute(request).await?;
            guard.update_from_headers(&response.headers, Instant::now());
            response
        };

        Ok(response)
    }

    async fn wait_global(&self, token: &CancellationToken) -> ClientResult<()> {
        let mut global = self.global_reset.lock().await;
        if let Some(until) = *global {
            if until > Instant::now() {
                tracing::debug!("Global rate limit in force, waiting");
                wait_until(until, token).await?;
            }
            *global = None;
        }
        Ok(())
    }

    /// For a 429, record the limit and return how long it lasts
    async fn handle_rate_limited(
        &self,
        key: &str,
        bucket: &Mutex<Bucket>,
        response: &RestResponse,
    ) -> Option<(Duration, bool)> {
        if response.status != 429 {
            return None;
        }

        let (retry_after, global) = parse_retry_after(response);
        if global {
            self.set_global_limit(retry_after).await;
        } else {
            bucket.lock().await.exhaust(retry_after, Instant::now());
        }

        tracing::trace!(route = %key, global, "429 recorded");
        Some((retry_after, global))
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("buckets", &self.buckets.len())
            .finish()
    }
}

/// Retry delay and scope of a 429: JSON body first, then headers
fn parse_retry_after(response: &RestResponse) -> (Duration, bool) {
    let header_global = header_parse::<bool>(&response.headers, HEADER_GLOBAL).unwrap_or(false);

    if let Ok(body) = serde_json::from_str::<RateLimitedBody>(&response.body) {
        return (secs_to_duration(body.retry_after), body.global || header_global);
    }

    let retry_after = header_parse::<f64>(&response.headers, HEADER_RETRY_AFTER)
        .map_or(Duration::from_secs(1), secs_to_duration);
    (retry_after, header_global)
}

async fn wait_until(until: Instant, token: &CancellationToken) -> ClientResult<()> {
    tokio::select! {
        () = tokio::time::sleep_until(until) => Ok(()),
        () = token.cancelled() => Err(ClientError::Closed),
    }
}
