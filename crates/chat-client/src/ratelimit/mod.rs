//! REST rate limiting
//!
//! Per-route buckets plus a global limit, in front of a swappable request
//! executor.

mod bucket;
mod executor;
mod limiter;
mod route;

pub use bucket::Bucket;
pub use executor::{HttpExecutor, RequestExecutor, RestRequest, RestResponse};
pub use limiter::RateLimiter;
pub use route::route_key;

pub(crate) use executor::authorization_header;
