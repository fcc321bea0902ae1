//! HTTP API Module
//!
//! Registry endpoints (register, unregister, lookup, discovery) plus health
//! and metrics for monitoring.

mod metrics;
mod rate_limiter;
mod routes;

pub use metrics::Metrics;
pub use rate_limiter::RateLimiter;
pub use routes::{router, run_api_server, ApiState};
