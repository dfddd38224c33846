//! # Tower Token Tap
//!
//! `tower-token-tap` admits requests against a shared, lock-free
//! [`token_tap::TokenBucket`] inside the [Tower](https://github.com/tower-rs/tower)
//! ecosystem.
//!
//! ## Layers
//!
//! - [`RateLimitLayer`]: charges a configurable number of tokens per request in
//!   `poll_ready`. When the bucket is short it either fails fast with
//!   [`ShotError::RateLimited`] (carrying the bucket's wait estimate) or sleeps
//!   on that estimate, optionally bounded by a timeout.
//! - [`ManagedRateLimitLayer`]: a pre-composed shed-first stack (timeout, load
//!   shedding and error mapping) whose errors are all [`ShotError`].
//!
//! ## Metrics
//!
//! The services record OpenTelemetry counters through the global meter
//! provider: `token_tap.admitted`, `token_tap.rejected` (with a `reason`
//! attribute) and `token_tap.early_wake`.
//!
//! ## Feature Flags
//!
//! - `axum`: Enables `IntoResponse` for [`ShotError`], allowing automatic conversion
//!   to HTTP status codes (408, 413, 429, 503, 500).

mod error;
mod layer;
mod managed_layer;
mod service;

#[cfg(test)]
mod tests;

pub use error::ShotError;
pub use layer::RateLimitLayer;
pub use managed_layer::ManagedRateLimitLayer;
pub use service::RateLimitService;
pub use service::ResponseFuture;
