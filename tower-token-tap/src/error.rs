use std::time::Duration;

/// Errors produced by the token-tap middleware stack.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShotError {
    /// Waiting for tokens plus running the request took longer than the
    /// configured timeout.
    ///
    /// When the `axum` feature is enabled, this converts to `408 Request Timeout`.
    #[error("Request timed out waiting for tokens")]
    Timeout,

    /// The managed stack shed the request instead of queuing it.
    ///
    /// When the `axum` feature is enabled, this converts to `503 Service Unavailable`.
    #[error("Service is overloaded; request shed")]
    Overloaded,

    /// The bucket did not hold enough tokens and the service fails fast.
    ///
    /// When the `axum` feature is enabled, this converts to `429 Too Many Requests`
    /// with a `Retry-After` header.
    #[error("Rate limit exceeded; retry after {retry_after:?}")]
    RateLimited {
        /// Estimated wait until enough tokens are available.
        retry_after: Duration,
    },

    /// A request costs more tokens than the bucket can ever hold.
    ///
    /// Retrying never helps. When the `axum` feature is enabled, this converts
    /// to `413 Payload Too Large`.
    #[error("Request costs {requested} tokens but capacity is {capacity}")]
    ExceedsCapacity { requested: u64, capacity: u64 },

    /// An unexpected error occurred in the inner service.
    ///
    /// When the `axum` feature is enabled, this converts to `500 Internal Server Error`.
    #[error("Internal service error: {0}")]
    Inner(String),
}

impl ShotError {
    /// Short label used as the `reason` metric attribute.
    pub(crate) fn reason(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Overloaded => "overloaded",
            Self::RateLimited { .. } => "rate_limited",
            Self::ExceedsCapacity { .. } => "exceeds_capacity",
            Self::Inner(_) => "inner",
        }
    }
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for ShotError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let (status, headers) = match &self {
            Self::Overloaded => (StatusCode::SERVICE_UNAVAILABLE, None),
            Self::Timeout => (StatusCode::REQUEST_TIMEOUT, None),
            Self::RateLimited { retry_after } => {
                // Retry-After has whole-second resolution; round up so clients don't return early
                let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
                let val = axum::http::HeaderValue::from(secs.max(1));
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    Some((axum::http::header::RETRY_AFTER, val)),
                )
            }
            Self::ExceedsCapacity { .. } => (StatusCode::PAYLOAD_TOO_LARGE, None),
            Self::Inner(_) => (StatusCode::INTERNAL_SERVER_ERROR, None),
        };

        let mut response = (status, self.to_string()).into_response();
        if let Some((name, value)) = headers {
            response.headers_mut().insert(name, value);
        }
        response
    }
}
