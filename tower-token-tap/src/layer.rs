use std::sync::Arc;
use std::time::Duration;

use token_tap::Strategy;
use tower::Layer;

use crate::service::RateLimitService;

/// Charges requests against a shared token bucket.
#[derive(Debug)]
pub struct RateLimitLayer<L>
where
    L: ?Sized,
{
    limiter: Arc<L>,
    cost: u64,
    fail_fast: bool,
    timeout: Option<Duration>,
}

impl<L> Clone for RateLimitLayer<L>
where
    L: ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            limiter: Arc::clone(&self.limiter),
            cost: self.cost,
            fail_fast: self.fail_fast,
            timeout: self.timeout,
        }
    }
}

impl<L> RateLimitLayer<L>
where
    L: Strategy + ?Sized,
{
    /// Create a RateLimitLayer charging one token per request.
    pub fn new(limiter: Arc<L>) -> Self {
        RateLimitLayer {
            limiter,
            cost: 1,
            fail_fast: false,
            timeout: None,
        }
    }

    /// Set how many tokens each request costs.
    ///
    /// A cost above the bucket's capacity can never be admitted and fails with
    /// `ShotError::ExceedsCapacity`.
    pub fn with_cost(mut self, cost: u64) -> Self {
        self.cost = cost;
        self
    }

    /// Set whether the service should fail immediately when the bucket is short.
    ///
    /// If `true`, the service returns `ShotError::RateLimited` carrying the
    /// bucket's wait estimate instead of sleeping on it.
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Set a unified timeout for both waiting for tokens and request execution.
    ///
    /// If the total time exceeds this duration, the service
    /// will return `ShotError::Timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl<L, S> Layer<S> for RateLimitLayer<L>
where
    L: ?Sized,
{
    type Service = RateLimitService<L, S>;

    fn layer(&self, service: S) -> Self::Service {
        let mut svc = RateLimitService::new(service, self.limiter.clone())
            .with_cost(self.cost)
            .with_fail_fast(self.fail_fast);
        if let Some(timeout) = self.timeout {
            svc = svc.with_timeout(timeout);
        }
        svc
    }
}
