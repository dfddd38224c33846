use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use token_tap::Strategy;
use tower::BoxError;
use tower::Layer;
use tower::Service;
use tower::util::BoxCloneSyncService;

use crate::RateLimitService;
use crate::ShotError;

/// A pre-composed, shed-first stack around a token bucket.
///
/// Requests the bucket cannot admit right now are shed instead of queued,
/// and the whole request is bounded by `max_wait`. Every error leaving the
/// stack is a [`ShotError`]:
///
/// - **`Overloaded`**: the bucket was short when the request arrived.
/// - **`ExceedsCapacity`**: the request costs more than the bucket can hold.
/// - **`Timeout`**: the inner service did not answer within `max_wait`.
/// - **`Inner`**: any other inner service error, rendered as a string.
pub struct ManagedRateLimitLayer<L, Req>
where
    L: ?Sized,
{
    limiter: Arc<L>,
    max_wait: Duration,
    cost: u64,
    _phantom: PhantomData<fn(Req)>,
}

// Deriving Clone would require `Req: Clone`, which breaks Axum routers
impl<L, Req> Clone for ManagedRateLimitLayer<L, Req>
where
    L: ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            limiter: self.limiter.clone(),
            max_wait: self.max_wait,
            cost: self.cost,
            _phantom: PhantomData,
        }
    }
}

impl<L, Req> ManagedRateLimitLayer<L, Req>
where
    L: Strategy + ?Sized,
{
    pub fn new(limiter: Arc<L>, max_wait: Duration) -> Self {
        Self {
            limiter,
            max_wait,
            cost: 1,
            _phantom: PhantomData,
        }
    }

    /// Set how many tokens each request costs.
    pub fn with_cost(mut self, cost: u64) -> Self {
        self.cost = cost;
        self
    }
}

impl<S, L, Req> Layer<S> for ManagedRateLimitLayer<L, Req>
where
    L: Strategy + ?Sized + Send + Sync + 'static,
    S: Service<Req, Error = BoxError> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
    S::Response: 'static,
    Req: Send + 'static,
{
    type Service = BoxCloneSyncService<Req, S::Response, BoxError>;

    fn layer(&self, inner: S) -> Self::Service {
        let rl = RateLimitService::new(inner, self.limiter.clone()).with_cost(self.cost);

        // Timeout is outer to ensure a hard deadline on the entire process.
        let svc = tower::ServiceBuilder::new()
            .map_err(into_shot_error)
            .timeout(self.max_wait)
            .load_shed()
            .service(rl);

        BoxCloneSyncService::new(svc)
    }
}

fn into_shot_error(err: BoxError) -> BoxError {
    if err.is::<tower::timeout::error::Elapsed>() {
        BoxError::from(ShotError::Timeout)
    } else if err.is::<tower::load_shed::error::Overloaded>() {
        BoxError::from(ShotError::Overloaded)
    } else if err.is::<ShotError>() {
        err
    } else {
        Box::new(ShotError::Inner(err.to_string()))
    }
}
