use std::future::Future;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;
use std::task::ready;
use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use pin_project_lite::pin_project;
use tokio::time::Instant;
use tokio::time::Sleep;
use tokio::time::Timeout;
use tokio::time::sleep_until;
use tokio::time::timeout_at;
use tower::BoxError;
use tower::Service;
use tracing::trace;

use token_tap::Reason;
use token_tap::Strategy;

use crate::error::ShotError;

#[derive(Clone, Debug)]
struct Instruments {
    admitted: Counter<u64>,
    rejected: Counter<u64>,
    early_wake: Counter<u64>,
}

impl Instruments {
    fn new() -> Self {
        let meter = global::meter("token_tap");
        Self {
            admitted: meter.u64_counter("token_tap.admitted").build(),
            rejected: meter.u64_counter("token_tap.rejected").build(),
            early_wake: meter.u64_counter("token_tap.early_wake").build(),
        }
    }
}

/// Charges every request against a shared [`Strategy`] before it reaches
/// the inner service.
///
/// The charge happens in `poll_ready`. When the strategy is short of tokens
/// the service either fails fast or sleeps for the strategy's `retry_after`
/// hint and tries again. An optional timeout covers the wait and the inner
/// call together.
#[derive(Debug)]
pub struct RateLimitService<L, S>
where
    L: ?Sized,
{
    inner: S,
    limiter: Arc<L>,
    cost: u64,
    fail_fast: bool,
    timeout: Option<Duration>,
    sleep: Option<Pin<Box<Sleep>>>,
    permit_acquired: bool,
    /// Fixed on the first `poll_ready` of a request when a timeout is set.
    deadline: Option<Instant>,
    instruments: Instruments,
}

pin_project! {
    #[project = ResponseProj]
    /// The inner service's future, bounded by the request deadline if there is one.
    pub enum ResponseFuture<F> {
        Bounded {
            #[pin]
            inner: Timeout<F>,
        },
        Unbounded {
            #[pin]
            inner: F,
        },
    }
}

impl<F, T> Future for ResponseFuture<F>
where
    F: Future<Output = Result<T, BoxError>>,
{
    type Output = Result<T, BoxError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project() {
            ResponseProj::Bounded { inner } => match ready!(inner.poll(cx)) {
                Ok(res) => Poll::Ready(res),
                Err(_) => Poll::Ready(Err(Box::new(ShotError::Timeout))),
            },
            ResponseProj::Unbounded { inner } => inner.poll(cx),
        }
    }
}

// Pin<Box<Sleep>> cannot be cloned; a clone starts with no request in flight
impl<L, S> Clone for RateLimitService<L, S>
where
    L: ?Sized,
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: Arc::clone(&self.limiter),
            cost: self.cost,
            fail_fast: self.fail_fast,
            timeout: self.timeout,
            sleep: None,
            permit_acquired: false,
            deadline: None,
            instruments: self.instruments.clone(),
        }
    }
}

impl<L, S, Req> Service<Req> for RateLimitService<L, S>
where
    L: Strategy + ?Sized + Send + Sync + 'static,
    S: Service<Req, Error = BoxError>,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        if let Some(fut) = self.sleep.as_mut() {
            if fut.as_mut().poll(cx).is_pending() {
                self.instruments.early_wake.add(1, &[]);
                return Poll::Pending;
            }
            self.sleep = None;
        }

        // Inner readiness first, so tokens are not spent on a request that can't run yet
        ready!(self.inner.poll_ready(cx))?;

        if self.permit_acquired {
            return Poll::Ready(Ok(()));
        }

        let now = Instant::now();
        if let Some(timeout) = self.timeout {
            let deadline = *self.deadline.get_or_insert(now + timeout);
            if now >= deadline {
                return Poll::Ready(Err(self.reject(ShotError::Timeout)));
            }
        }

        let retry_after = match self.limiter.process_n(self.cost) {
            ControlFlow::Continue(()) => {
                self.permit_acquired = true;
                self.instruments.admitted.add(1, &[]);
                return Poll::Ready(Ok(()));
            }
            ControlFlow::Break(Reason::ExceedsCapacity {
                requested,
                capacity,
            }) => {
                let err = ShotError::ExceedsCapacity {
                    requested,
                    capacity,
                };
                return Poll::Ready(Err(self.reject(err)));
            }
            ControlFlow::Break(Reason::Overloaded { retry_after }) => retry_after,
        };

        if self.fail_fast {
            return Poll::Ready(Err(self.reject(ShotError::RateLimited { retry_after })));
        }

        let wake_at = match self.deadline {
            Some(deadline) => deadline.min(now + retry_after),
            None => now + retry_after,
        };
        trace!(?retry_after, cost = self.cost, "waiting for tokens");

        let mut sleep_fut = Box::pin(sleep_until(wake_at));
        if sleep_fut.as_mut().poll(cx).is_ready() {
            // A zero hint: try again on the next poll
            cx.waker().wake_by_ref();
        } else {
            self.sleep = Some(sleep_fut);
        }
        Poll::Pending
    }

    fn call(&mut self, req: Req) -> Self::Future {
        self.permit_acquired = false;
        let deadline = self
            .deadline
            .take()
            .or_else(|| self.timeout.map(|timeout| Instant::now() + timeout));

        let inner = self.inner.call(req);
        match deadline {
            Some(deadline) => ResponseFuture::Bounded {
                inner: timeout_at(deadline, inner),
            },
            None => ResponseFuture::Unbounded { inner },
        }
    }
}

impl<L, S> RateLimitService<L, S>
where
    L: ?Sized,
{
    pub fn new(inner: S, limiter: Arc<L>) -> Self {
        Self {
            inner,
            limiter,
            cost: 1,
            fail_fast: false,
            timeout: None,
            sleep: None,
            permit_acquired: false,
            deadline: None,
            instruments: Instruments::new(),
        }
    }

    /// Tokens charged per request.
    pub fn with_cost(mut self, cost: u64) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Records a rejection and clears the per-request wait state.
    fn reject(&mut self, err: ShotError) -> BoxError {
        self.deadline = None;
        self.sleep = None;
        self.instruments
            .rejected
            .add(1, &[KeyValue::new("reason", err.reason())]);
        Box::new(err)
    }
}
