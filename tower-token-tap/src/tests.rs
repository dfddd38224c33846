use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::task::Context;
use std::task::Poll;
use std::time::Duration;

use quanta::Clock;
use quanta::Mock;
use token_tap::BucketConfig;
use token_tap::Reason;
use token_tap::Strategy;
use token_tap::TokenBucket;
use tower::BoxError;
use tower::Layer;
use tower::Service;
use tower::ServiceBuilder;
use tower::ServiceExt;

use super::*;

use futures::future::Ready;
use futures::future::ready;

#[derive(Clone)]
struct MockService {
    pub count: Arc<AtomicUsize>,
}

impl MockService {
    fn new() -> Self {
        Self {
            count: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Service<()> for MockService {
    type Response = ();
    type Error = BoxError;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _req: ()) -> Self::Future {
        self.count.fetch_add(1, Ordering::SeqCst);
        ready(Ok(()))
    }
}

// An inner service that always fails
#[derive(Clone)]
struct BrokenService;

impl Service<()> for BrokenService {
    type Response = ();
    type Error = BoxError;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _req: ()) -> Self::Future {
        ready(Err("database unavailable".into()))
    }
}

// A mock strategy that blocks exactly once, then allows everything
#[derive(Debug)]
struct InstantRecoveryStrategy {
    already_blocked: AtomicBool,
}

impl Strategy for InstantRecoveryStrategy {
    fn process_n(&self, _cost: u64) -> ControlFlow<Reason> {
        if self.already_blocked.swap(true, Ordering::SeqCst) {
            ControlFlow::Continue(())
        } else {
            // Hint an immediate recovery
            ControlFlow::Break(Reason::Overloaded {
                retry_after: Duration::from_nanos(0),
            })
        }
    }
}

fn mock_bucket(
    capacity: u64,
    refill_amount: u64,
    period: Duration,
) -> (Arc<TokenBucket>, Arc<Mock>) {
    let (clock, mock) = Clock::mock();
    let config = BucketConfig::new(capacity, refill_amount, period).unwrap();
    (Arc::new(TokenBucket::with_clock(config, clock)), mock)
}

fn shot_error(err: BoxError) -> ShotError {
    err.downcast_ref::<ShotError>()
        .cloned()
        .unwrap_or_else(|| panic!("expected a ShotError, got {err}"))
}

#[tokio::test]
async fn test_poll_ready_backpressure() {
    tokio::time::pause();

    let interval = Duration::from_millis(100);
    let (bucket, mock) = mock_bucket(2, 1, interval);
    let mut service = RateLimitService::new(MockService::new(), bucket);

    service.ready().await.unwrap();
    service.call(()).await.unwrap();

    service.ready().await.unwrap();
    service.call(()).await.unwrap();

    // The bucket is empty, so readiness must stay Pending
    let mut ready_fut = service.ready();
    tokio::select! {
        _ = &mut ready_fut => panic!("Should be throttled!"),
        _ = tokio::time::sleep(Duration::from_millis(10)) => {}
    }

    // One refill period later, on both clocks
    mock.increment(Duration::from_millis(110));
    tokio::time::advance(Duration::from_millis(110)).await;

    ready_fut.await.expect("Should recover");
    service.call(()).await.unwrap();
}

#[tokio::test]
async fn test_fail_fast_reports_wait_estimate() {
    let (bucket, _mock) = mock_bucket(1, 1, Duration::from_millis(100));
    let mut service = RateLimitService::new(MockService::new(), bucket).with_fail_fast(true);

    service.ready().await.unwrap().call(()).await.unwrap();

    let err = service.ready().await.err().expect("Should be rate limited");
    assert_eq!(
        shot_error(err),
        ShotError::RateLimited {
            retry_after: Duration::from_millis(100),
        }
    );
}

#[tokio::test]
async fn test_cost_is_charged_per_request() {
    let (bucket, _mock) = mock_bucket(5, 5, Duration::from_secs(10));
    let mock = MockService::new();
    let count = mock.count.clone();

    let mut service = ServiceBuilder::new()
        .layer(
            RateLimitLayer::new(bucket.clone())
                .with_cost(2)
                .with_fail_fast(true),
        )
        .service(mock);

    service.ready().await.unwrap().call(()).await.unwrap();
    service.ready().await.unwrap().call(()).await.unwrap();

    // One token left; the third request needs two
    let err = service.ready().await.err().expect("Should be rate limited");
    assert_eq!(
        shot_error(err),
        ShotError::RateLimited {
            retry_after: Duration::from_secs(2),
        }
    );
    assert_eq!(count.load(Ordering::SeqCst), 2);
    assert_eq!(bucket.available_tokens(), 1);
}

#[tokio::test]
async fn test_cost_above_capacity_is_rejected() {
    let (bucket, _mock) = mock_bucket(2, 1, Duration::from_secs(1));
    let mut service = RateLimitLayer::new(bucket.clone())
        .with_cost(3)
        .layer(MockService::new());

    let err = service.ready().await.err().expect("Should never be admitted");
    assert_eq!(
        shot_error(err),
        ShotError::ExceedsCapacity {
            requested: 3,
            capacity: 2,
        }
    );
    assert_eq!(bucket.available_tokens(), 2);
}

#[tokio::test]
async fn test_timeout_while_waiting() {
    tokio::time::pause();

    let (bucket, _mock) = mock_bucket(1, 1, Duration::from_secs(10));
    let mut service = RateLimitLayer::new(bucket)
        .with_timeout(Duration::from_millis(50))
        .layer(MockService::new());

    service.ready().await.unwrap().call(()).await.unwrap();

    // Paused time auto-advances to the deadline
    let err = service.ready().await.err().expect("Should time out");
    assert_eq!(shot_error(err), ShotError::Timeout);
}

#[tokio::test]
async fn test_layer_integration() {
    let config = BucketConfig::new(100, 100, Duration::from_secs(1)).unwrap();
    let limiter = TokenBucket::new(config);

    let mut service = tower::ServiceBuilder::new()
        .layer(RateLimitLayer::new(Arc::new(limiter)))
        .service(MockService::new());

    service.ready().await.unwrap().call(()).await.unwrap();
}

#[tokio::test]
async fn test_dyn_strategy() {
    let config = BucketConfig::new(1, 1, Duration::from_secs(1)).unwrap();
    let limiter: Arc<dyn Strategy + Send + Sync> = Arc::new(TokenBucket::new(config));

    let mut service = RateLimitLayer::new(limiter)
        .with_fail_fast(true)
        .layer(MockService::new());

    service.ready().await.unwrap().call(()).await.unwrap();
    assert!(service.ready().await.is_err());
}

#[tokio::test]
async fn test_shared_state_across_clones() {
    let (bucket, _mock) = mock_bucket(1, 1, Duration::from_secs(10));
    let layer = RateLimitLayer::new(bucket);

    let mut svc1 = layer.layer(MockService::new());
    let mut svc2 = layer.layer(MockService::new());

    svc1.ready().await.unwrap().call(()).await.unwrap();

    // svc2 should now be throttled because svc1 used the token
    assert!(futures::poll!(svc2.ready()).is_pending());
}

#[tokio::test]
async fn test_concurrent_hammer() {
    let capacity = 50;
    let config = BucketConfig::new(capacity, 1, Duration::from_secs(3600)).unwrap();
    let strategy = Arc::new(TokenBucket::new(config));

    let mock = MockService::new();
    let mock_count = mock.count.clone();

    let service = RateLimitService::new(mock, strategy);
    let service = tower::buffer::Buffer::new(service, 100);

    let mut handles = vec![];
    for _ in 0..100 {
        let mut svc = service.clone();
        handles.push(tokio::spawn(async move {
            let _ = svc.ready().await.expect("Service should stay healthy");
            svc.call(()).await
        }));
    }

    // The other 50 stay Pending on an hour-long refill, so stop waiting after a while
    let mut completed = 0;
    let timeout = tokio::time::sleep(Duration::from_millis(50));
    tokio::pin!(timeout);

    for h in handles {
        tokio::select! {
            res = h => {
                res.expect("Task panicked").expect("Call failed");
                completed += 1;
            }
            _ = &mut timeout => {
                break;
            }
        }
    }

    assert_eq!(
        mock_count.load(Ordering::SeqCst) as u64,
        capacity,
        "Limiter allowed more/less than capacity under pressure"
    );
    assert_eq!(completed, capacity);
}

#[tokio::test]
async fn test_immediate_recovery() {
    let strategy = Arc::new(InstantRecoveryStrategy {
        already_blocked: AtomicBool::new(false),
    });
    let mut service = RateLimitService::new(MockService::new(), strategy);

    // The first poll sees a zero hint and must reschedule itself
    let ready_fut = service.ready();
    tokio::task::yield_now().await;

    ready_fut
        .await
        .expect("Should recover immediately from 0ms hint");
    service.call(()).await.unwrap();
}

#[tokio::test]
async fn test_managed_layer_cloning_concurrency() {
    let capacity = 5;
    let config = BucketConfig::new(capacity, 1, Duration::from_secs(60)).unwrap();
    let limiter = TokenBucket::new(config);

    let layer = ManagedRateLimitLayer::new(Arc::new(limiter), Duration::from_millis(100));

    let mock = MockService::new();
    let mock_count = mock.count.clone();
    let service = ServiceBuilder::new().layer(layer).service(mock);

    let mut handles = vec![];

    for _ in 0..20 {
        let mut cloned_svc = service.clone();
        handles.push(tokio::spawn(async move {
            let ready_svc = cloned_svc.ready().await?;
            ready_svc.call(()).await
        }));
    }

    let mut success = 0;
    let mut shed = 0;

    for h in handles {
        match h.await.unwrap() {
            Ok(_) => success += 1,
            Err(err) => {
                assert_eq!(shot_error(err), ShotError::Overloaded);
                shed += 1;
            }
        }
    }

    assert_eq!(success, capacity);
    assert_eq!(shed, 15);
    assert_eq!(mock_count.load(Ordering::SeqCst) as u64, capacity);
}

#[tokio::test]
async fn test_managed_layer_maps_errors() {
    let (bucket, _mock) = mock_bucket(4, 1, Duration::from_secs(60));

    let mut oversized = ServiceBuilder::new()
        .layer(
            ManagedRateLimitLayer::new(bucket.clone(), Duration::from_millis(100)).with_cost(5),
        )
        .service(MockService::new());
    let err = oversized.ready().await.err().expect("Should be rejected");
    assert_eq!(
        shot_error(err),
        ShotError::ExceedsCapacity {
            requested: 5,
            capacity: 4,
        }
    );

    let mut broken = ServiceBuilder::new()
        .layer(ManagedRateLimitLayer::new(bucket, Duration::from_millis(100)))
        .service(BrokenService);
    let err = broken
        .ready()
        .await
        .unwrap()
        .call(())
        .await
        .expect_err("Inner error should surface");
    assert_eq!(
        shot_error(err),
        ShotError::Inner("database unavailable".to_string())
    );
}
