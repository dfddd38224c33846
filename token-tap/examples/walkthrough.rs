//! Replays the classic token bucket scenarios against a mock clock.
//!
//! Run with `RUST_LOG=token_tap=trace` to watch the bucket's own events.

use std::time::Duration;

use quanta::Clock;
use token_tap::BucketConfig;
use token_tap::BucketError;
use token_tap::TokenBucket;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), BucketError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 5 tokens, refilled 5 at a time every 10 seconds
    let config = BucketConfig::new(5, 5, Duration::from_secs(10))?;
    let (clock, mock) = Clock::mock();
    let bucket = TokenBucket::with_clock(config, clock);

    info!("1. simple consumption");
    info!(available = bucket.available_tokens());
    info!(consumed = bucket.try_consume(3)?, "try consume 3");
    info!(consumed = bucket.try_consume(3)?, "try consume 3 again");
    info!(available = bucket.available_tokens());

    info!("2. consumption probe");
    bucket.reset();
    bucket.try_consume(4)?;
    let probe = bucket.try_consume_with_probe(3)?;
    info!(
        succeeded = probe.succeeded,
        remaining = probe.remaining_tokens,
        wait = ?probe.wait_time,
        "probe for 3"
    );

    info!("3. estimation");
    bucket.reset();
    let estimate = bucket.estimate(10)?;
    info!(
        would_succeed = estimate.would_succeed,
        wait = ?estimate.wait_time,
        "estimate for 10"
    );
    info!(available = bucket.available_tokens(), "nothing was consumed");

    info!("4. consume as much as possible");
    bucket.reset();
    info!(consumed = bucket.drain_up_to(3)?, "drain up to 3");
    info!(available = bucket.available_tokens());

    info!("5. refill over time");
    bucket.reset();
    bucket.try_consume(5)?;
    info!(available = bucket.available_tokens(), "t=0s");
    mock.increment(Duration::from_secs(5));
    info!(available = bucket.available_tokens(), "t=5s, half a period");
    mock.increment(Duration::from_secs(5));
    info!(available = bucket.available_tokens(), "t=10s, one period");

    info!("6. ignoring limits");
    bucket.reset();
    let penalty = bucket.consume_ignoring_limits(10)?;
    info!(?penalty, available = bucket.available_tokens(), "consumed 10 of 5");

    info!("7. forced overflow");
    bucket.reset();
    bucket.force_add_tokens(10)?;
    info!(available = bucket.available_tokens(), "added 10 past capacity");
    mock.increment(Duration::from_secs(10));
    info!(available = bucket.available_tokens(), "one period later");

    Ok(())
}
